//! Session media directory.
//!
//! Downloads land in `<media_dir>/<session>/` under random 10-character
//! names.  There is no manifest: the queue is the only index of what the
//! directory holds, so clearing always wipes the whole directory.

use std::io;
use std::path::{Path, PathBuf};

use rand::Rng;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

const NAME_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const NAME_LEN: usize = 10;

/// Held by a fetch from before it writes until its record is queued.
/// Clearing waits for (or skips over) outstanding leases.
pub type StorageLease<'a> = RwLockReadGuard<'a, ()>;

/// Proof that no fetch is writing into the directory.
pub type StorageExclusive<'a> = RwLockWriteGuard<'a, ()>;

pub struct MediaStorage {
    dir: PathBuf,
    gate: RwLock<()>,
}

impl MediaStorage {
    pub fn new(media_root: &Path, session_id: &str) -> Self {
        Self {
            dir: media_root.join(session_id),
            gate: RwLock::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn lease(&self) -> io::Result<StorageLease<'_>> {
        let lease = self.gate.read().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(lease)
    }

    /// Fresh destination for one download.  Collisions are astronomically
    /// unlikely but still checked.
    pub fn allocate_path(&self) -> PathBuf {
        loop {
            let candidate = self.dir.join(format!("{}.mp3", random_name()));
            if !candidate.exists() {
                return candidate;
            }
        }
    }

    /// Wipe and recreate the directory, waiting for in-flight fetches.
    pub async fn clear(&self) -> io::Result<()> {
        let _exclusive = self.gate.write().await;
        reset_dir(&self.dir).await
    }

    /// Exclusive access unless a fetch holds a lease.
    pub fn try_exclusive(&self) -> Option<StorageExclusive<'_>> {
        match self.gate.try_write() {
            Ok(exclusive) => Some(exclusive),
            Err(_) => {
                debug!("storage: fetch in flight, keeping {}", self.dir.display());
                None
            }
        }
    }

    /// Wipe while holding exclusive access from `try_exclusive`.
    pub async fn clear_exclusive(&self, _exclusive: &StorageExclusive<'_>) -> io::Result<()> {
        reset_dir(&self.dir).await
    }

    /// Delete one file that never made it into the queue.
    pub async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!("storage: discarded {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("storage: failed to discard {}: {}", path.display(), e),
        }
    }
}

async fn reset_dir(dir: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    tokio::fs::create_dir_all(dir).await?;
    info!("storage: cleared {}", dir.display());
    Ok(())
}

fn random_name() -> String {
    let mut rng = rand::thread_rng();
    (0..NAME_LEN)
        .map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
        .collect()
}
