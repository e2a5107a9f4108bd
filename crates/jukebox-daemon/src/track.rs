use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use jukebox_proto::protocol::TrackInfo;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// One downloaded, playable item.
///
/// Only the fetcher builds these, after the audio file is completely written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRecord {
    id: u64,
    location: PathBuf,
    title: String,
    artist: String,
}

impl TrackRecord {
    pub fn new(location: PathBuf, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
            location,
            title: title.into(),
            artist: artist.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            title: self.title.clone(),
            artist: self.artist.clone(),
        }
    }
}

impl fmt::Display for TrackRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "**{}** by {}", self.title, self.artist)
    }
}
