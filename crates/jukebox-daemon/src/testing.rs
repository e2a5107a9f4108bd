//! In-memory collaborators for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use crate::catalog::{ArtistRef, Catalog, CatalogAlbum, CatalogArtist, CatalogTrack};
use crate::chat::{Interaction, Reply};
use crate::error::CatalogError;
use crate::fetcher::MediaFetcher;
use crate::sink::PlaybackSink;
use crate::storage::MediaStorage;
use crate::track::TrackRecord;

/// Poll `$cond` until it holds; panics after five seconds.
macro_rules! wait_until {
    ($cond:expr) => {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if $cond {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
        })
        .await
        .expect(concat!("timed out waiting for ", stringify!($cond)))
    };
}
pub(crate) use wait_until;

/// A record whose file really exists in `storage`.
pub async fn stored_record(storage: &MediaStorage, title: &str) -> TrackRecord {
    let _lease = storage.lease().await.unwrap();
    let path = storage.allocate_path();
    std::fs::write(&path, b"ID3").unwrap();
    TrackRecord::new(path, title, "Test Artist")
}

// ── sink ──────────────────────────────────────────────────────────────────────

/// Streams until `finish` or `stop` is called.
pub struct FakeSink {
    streaming: watch::Sender<bool>,
    channel: Mutex<Option<String>>,
    played: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
    stops: AtomicUsize,
}

impl FakeSink {
    pub fn new() -> Self {
        let (streaming, _) = watch::channel(false);
        Self {
            streaming,
            channel: Mutex::new(None),
            played: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn connected() -> Self {
        let sink = Self::new();
        *sink.channel.lock().unwrap() = Some("test".into());
        sink
    }

    /// The current track reaches its end.
    pub fn finish(&self) {
        self.streaming.send_replace(false);
    }

    /// `play` fails for this title.
    pub fn refuse(&self, title: &str) {
        self.refused.lock().unwrap().insert(title.to_string());
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Option<String> {
        self.channel.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaybackSink for FakeSink {
    async fn connect(&self, channel: &str) -> anyhow::Result<()> {
        *self.channel.lock().unwrap() = Some(channel.to_string());
        Ok(())
    }

    async fn disconnect(&self) {
        *self.channel.lock().unwrap() = None;
        self.streaming.send_replace(false);
    }

    fn is_connected(&self) -> bool {
        self.channel.lock().unwrap().is_some()
    }

    async fn play(&self, track: &TrackRecord) -> anyhow::Result<()> {
        if self.refused.lock().unwrap().contains(track.title()) {
            anyhow::bail!("refused");
        }
        self.played.lock().unwrap().push(track.title().to_string());
        self.streaming.send_replace(true);
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        *self.streaming.borrow()
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.streaming.send_replace(false);
    }

    async fn finished(&self) {
        let mut rx = self.streaming.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ── chat ──────────────────────────────────────────────────────────────────────

/// Records outbound text; answers choice lists from a script.  With an
/// empty script a listener stays open until cancelled.
pub struct FakeChat {
    said: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<String>>,
    open: Mutex<Vec<oneshot::Sender<String>>>,
    reply_waits: AtomicUsize,
}

impl FakeChat {
    pub fn new() -> Self {
        Self {
            said: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            open: Mutex::new(Vec::new()),
            reply_waits: AtomicUsize::new(0),
        }
    }

    pub fn with_replies(replies: &[&str]) -> Self {
        let chat = Self::new();
        chat.replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| r.to_string()));
        chat
    }

    pub fn said(&self) -> Vec<String> {
        self.said.lock().unwrap().clone()
    }

    pub fn reply_waits(&self) -> usize {
        self.reply_waits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Interaction for FakeChat {
    async fn say(&self, text: String) {
        self.said.lock().unwrap().push(text);
    }

    async fn listen(&self) -> Reply {
        self.reply_waits.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let scripted = self.replies.lock().unwrap().pop_front();
        match scripted {
            Some(reply) => {
                let _ = tx.send(reply);
            }
            None => self.open.lock().unwrap().push(tx),
        }
        rx
    }

    async fn cancel_listeners(&self) {
        self.open.lock().unwrap().clear();
    }
}

// ── catalog ───────────────────────────────────────────────────────────────────

pub fn catalog_track(id: &str, title: &str, artist: &str) -> CatalogTrack {
    CatalogTrack {
        id: id.to_string(),
        title: title.to_string(),
        artists: vec![ArtistRef {
            id: None,
            name: artist.to_string(),
        }],
    }
}

pub fn catalog_album(
    id: &str,
    title: &str,
    artist: Option<&str>,
    year: Option<i32>,
    track_count: usize,
) -> CatalogAlbum {
    CatalogAlbum {
        id: id.to_string(),
        title: title.to_string(),
        artists: artist
            .map(|name| ArtistRef {
                id: None,
                name: name.to_string(),
            })
            .into_iter()
            .collect(),
        year,
        track_count,
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    pub tracks: Vec<CatalogTrack>,
    pub albums: Vec<CatalogAlbum>,
    pub artists: Vec<CatalogArtist>,
    pub album_tracks: HashMap<String, Vec<CatalogTrack>>,
    pub artist_albums: HashMap<String, Vec<CatalogAlbum>>,
    /// Track search fails with a status error.
    pub tracks_down: bool,
    /// Album search fails with a status error.
    pub albums_down: bool,
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn search_tracks(
        &self,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogTrack>, CatalogError> {
        if self.tracks_down {
            return Err(CatalogError::Status(503));
        }
        Ok(self.tracks.iter().take(limit).cloned().collect())
    }

    async fn search_albums(
        &self,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogAlbum>, CatalogError> {
        if self.albums_down {
            return Err(CatalogError::Status(503));
        }
        Ok(self.albums.iter().take(limit).cloned().collect())
    }

    async fn search_artists(
        &self,
        _query: &str,
        limit: usize,
    ) -> Result<Vec<CatalogArtist>, CatalogError> {
        Ok(self.artists.iter().take(limit).cloned().collect())
    }

    async fn album_tracks(&self, album_id: &str) -> Result<Vec<CatalogTrack>, CatalogError> {
        self.album_tracks
            .get(album_id)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownId(album_id.to_string()))
    }

    async fn artist_albums(&self, artist_id: &str) -> Result<Vec<CatalogAlbum>, CatalogError> {
        Ok(self
            .artist_albums
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ── fetcher ───────────────────────────────────────────────────────────────────

/// Writes a stub file per track; fails for configured titles.
#[derive(Default)]
pub struct FakeFetcher {
    failing: HashSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn failing(titles: &[&str]) -> Self {
        Self {
            failing: titles.iter().map(|t| t.to_string()).collect(),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, track: &CatalogTrack, dest: &Path) -> anyhow::Result<()> {
        self.fetched.lock().unwrap().push(track.title.clone());
        if self.failing.contains(&track.title) {
            anyhow::bail!("status 404");
        }
        tokio::fs::write(dest, b"ID3").await?;
        Ok(())
    }
}
