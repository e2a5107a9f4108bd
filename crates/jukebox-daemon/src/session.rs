//! The playback session: channel membership, queue, scheduler and storage.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::protocol::{SessionPhase, SessionSnapshot};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::chat::Interaction;
use crate::error::{AgentError, Result};
use crate::queue::PlaybackQueue;
use crate::scheduler::Scheduler;
use crate::sink::PlaybackSink;
use crate::storage::MediaStorage;
use crate::BroadcastMessage;

const SKIP_USAGE: &str = "skip [N | A-B]";

/// Parsed argument of a skip command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipRequest {
    Current,
    Count(usize),
    /// Inclusive, 1-indexed.
    Range(usize, usize),
}

impl SkipRequest {
    pub fn parse(arg: Option<&str>) -> Result<Self> {
        let arg = match arg.map(str::trim) {
            None | Some("") => return Ok(SkipRequest::Current),
            Some(arg) => arg,
        };
        if let Some((start, end)) = arg.split_once('-') {
            let start = start.trim().parse().map_err(|_| AgentError::Usage(SKIP_USAGE))?;
            let end = end.trim().parse().map_err(|_| AgentError::Usage(SKIP_USAGE))?;
            return Ok(SkipRequest::Range(start, end));
        }
        arg.parse()
            .map(SkipRequest::Count)
            .map_err(|_| AgentError::Usage(SKIP_USAGE))
    }
}

pub struct Session {
    id: String,
    channel: RwLock<Option<String>>,
    queue: Arc<PlaybackQueue>,
    storage: Arc<MediaStorage>,
    sink: Arc<dyn PlaybackSink>,
    chat: Arc<dyn Interaction>,
    scheduler: Arc<Scheduler>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Session {
    pub fn new(
        id: &str,
        media_root: &Path,
        sink: Arc<dyn PlaybackSink>,
        chat: Arc<dyn Interaction>,
        poll_interval: Duration,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        let queue = Arc::new(PlaybackQueue::new());
        let storage = Arc::new(MediaStorage::new(media_root, id));
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            sink.clone(),
            chat.clone(),
            storage.clone(),
            poll_interval,
            broadcast_tx.clone(),
        ));
        Self {
            id: id.to_string(),
            channel: RwLock::new(None),
            queue,
            storage,
            sink,
            chat,
            scheduler,
            broadcast_tx,
        }
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.queue
    }

    pub fn storage(&self) -> &Arc<MediaStorage> {
        &self.storage
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn chat(&self) -> &Arc<dyn Interaction> {
        &self.chat
    }

    pub async fn channel(&self) -> Option<String> {
        self.channel.read().await.clone()
    }

    pub async fn is_playing(&self) -> bool {
        self.scheduler.phase().await != SessionPhase::Idle
    }

    fn notify(&self) {
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    async fn connect(&self, channel: &str) -> Result<()> {
        let mut current = self.channel.write().await;
        self.sink
            .connect(channel)
            .await
            .map_err(|e| AgentError::Sink(e.to_string()))?;
        if let Some(previous) = current.replace(channel.to_string()) {
            if previous != channel {
                info!("session {}: moved from {} to {}", self.id, previous, channel);
            }
        }
        drop(current);
        self.notify();
        Ok(())
    }

    /// Connect to `channel`, or move there.
    pub async fn join(&self, channel: &str) -> Result<()> {
        self.connect(channel).await?;
        info!("session {}: joined {}", self.id, channel);
        self.chat
            .say(format!("Connected to channel {}", channel))
            .await;
        Ok(())
    }

    /// Connect without announcing it.  Stays put when already connected.
    pub async fn silent_join(&self, channel: &str) -> Result<()> {
        if self.channel.read().await.is_some() && self.sink.is_connected() {
            return Ok(());
        }
        self.connect(channel).await
    }

    pub async fn leave(&self) -> Result<()> {
        let channel = self
            .channel
            .write()
            .await
            .take()
            .ok_or(AgentError::NotConnected)?;

        self.chat.cancel_listeners().await;
        self.scheduler.shutdown().await;
        self.sink.disconnect().await;
        // Waits for in-flight fetches; their records were already refused.
        self.storage.clear().await?;
        self.notify();

        info!("session {}: left {}", self.id, channel);
        self.chat
            .say(format!("Disconnected from channel {}", channel))
            .await;
        Ok(())
    }

    pub async fn skip(&self, arg: Option<&str>) -> Result<()> {
        match SkipRequest::parse(arg)? {
            SkipRequest::Current => match self.scheduler.skip_current().await {
                Some(track) => {
                    info!("session {}: skipped '{}'", self.id, track.title());
                    self.chat.say("Track skipped".to_string()).await;
                }
                None => self.chat.say("Nothing is playing".to_string()).await,
            },
            SkipRequest::Count(n) => {
                let removal = self.scheduler.remove_front(n).await?;
                self.chat
                    .say(format!(
                        "Removed {} tracks from the playlist",
                        removal.count()
                    ))
                    .await;
            }
            SkipRequest::Range(start, end) => {
                self.scheduler.remove_range(start, end).await?;
                self.chat
                    .say(format!(
                        "Removed tracks {} to {} from the playlist",
                        start, end
                    ))
                    .await;
            }
        }
        Ok(())
    }

    pub async fn playlist_text(&self) -> String {
        let tracks = self.queue.snapshot().await;
        let mut text = format!("Tracks in queue {}:\n", tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, track));
        }
        text
    }

    pub async fn show_playlist(&self) {
        let text = self.playlist_text().await;
        self.chat.say(text).await;
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let current = self.queue.current().await;
        let mut tracks = self.queue.snapshot().await.into_iter();
        if current.is_some() {
            tracks.next();
        }
        SessionSnapshot {
            rev: self.queue.rev().await + self.scheduler.phase_changes(),
            channel: self.channel().await,
            phase: self.scheduler.phase().await,
            now_playing: current.map(|t| t.info()),
            upcoming: tracks.map(|t| t.info()).collect(),
            sink_streaming: self.sink.is_streaming(),
        }
    }

    /// Daemon shutdown: leave if connected, otherwise just drop downloads.
    pub async fn close(&self) {
        match self.leave().await {
            Ok(()) | Err(AgentError::NotConnected) => {}
            Err(e) => warn!("session {}: leave on shutdown failed: {}", self.id, e),
        }
        if let Err(e) = self.storage.clear().await {
            warn!("session {}: storage clear failed: {}", self.id, e);
        }
    }
}
