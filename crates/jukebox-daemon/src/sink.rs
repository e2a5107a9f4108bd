//! Playback sink: streams one local file at a time to the connected channel.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::mpv::{MpvDriver, MpvEvent, MpvHandle};
use crate::track::TrackRecord;

const STOP_SETTLE: Duration = Duration::from_secs(2);

#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Connect to `channel`, or move there when connected elsewhere.
    async fn connect(&self, channel: &str) -> anyhow::Result<()>;

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Begin streaming `track`.  Returns once playback has been started.
    async fn play(&self, track: &TrackRecord) -> anyhow::Result<()>;

    fn is_streaming(&self) -> bool;

    /// Stop the current stream.  A no-op when nothing is streaming.
    async fn stop(&self);

    /// Resolves once the sink is not streaming.
    async fn finished(&self);
}

/// Streaming flag, plus the bookkeeping that keeps stale mpv events off it.
struct StreamState {
    streaming: watch::Sender<bool>,
    /// Bumped per mpv process and on disconnect.  Events tagged with an
    /// older value are ignored.
    generation: AtomicU64,
    /// `end-file` events still owed by stops that timed out.
    owed_stop_ends: AtomicUsize,
}

impl StreamState {
    fn new() -> Self {
        let (streaming, _) = watch::channel(false);
        Self {
            streaming,
            generation: AtomicU64::new(0),
            owed_stop_ends: AtomicUsize::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.owed_stop_ends.store(0, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_streaming(&self, streaming: bool) {
        self.streaming.send_replace(streaming);
    }

    /// A stop gave up waiting; its `end-file` may still arrive later.
    fn force_idle_after_stop(&self) {
        self.owed_stop_ends.fetch_add(1, Ordering::SeqCst);
        self.set_streaming(false);
    }

    fn take_owed_stop_end(&self) -> bool {
        self.owed_stop_ends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn apply(&self, generation: u64, event: &MpvEvent) {
        if !self.is_current(generation) {
            return;
        }
        match event.event_name() {
            Some("start-file") => self.set_streaming(true),
            Some("end-file") => {
                let reason = event.end_reason();
                if reason == Some("stop") && self.take_owed_stop_end() {
                    debug!("sink: late end-file from a timed-out stop, ignored");
                    return;
                }
                debug!("sink: end-file reason={:?}", reason);
                self.set_streaming(false);
            }
            _ => {}
        }
    }
}

/// Sink backed by an mpv child process.
///
/// The streaming flag lives in a `watch` channel fed by mpv's
/// `start-file`/`end-file` events, so waiters wake as soon as a track ends.
pub struct MpvSink {
    driver: Mutex<MpvDriver>,
    handle: Mutex<Option<MpvHandle>>,
    channel: std::sync::Mutex<Option<String>>,
    state: Arc<StreamState>,
    volume: f32,
}

impl MpvSink {
    pub fn new(volume: f32) -> Self {
        Self {
            driver: Mutex::new(MpvDriver::new(volume)),
            handle: Mutex::new(None),
            channel: std::sync::Mutex::new(None),
            state: Arc::new(StreamState::new()),
            volume,
        }
    }

    fn set_channel(&self, channel: Option<String>) {
        if let Ok(mut slot) = self.channel.lock() {
            *slot = channel;
        }
    }

    fn channel(&self) -> Option<String> {
        self.channel.lock().ok().and_then(|slot| slot.clone())
    }

    /// Return a live IPC handle, respawning mpv if it died.
    async fn ensure_process(&self) -> anyhow::Result<MpvHandle> {
        let mut driver = self.driver.lock().await;
        let mut handle = self.handle.lock().await;
        if let (Some(h), true) = (handle.as_ref(), driver.process_alive()) {
            return Ok(h.clone());
        }

        let generation = self.state.next_generation();
        let (event_tx, event_rx) = mpsc::channel::<MpvEvent>(64);
        let fresh = driver.spawn_and_connect(event_tx).await?;
        if let Err(e) = fresh.set_volume(self.volume).await {
            warn!("sink: failed to set volume: {}", e);
        }
        tokio::spawn(pump_events(event_rx, self.state.clone(), generation));
        *handle = Some(fresh.clone());
        Ok(fresh)
    }
}

/// Maps one mpv process's events onto the streaming flag until its IPC
/// connection closes.
async fn pump_events(
    mut event_rx: mpsc::Receiver<MpvEvent>,
    state: Arc<StreamState>,
    generation: u64,
) {
    while let Some(event) = event_rx.recv().await {
        state.apply(generation, &event);
    }
    debug!("sink: mpv event stream {} closed", generation);
    if state.is_current(generation) {
        state.set_streaming(false);
    }
}

#[async_trait]
impl PlaybackSink for MpvSink {
    async fn connect(&self, channel: &str) -> anyhow::Result<()> {
        self.ensure_process().await?;
        self.set_channel(Some(channel.to_string()));
        info!("sink: connected to {}", channel);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut driver = self.driver.lock().await;
        self.handle.lock().await.take();
        self.state.next_generation();
        driver.kill().await;
        self.state.set_streaming(false);
        if let Some(channel) = self.channel() {
            info!("sink: disconnected from {}", channel);
        }
        self.set_channel(None);
    }

    fn is_connected(&self) -> bool {
        self.channel().is_some()
    }

    async fn play(&self, track: &TrackRecord) -> anyhow::Result<()> {
        if !self.is_connected() {
            anyhow::bail!("sink is not connected to a channel");
        }
        let handle = self.ensure_process().await?;

        // Raised before loadfile so a poll between the command and mpv's
        // start-file event does not see an idle sink.
        self.state.set_streaming(true);
        if let Err(e) = handle.load_file(track.location()).await {
            self.state.set_streaming(false);
            return Err(e);
        }
        debug!("sink: streaming {}", track.location().display());
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        *self.state.streaming.borrow()
    }

    async fn stop(&self) {
        if !self.is_streaming() {
            return;
        }
        let handle = self.handle.lock().await.clone();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.stop().await {
                    warn!("sink: stop failed: {}", e);
                    self.state.set_streaming(false);
                    return;
                }
            }
            None => {
                self.state.set_streaming(false);
                return;
            }
        }
        if tokio::time::timeout(STOP_SETTLE, self.finished())
            .await
            .is_err()
        {
            warn!("sink: no end-file after stop, forcing idle");
            self.state.force_idle_after_stop();
        }
    }

    async fn finished(&self) {
        let mut rx = self.state.streaming.subscribe();
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
