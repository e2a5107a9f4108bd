//! Playback scheduler: the single loop that drains the queue into the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jukebox_proto::protocol::SessionPhase;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::Interaction;
use crate::error::Result;
use crate::queue::{PlaybackQueue, Removal};
use crate::sink::PlaybackSink;
use crate::storage::MediaStorage;
use crate::track::TrackRecord;
use crate::BroadcastMessage;

pub struct Scheduler {
    queue: Arc<PlaybackQueue>,
    sink: Arc<dyn PlaybackSink>,
    chat: Arc<dyn Interaction>,
    storage: Arc<MediaStorage>,
    /// `Idle` means no loop is running.  Checked and flipped under this lock.
    phase: Mutex<SessionPhase>,
    phase_changes: AtomicU64,
    /// Serializes pop+start against remove+stop.
    transport: Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Scheduler {
    pub fn new(
        queue: Arc<PlaybackQueue>,
        sink: Arc<dyn PlaybackSink>,
        chat: Arc<dyn Interaction>,
        storage: Arc<MediaStorage>,
        poll_interval: Duration,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Self {
        Self {
            queue,
            sink,
            chat,
            storage,
            phase: Mutex::new(SessionPhase::Idle),
            phase_changes: AtomicU64::new(0),
            transport: Mutex::new(()),
            task: Mutex::new(None),
            poll_interval,
            broadcast_tx,
        }
    }

    pub async fn phase(&self) -> SessionPhase {
        *self.phase.lock().await
    }

    pub fn phase_changes(&self) -> u64 {
        self.phase_changes.load(Ordering::Relaxed)
    }

    /// Start the loop unless one is already running.  Returns whether this
    /// call started it.
    pub async fn ensure_running(self: &Arc<Self>) -> bool {
        let mut phase = self.phase.lock().await;
        if *phase != SessionPhase::Idle {
            debug!("scheduler: already {:?}", *phase);
            return false;
        }
        self.set_phase(&mut phase, SessionPhase::Playing);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.task.lock().await = Some(handle);
        info!("scheduler: started");
        true
    }

    async fn run(self: Arc<Self>) {
        loop {
            {
                let _transport = self.transport.lock().await;
                if !self.sink.is_streaming() {
                    match self.queue.pop_front().await {
                        Some(track) => self.start(&track).await,
                        None => {
                            if self.wind_down().await {
                                break;
                            }
                            continue;
                        }
                    }
                    self.notify();
                }
            }

            tokio::select! {
                _ = self.sink.finished() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("scheduler: stopped");
    }

    async fn start(&self, track: &TrackRecord) {
        match self.sink.play(track).await {
            Ok(()) => {
                info!("scheduler: playing '{}' ({})", track.title(), track.id());
                self.chat.say(format!("Now playing {}", track)).await;
            }
            Err(e) => {
                warn!("scheduler: sink refused '{}': {}", track.title(), e);
                self.chat.say(format!("Could not play {}", track)).await;
                self.queue.finish_current().await;
            }
        }
    }

    /// Leave the loop if nothing is pending.  Holding the storage gate
    /// exclusively during the emptiness check keeps a fetch from queueing a
    /// file that is about to be wiped.
    async fn wind_down(&self) -> bool {
        let mut phase = self.phase.lock().await;
        let exclusive = self.storage.try_exclusive();
        if self.queue.has_pending().await {
            return false;
        }

        self.set_phase(&mut phase, SessionPhase::Draining);
        match &exclusive {
            Some(exclusive) => {
                if let Err(e) = self.storage.clear_exclusive(exclusive).await {
                    warn!("scheduler: failed to clear storage: {}", e);
                }
            }
            None => debug!("scheduler: fetch in flight, storage kept until next drain"),
        }
        self.set_phase(&mut phase, SessionPhase::Idle);
        true
    }

    fn set_phase(&self, phase: &mut SessionPhase, next: SessionPhase) {
        debug!("scheduler: {:?} -> {:?}", *phase, next);
        *phase = next;
        self.phase_changes.fetch_add(1, Ordering::Relaxed);
        self.notify();
    }

    fn notify(&self) {
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Stop the playing track.  Returns it, or `None` when nothing played.
    pub async fn skip_current(&self) -> Option<TrackRecord> {
        let _transport = self.transport.lock().await;
        let skipped = self.queue.finish_current().await;
        if skipped.is_some() {
            self.sink.stop().await;
            self.notify();
        }
        skipped
    }

    pub async fn remove_range(&self, start: usize, end: usize) -> Result<Removal> {
        let _transport = self.transport.lock().await;
        let removal = self.queue.remove_range(start, end).await?;
        self.after_removal(&removal).await;
        Ok(removal)
    }

    pub async fn remove_front(&self, n: usize) -> Result<Removal> {
        let _transport = self.transport.lock().await;
        let removal = self.queue.remove_count_from_front(n).await?;
        self.after_removal(&removal).await;
        Ok(removal)
    }

    async fn after_removal(&self, removal: &Removal) {
        if removal.hit_current {
            self.sink.stop().await;
        }
        self.notify();
    }

    /// Empty the queue, stop the sink and wait for the loop to exit.
    pub async fn shutdown(&self) {
        {
            let _transport = self.transport.lock().await;
            let dropped = self.queue.clear().await;
            debug!("scheduler: shutdown dropped {} tracks", dropped.len());
            self.sink.stop().await;
        }
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("scheduler: loop task failed: {}", e);
            }
        }
        self.notify();
    }
}
