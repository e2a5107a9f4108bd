//! Playback queue shared by the scheduler and chat commands.
//!
//! The queue is addressed the way users see it: position 1 is the track the
//! sink is playing (if any), followed by the pending tracks.  All state sits
//! behind one mutex so a skip can never interleave with the scheduler
//! promoting the next track.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::error::{AgentError, Result};
use crate::track::TrackRecord;

#[derive(Debug, Default)]
struct QueueInner {
    /// Track handed to the sink and not yet retired.
    playing: Option<TrackRecord>,
    pending: VecDeque<TrackRecord>,
    /// Bumped by `clear`; appends tagged with an older epoch are refused.
    epoch: u64,
    /// Bumped by every mutation.
    rev: u64,
}

impl QueueInner {
    fn len(&self) -> usize {
        usize::from(self.playing.is_some()) + self.pending.len()
    }

    fn iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.playing.iter().chain(self.pending.iter())
    }

    /// Remove zero-based positions `from..to`.  Caller guarantees
    /// `from < to <= len`.
    fn remove_span(&mut self, from: usize, to: usize) -> Removal {
        let mut removed = Vec::with_capacity(to - from);
        let mut hit_current = false;

        let offset = usize::from(self.playing.is_some());
        if offset == 1 && from == 0 {
            if let Some(track) = self.playing.take() {
                removed.push(track);
                hit_current = true;
            }
        }

        let pending_from = from.max(offset) - offset;
        let pending_to = to - offset;
        if pending_from < pending_to {
            removed.extend(self.pending.drain(pending_from..pending_to));
        }

        self.rev += 1;
        Removal {
            removed,
            hit_current,
        }
    }
}

/// Outcome of a removal.
#[derive(Debug)]
pub struct Removal {
    pub removed: Vec<TrackRecord>,
    /// The track handed to the sink was among the removed ones; the caller
    /// must stop the sink.
    pub hit_current: bool,
}

impl Removal {
    pub fn count(&self) -> usize {
        self.removed.len()
    }
}

#[derive(Debug, Default)]
pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn append(&self, record: TrackRecord) {
        let mut inner = self.inner.lock().await;
        inner.pending.push_back(record);
        inner.rev += 1;
    }

    /// Append unless the queue was cleared since `epoch` was read.  The
    /// refused record is handed back so its file can be discarded.
    pub async fn append_for(
        &self,
        epoch: u64,
        record: TrackRecord,
    ) -> std::result::Result<(), TrackRecord> {
        let mut inner = self.inner.lock().await;
        if inner.epoch != epoch {
            return Err(record);
        }
        inner.pending.push_back(record);
        inner.rev += 1;
        Ok(())
    }

    pub async fn epoch(&self) -> u64 {
        self.inner.lock().await.epoch
    }

    pub async fn rev(&self) -> u64 {
        self.inner.lock().await.rev
    }

    /// Delete the inclusive, 1-indexed window `start..=end`.
    pub async fn remove_range(&self, start: usize, end: usize) -> Result<Removal> {
        let mut inner = self.inner.lock().await;
        let len = inner.len();
        if start == 0 || end < start || end > len {
            return Err(AgentError::RangeInvalid { start, end, len });
        }
        Ok(inner.remove_span(start - 1, end))
    }

    /// Delete the first `n` entries, clamped to the queue length.
    pub async fn remove_count_from_front(&self, n: usize) -> Result<Removal> {
        let mut inner = self.inner.lock().await;
        let len = inner.len();
        if n == 0 || len == 0 {
            return Err(AgentError::RangeInvalid {
                start: 1,
                end: n,
                len,
            });
        }
        Ok(inner.remove_span(0, n.min(len)))
    }

    /// Retire the playing track and promote the next pending one.
    ///
    /// Only the scheduler calls this.  A returned record is the new current
    /// track and must be handed to the sink.
    pub async fn pop_front(&self) -> Option<TrackRecord> {
        let mut inner = self.inner.lock().await;
        inner.playing = inner.pending.pop_front();
        inner.rev += 1;
        inner.playing.clone()
    }

    /// Retire the playing track without promoting another.
    pub async fn finish_current(&self) -> Option<TrackRecord> {
        let mut inner = self.inner.lock().await;
        let finished = inner.playing.take();
        if finished.is_some() {
            inner.rev += 1;
        }
        finished
    }

    pub async fn current(&self) -> Option<TrackRecord> {
        self.inner.lock().await.playing.clone()
    }

    /// Position 1: the playing track, or the next one to play.
    pub async fn peek_front(&self) -> Option<TrackRecord> {
        self.inner.lock().await.iter().next().cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn has_pending(&self) -> bool {
        !self.inner.lock().await.pending.is_empty()
    }

    /// Ordered copy for display; index 0 is position 1.
    pub async fn snapshot(&self) -> Vec<TrackRecord> {
        self.inner.lock().await.iter().cloned().collect()
    }

    /// Drop everything and invalidate in-flight appends.
    pub async fn clear(&self) -> Vec<TrackRecord> {
        let mut inner = self.inner.lock().await;
        let mut dropped: Vec<TrackRecord> = inner.playing.take().into_iter().collect();
        dropped.extend(inner.pending.drain(..));
        inner.epoch += 1;
        inner.rev += 1;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::path::PathBuf;

    fn record(title: &str) -> TrackRecord {
        TrackRecord::new(PathBuf::from(format!("/tmp/{title}.mp3")), title, "Test Artist")
    }

    async fn titles(queue: &PlaybackQueue) -> Vec<String> {
        queue
            .snapshot()
            .await
            .iter()
            .map(|t| t.title().to_string())
            .collect()
    }

    async fn filled(names: &[&str]) -> PlaybackQueue {
        let queue = PlaybackQueue::new();
        for name in names {
            queue.append(record(name)).await;
        }
        queue
    }

    #[tokio::test]
    async fn remove_range_drops_inclusive_window() {
        let queue = filled(&["a", "b", "c", "d", "e"]).await;
        let removal = queue.remove_range(2, 4).await.unwrap();
        assert_eq!(removal.count(), 3);
        assert!(!removal.hit_current);
        assert_eq!(titles(&queue).await, vec!["a", "e"]);
    }

    #[tokio::test]
    async fn remove_range_out_of_bounds_is_noop() {
        let queue = filled(&["a", "b", "c"]).await;
        for (start, end) in [(0, 1), (2, 1), (2, 4), (4, 4)] {
            let err = queue.remove_range(start, end).await.unwrap_err();
            assert!(matches!(err, AgentError::RangeInvalid { len: 3, .. }));
        }
        assert_eq!(titles(&queue).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn range_covering_playing_track_reports_hit() {
        let queue = filled(&["a", "b", "c"]).await;
        assert_eq!(queue.pop_front().await.unwrap().title(), "a");

        let removal = queue.remove_range(1, 2).await.unwrap();
        assert!(removal.hit_current);
        assert!(queue.current().await.is_none());
        assert_eq!(titles(&queue).await, vec!["c"]);
    }

    #[tokio::test]
    async fn range_after_playing_track_leaves_it_alone() {
        let queue = filled(&["a", "b", "c", "d"]).await;
        queue.pop_front().await;

        let removal = queue.remove_range(2, 3).await.unwrap();
        assert!(!removal.hit_current);
        assert_eq!(titles(&queue).await, vec!["a", "d"]);
        assert_eq!(queue.current().await.unwrap().title(), "a");
    }

    #[tokio::test]
    async fn count_from_front_clamps_and_counts_playing_track() {
        let queue = filled(&["a", "b", "c"]).await;
        queue.pop_front().await;

        let removal = queue.remove_count_from_front(2).await.unwrap();
        assert!(removal.hit_current);
        assert_eq!(titles(&queue).await, vec!["c"]);

        let removal = queue.remove_count_from_front(10).await.unwrap();
        assert_eq!(removal.count(), 1);
        assert!(queue.is_empty().await);

        assert!(queue.remove_count_from_front(1).await.is_err());
    }

    #[tokio::test]
    async fn zero_count_is_rejected() {
        let queue = filled(&["a"]).await;
        assert!(queue.remove_count_from_front(0).await.is_err());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn pop_front_retires_previous_track() {
        let queue = filled(&["a", "b"]).await;
        assert_eq!(queue.pop_front().await.unwrap().title(), "a");
        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.pop_front().await.unwrap().title(), "b");
        assert_eq!(queue.len().await, 1);
        assert!(queue.pop_front().await.is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn peek_front_prefers_playing_track() {
        let queue = filled(&["a", "b"]).await;
        assert_eq!(queue.peek_front().await.unwrap().title(), "a");
        queue.pop_front().await;
        assert_eq!(queue.peek_front().await.unwrap().title(), "a");
        queue.finish_current().await;
        assert_eq!(queue.peek_front().await.unwrap().title(), "b");
    }

    #[tokio::test]
    async fn clear_refuses_stale_appends() {
        let queue = PlaybackQueue::new();
        let epoch = queue.epoch().await;
        queue.append_for(epoch, record("a")).await.unwrap();

        let dropped = queue.clear().await;
        assert_eq!(dropped.len(), 1);

        let refused = queue.append_for(epoch, record("late")).await.unwrap_err();
        assert_eq!(refused.title(), "late");
        assert!(queue.is_empty().await);

        let fresh = queue.epoch().await;
        queue.append_for(fresh, record("b")).await.unwrap();
        assert_eq!(titles(&queue).await, vec!["b"]);
    }

    #[tokio::test]
    async fn length_tracks_random_edit_sequences() {
        let mut rng = StdRng::seed_from_u64(7);
        let queue = PlaybackQueue::new();
        let mut model: Vec<String> = Vec::new();
        let mut next = 0usize;

        for _ in 0..500 {
            match rng.gen_range(0..4) {
                0 | 1 => {
                    let name = format!("t{next}");
                    next += 1;
                    queue.append(record(&name)).await;
                    model.push(name);
                }
                2 => {
                    let start = rng.gen_range(0..model.len() + 2);
                    let end = rng.gen_range(0..model.len() + 2);
                    let result = queue.remove_range(start, end).await;
                    if start >= 1 && end >= start && end <= model.len() {
                        assert_eq!(result.unwrap().count(), end - start + 1);
                        model.drain(start - 1..end);
                    } else {
                        assert!(result.is_err());
                    }
                }
                _ => {
                    let n = rng.gen_range(0..4);
                    let result = queue.remove_count_from_front(n).await;
                    if n == 0 || model.is_empty() {
                        assert!(result.is_err());
                    } else {
                        model.drain(..n.min(model.len()));
                    }
                }
            }
            assert_eq!(queue.len().await, model.len());
        }
        assert_eq!(titles(&queue).await, model);
    }
}
