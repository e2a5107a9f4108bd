//! User interaction channel.
//!
//! Outbound text goes to every connected client as `Status`.  Inbound free
//! text is first offered to whoever is waiting on a choice list.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, Mutex};
use tracing::debug;

use crate::BroadcastMessage;

/// Answer to a choice list.  Resolves to an error when the listener is
/// cancelled.
pub type Reply = oneshot::Receiver<String>;

#[async_trait]
pub trait Interaction: Send + Sync {
    async fn say(&self, text: String);

    /// Register for the next free-text reply.  Call before saying the prompt.
    async fn listen(&self) -> Reply;

    /// Drop every registered listener.
    async fn cancel_listeners(&self);
}

pub struct ChatChannel {
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    waiters: Mutex<VecDeque<oneshot::Sender<String>>>,
}

impl ChatChannel {
    pub fn new(broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self {
            broadcast_tx,
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Hand `text` to the oldest live waiter.  Returns whether one took it.
    pub async fn deliver(&self, text: &str) -> bool {
        let mut waiters = self.waiters.lock().await;
        while let Some(waiter) = waiters.pop_front() {
            // A closed waiter gave up on its choice list; try the next one.
            if waiter.send(text.to_string()).is_ok() {
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    pub async fn waiting(&self) -> usize {
        self.waiters.lock().await.len()
    }
}

#[async_trait]
impl Interaction for ChatChannel {
    async fn say(&self, text: String) {
        debug!("chat: {}", text);
        let _ = self.broadcast_tx.send(BroadcastMessage::Status(text));
    }

    async fn listen(&self) -> Reply {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.push_back(tx);
        rx
    }

    async fn cancel_listeners(&self) {
        let dropped = {
            let mut waiters = self.waiters.lock().await;
            std::mem::take(&mut *waiters)
        };
        if !dropped.is_empty() {
            debug!("chat: cancelled {} pending choice list(s)", dropped.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_without_waiter_is_not_taken() {
        let (tx, _rx) = broadcast::channel(8);
        let chat = ChatChannel::new(tx);
        assert!(!chat.deliver("]help").await);
    }

    #[tokio::test]
    async fn reply_reaches_listener_registered_before_it() {
        let (tx, _rx) = broadcast::channel(8);
        let chat = ChatChannel::new(tx);

        let reply = chat.listen().await;
        assert!(chat.deliver("2").await);
        assert_eq!(reply.await.unwrap(), "2");
        assert_eq!(chat.waiting().await, 0);
    }

    #[tokio::test]
    async fn abandoned_waiters_are_skipped() {
        let (tx, _rx) = broadcast::channel(8);
        let chat = ChatChannel::new(tx);
        drop(chat.listen().await);
        let live = chat.listen().await;

        assert!(chat.deliver("1").await);
        assert_eq!(live.await.unwrap(), "1");
        assert!(!chat.deliver("1").await);
    }

    #[tokio::test]
    async fn cancelled_listener_resolves_as_error() {
        let (tx, _rx) = broadcast::channel(8);
        let chat = ChatChannel::new(tx);
        let reply = chat.listen().await;

        chat.cancel_listeners().await;
        assert!(reply.await.is_err());
        assert!(!chat.deliver("1").await);
    }

    #[tokio::test]
    async fn say_broadcasts_status() {
        let (tx, mut rx) = broadcast::channel(8);
        let chat = ChatChannel::new(tx);
        chat.say("Now playing **x** by y".into()).await;
        match rx.recv().await.unwrap() {
            BroadcastMessage::Status(text) => assert_eq!(text, "Now playing **x** by y"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
