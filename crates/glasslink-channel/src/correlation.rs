//! Matching responses to waiting requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use glasslink_frame::{CorrelationId, Message};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::error::{ChannelError, Result};
use crate::sync::lock;

struct Waiter {
    key: u64,
    tx: oneshot::Sender<Result<Message>>,
}

/// Requests waiting for a response, keyed by correlation id.
///
/// Several waiters may share an id; a matching message resolves all of them.
#[derive(Default)]
pub struct PendingReplies {
    waiters: Mutex<HashMap<CorrelationId, Vec<Waiter>>>,
    next_key: AtomicU64,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for a response carrying `id`.
    pub fn register(self: &Arc<Self>, id: CorrelationId) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        lock(&self.waiters)
            .entry(id)
            .or_default()
            .push(Waiter { key, tx });
        trace!(%id, key, "waiting for response");
        ReplyWaiter {
            replies: self.clone(),
            id,
            key,
            rx,
        }
    }

    /// Hand `message` to every waiter registered for its correlation id.
    /// Returns how many were resolved.
    pub fn resolve(&self, message: &Message) -> usize {
        let Some(id) = message.correlation_id else {
            return 0;
        };
        let waiters = lock(&self.waiters).remove(&id).unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Ok(message.clone()));
        }
        if count > 0 {
            debug!(%id, count, "response matched");
        }
        count
    }

    /// Fail every waiter registered for `id`.
    pub fn reject(&self, id: CorrelationId, err: &ChannelError) {
        let waiters = lock(&self.waiters).remove(&id).unwrap_or_default();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(err.clone()));
        }
    }

    /// Fail every waiter.
    pub fn reject_all(&self, err: &ChannelError) {
        let all: Vec<_> = lock(&self.waiters).drain().collect();
        for waiter in all.into_iter().flat_map(|(_, waiters)| waiters) {
            let _ = waiter.tx.send(Err(err.clone()));
        }
    }

    /// Number of outstanding waiters.
    pub fn len(&self) -> usize {
        lock(&self.waiters).values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn forget(&self, id: CorrelationId, key: u64) {
        let mut waiters = lock(&self.waiters);
        if let Some(entry) = waiters.get_mut(&id) {
            entry.retain(|w| w.key != key);
            if entry.is_empty() {
                waiters.remove(&id);
            }
        }
    }
}

/// One outstanding wait. Dropping it removes the waiter.
pub struct ReplyWaiter {
    replies: Arc<PendingReplies>,
    id: CorrelationId,
    key: u64,
    rx: oneshot::Receiver<Result<Message>>,
}

impl ReplyWaiter {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Wait for the response, giving up after `timeout`.
    ///
    /// A timeout removes only this waiter; others on the same id keep waiting.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Message> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(id = %self.id, ?limit, "response timed out");
                    return Err(ChannelError::Timeout(limit));
                }
            },
            None => (&mut self.rx).await,
        };
        received.map_err(|_| ChannelError::Closed)?
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.replies.forget(self.id, self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use bytes::Bytes;

    use super::*;

    fn message(id: u64) -> Message {
        Message {
            command_id: 0x05,
            correlation_id: Some(CorrelationId(id)),
            data: None,
            raw_payload: Bytes::from_static(&[1]),
            received_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_resolve_matches_id() {
        let replies = Arc::new(PendingReplies::new());
        let a = replies.register(CorrelationId(1));
        let b = replies.register(CorrelationId(2));

        assert_eq!(replies.resolve(&message(2)), 1);
        assert_eq!(replies.resolve(&message(1)), 1);

        let a = a.wait(None).await.unwrap();
        let b = b.wait(None).await.unwrap();
        assert_eq!(a.correlation_id, Some(CorrelationId(1)));
        assert_eq!(b.correlation_id, Some(CorrelationId(2)));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_all_waiters_on_id_resolved() {
        let replies = Arc::new(PendingReplies::new());
        let first = replies.register(CorrelationId(7));
        let second = replies.register(CorrelationId(7));
        assert_eq!(replies.len(), 2);

        assert_eq!(replies.resolve(&message(7)), 2);
        assert!(first.wait(None).await.is_ok());
        assert!(second.wait(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_uncorrelated_message_ignored() {
        let replies = Arc::new(PendingReplies::new());
        let _waiter = replies.register(CorrelationId(1));
        let mut msg = message(1);
        msg.correlation_id = None;
        assert_eq!(replies.resolve(&msg), 0);
        assert_eq!(replies.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_removes_only_that_waiter() {
        let replies = Arc::new(PendingReplies::new());
        let short = replies.register(CorrelationId(3));
        let long = replies.register(CorrelationId(3));

        let err = short.wait(Some(Duration::from_millis(10))).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
        assert_eq!(replies.len(), 1);

        replies.resolve(&message(3));
        assert!(long.wait(Some(Duration::from_secs(5))).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_waiter_forgotten() {
        let replies = Arc::new(PendingReplies::new());
        drop(replies.register(CorrelationId(4)));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_reject_all() {
        let replies = Arc::new(PendingReplies::new());
        let a = replies.register(CorrelationId(1));
        let b = replies.register(CorrelationId(2));
        replies.reject_all(&ChannelError::Disconnected);

        assert!(matches!(a.wait(None).await, Err(ChannelError::Disconnected)));
        assert!(matches!(b.wait(None).await, Err(ChannelError::Disconnected)));
    }
}
