//! In-memory transport that records every write.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::trace;
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::gatt::CharacteristicRef;
use crate::traits::{BleTransport, NotificationStream, WriteKind};

/// A write captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub characteristic: CharacteristicRef,
    pub data: Bytes,
    pub kind: WriteKind,
}

/// Transport that keeps writes in memory instead of sending them.
///
/// Writes can be throttled (each write waits for a permit released with
/// [`RecordingTransport::release`]) and individual writes can be made to
/// fail. Notifications are injected with [`RecordingTransport::notify`].
#[derive(Default)]
pub struct RecordingTransport {
    writes: Mutex<Vec<RecordedWrite>>,
    written: Notify,
    throttle: Option<Arc<Semaphore>>,
    fail_at: Mutex<Option<usize>>,
    subscribers: Mutex<HashMap<Uuid, Vec<mpsc::UnboundedSender<Bytes>>>>,
    mtu_limit: Option<u16>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each write first waits for a permit; `permits` are available up front.
    pub fn with_throttle(permits: usize) -> Self {
        Self {
            throttle: Some(Arc::new(Semaphore::new(permits))),
            ..Self::default()
        }
    }

    /// Accept MTU requests up to `limit`.
    pub fn with_mtu_limit(mut self, limit: u16) -> Self {
        self.mtu_limit = Some(limit);
        self
    }

    /// Let `n` more throttled writes through.
    pub fn release(&self, n: usize) {
        if let Some(throttle) = &self.throttle {
            throttle.add_permits(n);
        }
    }

    /// Make the write with this zero-based index fail, once.
    pub fn fail_write(&self, index: usize) {
        *lock(&self.fail_at) = Some(index);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    /// All written bytes, concatenated in write order.
    pub fn written_bytes(&self) -> Vec<u8> {
        lock(&self.writes)
            .iter()
            .flat_map(|w| w.data.iter().copied())
            .collect()
    }

    /// Wait until at least `n` writes have completed.
    pub async fn wait_for_writes(&self, n: usize) {
        loop {
            let notified = self.written.notified();
            if self.write_count() >= n {
                return;
            }
            notified.await;
        }
    }

    /// Deliver a notification to every subscriber of `characteristic`.
    pub fn notify(&self, characteristic: Uuid, value: impl Into<Bytes>) {
        let value = value.into();
        if let Some(subscribers) = lock(&self.subscribers).get_mut(&characteristic) {
            subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        }
    }
}

#[async_trait]
impl BleTransport for RecordingTransport {
    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<()> {
        if let Some(throttle) = &self.throttle {
            let permit = throttle
                .acquire()
                .await
                .map_err(|_| TransportError::NotConnected)?;
            permit.forget();
        }

        let mut writes = lock(&self.writes);
        let mut fail_at = lock(&self.fail_at);
        if *fail_at == Some(writes.len()) {
            *fail_at = None;
            return Err(TransportError::WriteRejected {
                characteristic: characteristic.characteristic,
                reason: "injected failure".to_string(),
            });
        }
        drop(fail_at);
        trace!(len = data.len(), ?kind, "recorded write");
        writes.push(RecordedWrite {
            characteristic: *characteristic,
            data: Bytes::copy_from_slice(data),
            kind,
        });
        drop(writes);
        self.written.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<NotificationStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.subscribers)
            .entry(characteristic.characteristic)
            .or_default()
            .push(tx);
        Ok(Box::pin(Notifications(rx)))
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        match self.mtu_limit {
            Some(limit) => Ok(mtu.min(limit)),
            None => Err(TransportError::Unsupported("mtu negotiation")),
        }
    }
}

struct Notifications(mpsc::UnboundedReceiver<Bytes>);

impl Stream for Notifications {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().0.poll_recv(cx)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use super::*;
    use crate::gatt::TX_UUID;

    #[tokio::test]
    async fn test_records_writes_in_order() {
        let transport = RecordingTransport::new();
        let rx = CharacteristicRef::rx();
        transport.write(&rx, b"ab", WriteKind::WithResponse).await.unwrap();
        transport.write(&rx, b"cd", WriteKind::WithoutResponse).await.unwrap();

        let writes = transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].kind, WriteKind::WithoutResponse);
        assert_eq!(transport.written_bytes(), b"abcd");
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let transport = RecordingTransport::new();
        transport.fail_write(1);
        let rx = CharacteristicRef::rx();
        transport.write(&rx, b"a", WriteKind::WithResponse).await.unwrap();
        let err = transport.write(&rx, b"b", WriteKind::WithResponse).await;
        assert!(matches!(err, Err(TransportError::WriteRejected { .. })));
        assert_eq!(transport.write_count(), 1);

        transport.write(&rx, b"c", WriteKind::WithResponse).await.unwrap();
        assert_eq!(transport.written_bytes(), b"ac");
    }

    #[tokio::test]
    async fn test_throttled_write_waits_for_release() {
        let transport = Arc::new(RecordingTransport::with_throttle(0));
        let writer = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .write(&CharacteristicRef::rx(), b"x", WriteKind::WithResponse)
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(transport.write_count(), 0);

        transport.release(1);
        transport.wait_for_writes(1).await;
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_notify_reaches_subscriber() {
        let transport = RecordingTransport::new();
        let mut stream = transport.subscribe(&CharacteristicRef::tx()).await.unwrap();
        transport.notify(TX_UUID, Bytes::from_static(&[0xFF, 0xAA]));

        let value = poll_fn(|cx| stream.as_mut().poll_next(cx)).await;
        assert_eq!(value.as_deref(), Some(&[0xFF, 0xAA][..]));
    }

    #[tokio::test]
    async fn test_mtu_limit() {
        let transport = RecordingTransport::new().with_mtu_limit(185);
        assert_eq!(transport.request_mtu(512).await.unwrap(), 185);
        let unsupported = RecordingTransport::new().request_mtu(512).await;
        assert!(matches!(unsupported, Err(TransportError::Unsupported(_))));
    }
}
