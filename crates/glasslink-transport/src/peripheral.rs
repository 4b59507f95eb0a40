//! [`BleTransport`] over a connected `btleplug` peripheral.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::Peripheral;
use bytes::Bytes;
use futures_core::Stream;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, TransportError};
use crate::gatt::CharacteristicRef;
use crate::traits::{BleTransport, NotificationStream, WriteKind};

/// A connected peripheral whose services have been discovered.
pub struct BtleplugTransport {
    peripheral: Peripheral,
}

impl BtleplugTransport {
    pub fn new(peripheral: Peripheral) -> Self {
        Self { peripheral }
    }

    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn find(&self, characteristic: &CharacteristicRef) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == characteristic.characteristic
                    && c.service_uuid == characteristic.service
            })
            .ok_or(TransportError::CharacteristicNotFound(
                characteristic.characteristic,
            ))
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        kind: WriteKind,
    ) -> Result<()> {
        let target = self.find(characteristic)?;
        let write_type = match kind {
            WriteKind::WithResponse => WriteType::WithResponse,
            WriteKind::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(&target, data, write_type)
            .await
            .map_err(backend)
    }

    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<NotificationStream> {
        let target = self.find(characteristic)?;
        self.peripheral.subscribe(&target).await.map_err(backend)?;
        let inner = self.peripheral.notifications().await.map_err(backend)?;
        debug!(uuid = %target.uuid, "subscribed to notifications");
        Ok(Box::pin(FilteredNotifications {
            inner,
            uuid: target.uuid,
        }))
    }
}

struct FilteredNotifications {
    inner: Pin<Box<dyn Stream<Item = ValueNotification> + Send>>,
    uuid: Uuid,
}

impl Stream for FilteredNotifications {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        loop {
            match ready!(self.inner.as_mut().poll_next(cx)) {
                Some(notification) if notification.uuid == self.uuid => {
                    return Poll::Ready(Some(Bytes::from(notification.value)));
                }
                Some(_) => continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

fn backend(err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::NotConnected => TransportError::NotConnected,
        other => TransportError::Backend(Box::new(other)),
    }
}
