//! MTU-bounded, flow-controlled writer.
//!
//! [`ChunkedSender`] owns a pending buffer and a drive task. Each round the
//! task takes up to `slice_size` units off the buffer and writes them in
//! pieces of at most `mtu` units, pausing `write_timeout` after every
//! write and again between slices. Before each write it checks the flow
//! control gate and the connection; a closed gate parks the task until
//! [`ChunkedSender::set_can_send`] reopens it. A write that has been
//! issued always runs to completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use glasslink_transport::{BleTransport, CharacteristicRef, WriteKind};
use tracing::{debug, trace, warn};

use crate::config::SenderConfig;
use crate::error::{ChannelError, Result};
use crate::payload::SendBuffer;
use crate::progress::{Dispatch, ProgressCallback, ProgressListener, ProgressUpdate};
use crate::sync::lock;

/// Notification from the drive task to the sender's owner.
#[derive(Debug, Clone)]
pub enum SenderEvent {
    /// The buffer drained with the gate open.
    Finished,
    /// A write failed; pending data and listeners were dropped.
    Failed(ChannelError),
}

/// Receives [`SenderEvent`]s. Called without any sender lock held.
pub type SenderHook = Arc<dyn Fn(SenderEvent) + Send + Sync>;

/// Writes buffered data to one characteristic in MTU-sized pieces.
pub struct ChunkedSender<B: SendBuffer> {
    shared: Arc<Shared<B>>,
}

impl<B: SendBuffer> Clone for ChunkedSender<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<B> {
    transport: Arc<dyn BleTransport>,
    characteristic: CharacteristicRef,
    state: Mutex<State<B>>,
    hook: Mutex<Option<SenderHook>>,
}

struct State<B> {
    config: SenderConfig,
    pending: Option<B>,
    /// Units of the current top-level slice not yet written.
    slice_left: usize,
    driving: bool,
    gate_open: bool,
    connected: bool,
    /// Stream offsets: units ever buffered, units handed to the transport.
    enqueued: u64,
    sent: u64,
    listeners: Vec<ProgressListener>,
}

impl<B> State<B> {
    fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn report_progress(&mut self) -> Dispatch {
        let mut dispatch = Dispatch::default();
        let sent = self.sent;
        self.listeners.retain(|listener| {
            let update = listener.update(sent);
            let done = update.is_terminal();
            dispatch.push(listener.callback.clone(), update);
            !done
        });
        dispatch
    }

    fn finish(&mut self) -> Dispatch {
        self.driving = false;
        self.slice_left = 0;
        let mut dispatch = Dispatch::default();
        for listener in self.listeners.drain(..) {
            let total = listener.total();
            dispatch.push(listener.callback, ProgressUpdate::Finished { total });
        }
        dispatch
    }

    fn clear(&mut self, err: &ChannelError) -> Dispatch {
        self.pending = None;
        self.slice_left = 0;
        self.enqueued = self.sent;
        let mut dispatch = Dispatch::default();
        for listener in self.listeners.drain(..) {
            dispatch.push(listener.callback, ProgressUpdate::Failed(err.clone()));
        }
        dispatch
    }
}

/// One sub-slice taken off the buffer.
struct Piece {
    data: bytes::Bytes,
    kind: WriteKind,
    pause: Duration,
    /// Another slice follows this one.
    slice_boundary: bool,
}

enum Step {
    Write(Piece),
    Finished(Dispatch),
    Park,
}

impl<B: SendBuffer> ChunkedSender<B> {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        characteristic: CharacteristicRef,
        config: SenderConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                characteristic,
                state: Mutex::new(State {
                    config,
                    pending: None,
                    slice_left: 0,
                    driving: false,
                    gate_open: true,
                    connected: true,
                    enqueued: 0,
                    sent: 0,
                    listeners: Vec::new(),
                }),
                hook: Mutex::new(None),
            }),
        }
    }

    /// Install the owner's event hook, replacing any previous one.
    pub fn set_hook(&self, hook: SenderHook) {
        *lock(&self.shared.hook) = Some(hook);
    }

    /// Append `data` to the pending buffer and start writing if idle.
    ///
    /// A `progress` listener covers everything still pending plus `data`.
    /// Data sent while the gate is closed waits for it to reopen.
    pub fn send(&self, data: B, progress: Option<ProgressCallback>) -> Result<()> {
        let mut st = lock(&self.shared.state);
        if !st.connected {
            return Err(ChannelError::NotConnected);
        }
        let len = data.len() as u64;
        match st.pending.as_mut() {
            Some(pending) => pending.append(data),
            None => st.pending = Some(data),
        }
        st.enqueued += len;
        if let Some(callback) = progress {
            let listener = ProgressListener {
                start: st.sent,
                end: st.enqueued,
                callback,
            };
            st.listeners.push(listener);
        }

        let start = !st.driving && st.gate_open;
        if start {
            st.driving = true;
        }
        trace!(len, pending = st.enqueued - st.sent, start, "data buffered");
        drop(st);

        if start {
            self.spawn_drive();
        }
        Ok(())
    }

    fn spawn_drive(&self) {
        let shared = self.shared.clone();
        tokio::spawn(shared.drive());
    }

    /// Open or close the flow control gate.
    ///
    /// Reopening resumes a parked buffer, or reports `Finished` when
    /// nothing is pending so the owner can dispatch queued work.
    pub fn set_can_send(&self, open: bool) {
        let mut st = lock(&self.shared.state);
        if st.gate_open == open {
            return;
        }
        st.gate_open = open;
        debug!(open, "flow control gate changed");
        if !open || st.driving || !st.connected {
            return;
        }
        if st.has_pending() {
            st.driving = true;
            drop(st);
            self.spawn_drive();
        } else {
            drop(st);
            self.shared.emit(SenderEvent::Finished);
        }
    }

    pub fn can_send(&self) -> bool {
        lock(&self.shared.state).gate_open
    }

    /// A write is in flight or data is waiting.
    pub fn is_busy(&self) -> bool {
        let st = lock(&self.shared.state);
        st.driving || st.has_pending()
    }

    /// Units buffered but not yet handed to the transport.
    pub fn pending_len(&self) -> usize {
        let st = lock(&self.shared.state);
        (st.enqueued - st.sent) as usize
    }

    /// Drop pending data and fail every listener with `Cancelled`.
    ///
    /// A write already in flight completes.
    pub fn cancel(&self) {
        self.abort(ChannelError::Cancelled, true);
    }

    /// Stop for good: drop pending data and fail every listener with `Disconnected`.
    pub fn disconnect(&self) {
        self.abort(ChannelError::Disconnected, false);
    }

    /// [`cancel`](Self::cancel) without running the listeners; the caller
    /// runs the returned failures once its own locks are released.
    pub(crate) fn cancel_deferred(&self) -> Dispatch {
        self.drop_pending(ChannelError::Cancelled, true)
    }

    fn abort(&self, err: ChannelError, stay_connected: bool) {
        self.drop_pending(err, stay_connected).run();
    }

    fn drop_pending(&self, err: ChannelError, stay_connected: bool) -> Dispatch {
        let mut st = lock(&self.shared.state);
        st.connected &= stay_connected;
        if st.has_pending() || !st.listeners.is_empty() {
            debug!(%err, pending = st.enqueued - st.sent, "dropping pending data");
        }
        st.clear(&err)
    }

    /// Set the write size. Also resets the slice size to the new MTU.
    pub fn set_mtu(&self, mtu: usize) {
        let mut st = lock(&self.shared.state);
        st.config.mtu = mtu.max(1);
        st.config.slice_size = None;
        debug!(mtu = st.config.mtu, "mtu updated");
    }

    pub fn mtu(&self) -> usize {
        lock(&self.shared.state).config.mtu
    }

    pub fn set_slice_size(&self, slice_size: usize) {
        lock(&self.shared.state).config.slice_size = Some(slice_size.max(1));
    }

    pub fn set_write_timeout(&self, write_timeout: Duration) {
        lock(&self.shared.state).config.write_timeout = write_timeout;
    }

    pub fn set_send_with_response(&self, with_response: bool) {
        lock(&self.shared.state).config.send_with_response = with_response;
    }
}

impl<B: SendBuffer> Shared<B> {
    fn emit(&self, event: SenderEvent) {
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(event);
        }
    }

    fn next_step(&self) -> Step {
        let mut st = lock(&self.state);
        if !st.connected || !st.gate_open {
            st.driving = false;
            return Step::Park;
        }
        let Some(mut pending) = st.pending.take().filter(|p| !p.is_empty()) else {
            return Step::Finished(st.finish());
        };

        if st.slice_left == 0 {
            st.slice_left = st.config.slice_size().min(pending.len());
        }
        let n = st.config.mtu.max(1).min(st.slice_left);
        let data = pending.split_to(n);
        let more = !pending.is_empty();
        if more {
            st.pending = Some(pending);
        }
        st.slice_left -= n;
        st.sent += n as u64;

        Step::Write(Piece {
            data: data.into_wire(),
            kind: WriteKind::from_with_response(st.config.send_with_response),
            pause: st.config.write_timeout,
            slice_boundary: st.slice_left == 0 && more,
        })
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let piece = match self.next_step() {
                Step::Write(piece) => piece,
                Step::Finished(dispatch) => {
                    trace!("buffer drained");
                    dispatch.run();
                    self.emit(SenderEvent::Finished);
                    return;
                }
                Step::Park => {
                    debug!("drive loop parked");
                    return;
                }
            };

            trace!(len = piece.data.len(), kind = ?piece.kind, "writing sub-slice");
            if let Err(err) = self
                .transport
                .write(&self.characteristic, &piece.data, piece.kind)
                .await
            {
                warn!(%err, "write failed, dropping pending data");
                let err = ChannelError::from(err);
                let dispatch = {
                    let mut st = lock(&self.state);
                    st.driving = false;
                    st.clear(&err)
                };
                dispatch.run();
                self.emit(SenderEvent::Failed(err));
                return;
            }

            let dispatch = lock(&self.state).report_progress();
            dispatch.run();

            if !piece.pause.is_zero() {
                tokio::time::sleep(piece.pause).await;
                if piece.slice_boundary {
                    tokio::time::sleep(piece.pause).await;
                }
            }
        }
    }
}
