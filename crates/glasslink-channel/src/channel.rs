use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use glasslink_frame::{Command, CorrelationId, Message, ParseError, ParseProgress};
use glasslink_transport::{
    BleTransport, CharacteristicRef, FlowControlSignal, NotificationStream,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ChannelConfig;
use crate::correlation::PendingReplies;
use crate::error::{ChannelError, Result};
use crate::inbound::{self, Inbound};
use crate::progress::{progress_fn, ProgressCallback, ProgressUpdate};
use crate::sender::{ChunkedSender, SenderEvent};
use crate::sync::lock;

/// Something that happened on the channel.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A complete frame arrived. Correlated waiters have already been resolved.
    Message(Message),
    /// Progress of the command being written.
    SendProgress(ProgressUpdate),
    /// Progress of a response still being received.
    ReceiveProgress(ParseProgress),
    /// The sender drained its buffer.
    FinishedSending,
    /// Malformed inbound data.
    ParseError(ParseError),
    Disconnected,
}

/// Per-command options for [`CommandChannel::send_command`].
#[derive(Default, Clone)]
pub struct SendOptions {
    /// Tag the frame and wait for the response carrying this id.
    pub correlation_id: Option<CorrelationId>,
    /// Reply timeout; falls back to [`ChannelConfig::reply_timeout`].
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressCallback>,
}

impl SendOptions {
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Wait for a response under a freshly generated correlation id.
    pub fn expect_reply(self) -> Self {
        self.with_correlation_id(CorrelationId::next())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Position of a command in submission order, unique per channel.
pub(crate) type CommandSeq = u64;

pub(crate) struct PendingCommand {
    pub(crate) frame: Bytes,
    pub(crate) correlation_id: Option<CorrelationId>,
    pub(crate) progress: Option<ProgressCallback>,
    /// Assigned on enqueue.
    pub(crate) seq: CommandSeq,
}

impl PendingCommand {
    pub(crate) fn new(
        frame: Bytes,
        correlation_id: Option<CorrelationId>,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            frame,
            correlation_id,
            progress,
            seq: 0,
        }
    }

    fn fail(self, err: &ChannelError, replies: &PendingReplies) {
        if let Some(progress) = self.progress {
            progress(ProgressUpdate::Failed(err.clone()));
        }
        if let Some(id) = self.correlation_id {
            replies.reject(id, err);
        }
    }
}

#[derive(Default)]
struct Queue {
    sending_command: bool,
    active: Option<CorrelationId>,
    active_seq: Option<CommandSeq>,
    next_seq: CommandSeq,
    pending: VecDeque<PendingCommand>,
}

impl Queue {
    fn clear_active(&mut self) -> Option<CorrelationId> {
        self.active_seq = None;
        self.active.take()
    }
}

/// Command channel to one connected pair of glasses.
///
/// Commands go out one at a time in submission order; a command submitted
/// while another is being written, or while flow control holds the gate
/// closed, waits in a FIFO queue. Cheap to clone.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn BleTransport>,
    sender: ChunkedSender<BytesMut>,
    queue: Mutex<Queue>,
    replies: Arc<PendingReplies>,
    inbound: mpsc::UnboundedSender<Inbound>,
    events: broadcast::Sender<ChannelEvent>,
    connected: AtomicBool,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    config: ChannelConfig,
}

impl CommandChannel {
    /// Create a channel writing to the glasses' RX characteristic.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(transport: Arc<dyn BleTransport>, config: ChannelConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let replies = Arc::new(PendingReplies::new());
        let inbound = inbound::spawn(replies.clone(), events.clone());

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let sender = ChunkedSender::new(
                transport.clone(),
                CharacteristicRef::rx(),
                config.sender.clone(),
            );
            let weak = weak.clone();
            sender.set_hook(Arc::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_sender_event(event);
                }
            }));
            Inner {
                transport,
                sender,
                queue: Mutex::new(Queue::default()),
                replies,
                inbound,
                events,
                connected: AtomicBool::new(true),
                pumps: Mutex::new(Vec::new()),
                config,
            }
        });
        Self { inner }
    }

    /// Subscribe to TX notifications, and flow control when configured,
    /// feeding them into the channel until disconnect.
    pub async fn attach(&self) -> Result<()> {
        let transport = &self.inner.transport;
        let notifications = transport.subscribe(&CharacteristicRef::tx()).await?;
        let mut pumps = vec![self.pump(notifications, |inner, value| inner.feed(value))];

        if self.inner.config.flow_control {
            let flow = transport
                .subscribe(&CharacteristicRef::flow_control())
                .await?;
            pumps.push(self.pump(flow, |inner, value| {
                inner.on_flow_control(&value);
            }));
        }
        debug!(pumps = pumps.len(), "attached to notifications");
        lock(&self.inner.pumps).extend(pumps);
        Ok(())
    }

    fn pump(&self, mut stream: NotificationStream, on_value: fn(&Inner, Bytes)) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(value) = poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                on_value(&inner, value);
            }
        })
    }

    /// Send a command.
    ///
    /// Without a correlation id this returns `Ok(None)` once the command is
    /// queued. With one, it waits for the matching response or the timeout.
    pub async fn send_command(
        &self,
        command: &Command,
        options: SendOptions,
    ) -> Result<Option<Message>> {
        let SendOptions {
            correlation_id,
            timeout,
            progress,
        } = options;
        let frame = command.encode(correlation_id)?;

        let Some(id) = correlation_id else {
            self.inner.enqueue(PendingCommand::new(frame, None, progress))?;
            return Ok(None);
        };

        let waiter = self.inner.replies.register(id);
        self.inner.enqueue(PendingCommand::new(frame, Some(id), progress))?;
        let timeout = timeout.or(self.inner.config.reply_timeout);
        waiter.wait(timeout).await.map(Some)
    }

    /// Queue a command without waiting for a response.
    pub fn send(&self, command: &Command) -> Result<()> {
        let frame = command.encode(None)?;
        self.inner.enqueue(PendingCommand::new(frame, None, None))?;
        Ok(())
    }

    /// Send a command under a fresh correlation id and wait for its response.
    pub async fn request(&self, command: &Command) -> Result<Message> {
        match self
            .send_command(command, SendOptions::default().expect_reply())
            .await?
        {
            Some(message) => Ok(message),
            None => Err(ChannelError::Closed),
        }
    }

    pub(crate) fn enqueue_frame(
        &self,
        frame: Bytes,
        progress: Option<ProgressCallback>,
    ) -> Result<CommandSeq> {
        self.inner.enqueue(PendingCommand::new(frame, None, progress))
    }

    /// Cancel one command without touching the others.
    ///
    /// A queued command is removed from the queue. The command being
    /// written has its remaining data dropped, and the next queued command
    /// goes out once the write in flight completes. Either way its listener
    /// fails with `Cancelled`. A command that already went out is left alone.
    pub(crate) fn cancel_command(&self, seq: CommandSeq) {
        let inner = &self.inner;
        let (dispatch, active, removed) = {
            let mut queue = lock(&inner.queue);
            if queue.active_seq == Some(seq) {
                let dispatch = inner.sender.cancel_deferred();
                queue.sending_command = inner.sender.is_busy();
                (Some(dispatch), queue.clear_active(), None)
            } else {
                let removed = queue
                    .pending
                    .iter()
                    .position(|command| command.seq == seq)
                    .and_then(|index| queue.pending.remove(index));
                (None, None, removed)
            }
        };
        debug!(
            seq,
            active = dispatch.is_some(),
            queued = removed.is_some(),
            "cancelling command"
        );
        let err = ChannelError::Cancelled;
        if let Some(dispatch) = dispatch {
            dispatch.run();
        }
        if let Some(id) = active {
            inner.replies.reject(id, &err);
        }
        if let Some(command) = removed {
            command.fail(&err, &inner.replies);
        }
    }

    /// Queue a notification chunk for parsing. Chunks are parsed in call order.
    pub fn feed(&self, chunk: impl Into<Bytes>) {
        self.inner.feed(chunk.into());
    }

    /// Open or close the flow control gate.
    pub fn set_can_send(&self, open: bool) {
        self.inner.sender.set_can_send(open);
    }

    /// Apply a value notified on the flow control characteristic.
    pub fn on_flow_control(&self, value: &[u8]) -> Option<FlowControlSignal> {
        self.inner.on_flow_control(value)
    }

    pub fn can_send(&self) -> bool {
        self.inner.sender.can_send()
    }

    /// Ask the peripheral for a larger MTU and write in pieces of the
    /// negotiated size.
    pub async fn negotiate_mtu(&self, requested: u16) -> Result<u16> {
        let mtu = self.inner.transport.request_mtu(requested).await?;
        self.inner.sender.set_mtu(usize::from(mtu));
        Ok(mtu)
    }

    /// Abandon the command being written and everything queued behind it.
    ///
    /// A write already in flight completes; its listener and queued
    /// commands fail with `Cancelled`.
    pub fn cancel(&self) {
        let inner = &self.inner;
        inner.sender.cancel();
        let (active, drained) = {
            let mut queue = lock(&inner.queue);
            queue.sending_command = inner.sender.is_busy();
            let drained: Vec<_> = queue.pending.drain(..).collect();
            (queue.clear_active(), drained)
        };
        debug!(queued = drained.len(), "cancelling sends");
        let err = ChannelError::Cancelled;
        if let Some(id) = active {
            inner.replies.reject(id, &err);
        }
        for command in drained {
            command.fail(&err, &inner.replies);
        }
    }

    /// Tear the channel down after the peripheral disconnected.
    ///
    /// Drops pending data, fails every listener, queued command and waiting
    /// request with `Disconnected`, and resets the parser.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        if !inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("channel disconnected");
        for pump in lock(&inner.pumps).drain(..) {
            pump.abort();
        }
        inner.sender.disconnect();
        let drained: Vec<_> = {
            let mut queue = lock(&inner.queue);
            queue.sending_command = false;
            queue.clear_active();
            queue.pending.drain(..).collect()
        };
        let err = ChannelError::Disconnected;
        for command in drained {
            command.fail(&err, &inner.replies);
        }
        inner.replies.reject_all(&err);
        let _ = inner.inbound.send(Inbound::Reset);
        let _ = inner.events.send(ChannelEvent::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Commands waiting behind the one being written.
    pub fn queued_len(&self) -> usize {
        lock(&self.inner.queue).pending.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    pub fn sender(&self) -> &ChunkedSender<BytesMut> {
        &self.inner.sender
    }
}

impl Inner {
    fn enqueue(&self, mut command: PendingCommand) -> Result<CommandSeq> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::NotConnected);
        }
        let mut queue = lock(&self.queue);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        command.seq = seq;
        if queue.sending_command || self.sender.is_busy() || !self.sender.can_send() {
            queue.pending.push_back(command);
            trace!(seq, queued = queue.pending.len(), "command queued");
            return Ok(seq);
        }
        let rejected = self.dispatch(&mut queue, command);
        drop(queue);
        match rejected {
            Ok(()) => Ok(seq),
            Err(rejected) => Err(rejected.fail(&self.replies)),
        }
    }

    /// Hand `command` to the sender. A rejected command comes back so the
    /// caller can fail it once the queue lock is released.
    fn dispatch(
        &self,
        queue: &mut Queue,
        command: PendingCommand,
    ) -> std::result::Result<(), Rejected> {
        queue.sending_command = true;
        queue.active = command.correlation_id;
        queue.active_seq = Some(command.seq);

        let events = self.events.clone();
        let user = command.progress;
        let progress = progress_fn(move |update| {
            if let Some(user) = &user {
                user(update.clone());
            }
            let _ = events.send(ChannelEvent::SendProgress(update));
        });
        debug!(
            len = command.frame.len(),
            correlation_id = ?command.correlation_id,
            "sending command"
        );

        let frame = BytesMut::from(&command.frame[..]);
        if let Err(err) = self.sender.send(frame, Some(progress.clone())) {
            queue.sending_command = false;
            queue.clear_active();
            return Err(Rejected {
                command: PendingCommand {
                    progress: Some(progress),
                    ..command
                },
                err,
            });
        }
        Ok(())
    }

    fn on_sender_event(&self, event: SenderEvent) {
        match event {
            SenderEvent::Finished => {
                let _ = self.events.send(ChannelEvent::FinishedSending);
                let mut queue = lock(&self.queue);
                // A gate reopening can race the drive task's own Finished.
                if self.sender.is_busy() {
                    return;
                }
                queue.sending_command = false;
                queue.clear_active();
                if !self.sender.can_send() {
                    return;
                }
                let Some(next) = queue.pending.pop_front() else {
                    return;
                };
                let rejected = self.dispatch(&mut queue, next);
                drop(queue);
                if let Err(rejected) = rejected {
                    let err = rejected.fail(&self.replies);
                    warn!(%err, "queued command could not be sent");
                }
            }
            SenderEvent::Failed(err) => {
                let (active, drained) = {
                    let mut queue = lock(&self.queue);
                    queue.sending_command = false;
                    let drained: Vec<_> = queue.pending.drain(..).collect();
                    (queue.clear_active(), drained)
                };
                warn!(%err, queued = drained.len(), "send failed, clearing queue");
                if let Some(id) = active {
                    self.replies.reject(id, &err);
                }
                for command in drained {
                    command.fail(&err, &self.replies);
                }
            }
        }
    }

    fn feed(&self, chunk: Bytes) {
        if self.inbound.send(Inbound::Chunk(chunk)).is_err() {
            warn!("inbound task stopped, dropping chunk");
        }
    }

    fn on_flow_control(&self, value: &[u8]) -> Option<FlowControlSignal> {
        let signal = FlowControlSignal::parse(value)?;
        match signal.gate() {
            Some(open) => self.sender.set_can_send(open),
            None => warn!("peripheral reported a flow control error"),
        }
        Some(signal)
    }
}

/// A command the sender refused.
struct Rejected {
    command: PendingCommand,
    err: ChannelError,
}

impl Rejected {
    fn fail(self, replies: &PendingReplies) -> ChannelError {
        self.command.fail(&self.err, replies);
        self.err
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for pump in lock(&self.pumps).drain(..) {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use glasslink_frame::{encode_frame, CommandType, FreeSpace, ParseError, ResponseData};
    use glasslink_transport::{RecordingTransport, FLOW_CONTROL_UUID, TX_UUID};

    use super::*;
    use crate::config::SenderConfig;

    fn channel_with(transport: &Arc<RecordingTransport>, mtu: usize) -> CommandChannel {
        let config = ChannelConfig {
            sender: SenderConfig {
                mtu,
                ..SenderConfig::default()
            },
            ..ChannelConfig::default()
        };
        CommandChannel::new(transport.clone(), config)
    }

    fn channel(transport: &Arc<RecordingTransport>) -> CommandChannel {
        channel_with(transport, 20)
    }

    fn reply(command: CommandType, id: u64, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        encode_frame(command.into(), Some(CorrelationId(id)), payload, &mut buf).unwrap();
        buf.freeze()
    }

    fn text(x: u16, body: &str) -> Command {
        Command::Txt {
            x,
            y: 0,
            rotation: 4,
            font: 1,
            color: 15,
            text: body.to_string(),
        }
    }

    fn writes_for(frames: &[Bytes], mtu: usize) -> usize {
        frames.iter().map(|f| f.len().div_ceil(mtu)).sum()
    }

    fn recorder() -> (ProgressCallback, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (progress_fn(move |u| drop(tx.send(u))), rx)
    }

    async fn wait_queued(channel: &CommandChannel, n: usize) {
        while channel.queued_len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_commands_written_in_submission_order() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let commands = vec![
            text(1, "first line of text"),
            Command::Clear,
            text(2, "a much longer second line of text for the display"),
            Command::Power(true),
            Command::Rectf {
                x0: 0,
                y0: 0,
                x1: 303,
                y1: 255,
            },
        ];
        let frames: Vec<Bytes> = commands.iter().map(|c| c.encode(None).unwrap()).collect();

        for command in &commands {
            channel.send(command).unwrap();
        }
        transport.wait_for_writes(writes_for(&frames, 20)).await;

        assert_eq!(transport.written_bytes(), frames.concat());
        assert!(transport.writes().iter().all(|w| w.data.len() <= 20));
    }

    #[tokio::test]
    async fn test_gate_closed_queues_commands() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        channel.set_can_send(false);

        channel.send(&Command::Clear).unwrap();
        channel.send(&text(0, "queued")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.write_count(), 0);
        assert_eq!(channel.queued_len(), 2);

        channel.set_can_send(true);
        let frames = [
            Command::Clear.encode(None).unwrap(),
            text(0, "queued").encode(None).unwrap(),
        ];
        transport.wait_for_writes(writes_for(&frames, 20)).await;
        assert_eq!(transport.written_bytes(), frames.concat());
    }

    #[tokio::test]
    async fn test_flow_control_pause_and_resume() {
        let transport = Arc::new(RecordingTransport::with_throttle(2));
        let channel = channel_with(&transport, 4);
        let first = text(0, "paused halfway through this frame");
        let second = Command::Power(false);

        channel.send(&first).unwrap();
        transport.wait_for_writes(2).await;
        assert_eq!(channel.on_flow_control(&[0x02]), Some(FlowControlSignal::Off));
        channel.send(&second).unwrap();
        transport.release(1000);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let paused_at = transport.write_count();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.write_count(), paused_at);

        assert_eq!(channel.on_flow_control(&[0x01]), Some(FlowControlSignal::On));
        let frames = [first.encode(None).unwrap(), second.encode(None).unwrap()];
        transport.wait_for_writes(writes_for(&frames, 4)).await;
        assert_eq!(transport.written_bytes(), frames.concat());
    }

    #[tokio::test]
    async fn test_flow_control_error_leaves_gate() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        assert_eq!(channel.on_flow_control(&[0x03]), Some(FlowControlSignal::Error));
        assert!(channel.can_send());
        assert_eq!(channel.on_flow_control(&[0x09]), None);
    }

    #[tokio::test]
    async fn test_replies_matched_out_of_order() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);

        let spawn_request = |id: u64| {
            let channel = channel.clone();
            tokio::spawn(async move {
                let options = SendOptions::default().with_correlation_id(CorrelationId(id));
                channel.send_command(&Command::CfgFreeSpace, options).await
            })
        };
        let first = spawn_request(1);
        let second = spawn_request(2);
        transport.wait_for_writes(2).await;

        channel.feed(reply(CommandType::CfgFreeSpace, 2, &[0, 0, 0, 2, 0, 0, 0, 1]));
        channel.feed(reply(CommandType::CfgFreeSpace, 1, &[0, 0, 0, 9, 0, 0, 0, 8]));

        let first = first.await.unwrap().unwrap().unwrap();
        let second = second.await.unwrap().unwrap().unwrap();
        assert_eq!(first.correlation_id, Some(CorrelationId(1)));
        assert_eq!(
            first.data,
            Some(ResponseData::FreeSpace(FreeSpace {
                total_size: 9,
                free_space: 8,
            }))
        );
        assert_eq!(second.correlation_id, Some(CorrelationId(2)));
    }

    #[tokio::test]
    async fn test_fragmented_reply() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let request = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let options = SendOptions::default().with_correlation_id(CorrelationId(11));
                channel.send_command(&Command::Battery, options).await
            })
        };
        transport.wait_for_writes(1).await;

        let bytes = reply(CommandType::Battery, 11, &[64]);
        channel.feed(bytes.slice(..3));
        channel.feed(bytes.slice(3..9));
        channel.feed(bytes.slice(9..));

        let message = request.await.unwrap().unwrap().unwrap();
        assert_eq!(message.data, Some(ResponseData::Battery(64)));
    }

    #[tokio::test]
    async fn test_timeouts_are_independent() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let wait = |timeout: Duration| {
            let channel = channel.clone();
            tokio::spawn(async move {
                let options = SendOptions::default()
                    .with_correlation_id(CorrelationId(5))
                    .with_timeout(timeout);
                channel.send_command(&Command::Version, options).await
            })
        };
        let short = wait(Duration::from_millis(20));
        let long = wait(Duration::from_secs(10));

        let err = short.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));

        channel.feed(reply(CommandType::Version, 5, &[1, 2, 3, b'a']));
        let message = long.await.unwrap().unwrap().unwrap();
        assert_eq!(message.data, Some(ResponseData::Version("1.2.3a".into())));
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_immediately() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let result = channel
            .send_command(&Command::Clear, SendOptions::default())
            .await
            .unwrap();
        assert!(result.is_none());
        transport.wait_for_writes(1).await;
    }

    #[tokio::test]
    async fn test_write_failure_clears_queue() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_write(0);
        let channel = channel(&transport);
        channel.set_can_send(false);

        let request = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let options = SendOptions::default().with_correlation_id(CorrelationId(1));
                channel.send_command(&Command::Battery, options).await
            })
        };
        wait_queued(&channel, 1).await;
        let (progress, mut rx) = recorder();
        channel
            .send_command(&Command::Clear, SendOptions::default().with_progress(progress))
            .await
            .unwrap();

        channel.set_can_send(true);

        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressUpdate::Failed(ChannelError::Transport(_)))
        ));
        assert_eq!(channel.queued_len(), 0);

        // the channel keeps working after the failure
        channel.send(&Command::Clear).unwrap();
        transport.wait_for_writes(1).await;
    }

    #[tokio::test]
    async fn test_disconnect_fails_everything() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let mut events = channel.subscribe();
        channel.set_can_send(false);

        let request = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.request(&Command::Settings).await })
        };
        wait_queued(&channel, 1).await;
        let (progress, mut rx) = recorder();
        channel
            .send_command(&Command::Clear, SendOptions::default().with_progress(progress))
            .await
            .unwrap();

        channel.disconnect();

        assert!(matches!(
            request.await.unwrap(),
            Err(ChannelError::Disconnected)
        ));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressUpdate::Failed(ChannelError::Disconnected))
        ));
        assert!(matches!(
            channel.send(&Command::Clear),
            Err(ChannelError::NotConnected)
        ));
        assert!(!channel.is_connected());
        assert!(matches!(events.recv().await, Ok(ChannelEvent::Disconnected)));
        assert_eq!(transport.write_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_drops_queue() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        channel.set_can_send(false);
        let (progress, mut rx) = recorder();
        channel
            .send_command(&Command::Clear, SendOptions::default().with_progress(progress))
            .await
            .unwrap();
        channel.send(&Command::Power(true)).unwrap();

        channel.cancel();
        assert!(matches!(
            rx.recv().await,
            Some(ProgressUpdate::Failed(ChannelError::Cancelled))
        ));
        assert_eq!(channel.queued_len(), 0);

        channel.set_can_send(true);
        channel.send(&Command::Battery).unwrap();
        transport.wait_for_writes(1).await;
        assert_eq!(
            transport.written_bytes(),
            Command::Battery.encode(None).unwrap().to_vec()
        );
    }

    #[tokio::test]
    async fn test_rejected_command_callback_can_reenter() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        channel.sender().disconnect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let progress = {
            let channel = channel.clone();
            progress_fn(move |update| {
                let _ = tx.send((update, channel.queued_len()));
            })
        };
        let err = channel
            .send_command(&Command::Clear, SendOptions::default().with_progress(progress))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::NotConnected));
        assert!(matches!(
            rx.recv().await,
            Some((ProgressUpdate::Failed(ChannelError::NotConnected), 0))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_resets_parser() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let mut events = channel.subscribe();

        // header of a ten byte frame, cut short by the disconnect
        channel.feed(vec![0xFF, 0x05, 0x00, 0x0A]);
        channel.disconnect();
        channel.feed(vec![0xFF, 0x05, 0x00, 0x06, 0x3C, 0xAA]);

        loop {
            match events.recv().await {
                Ok(ChannelEvent::Message(message)) => {
                    assert_eq!(message.data, Some(ResponseData::Battery(60)));
                    assert_eq!(message.raw_payload.len(), 1);
                    break;
                }
                Ok(ChannelEvent::ParseError(err)) => panic!("unexpected parse error {err:?}"),
                Ok(_) => {}
                Err(err) => panic!("event stream ended: {err:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_attach_pumps_notifications() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        channel.attach().await.unwrap();

        let request = {
            let channel = channel.clone();
            tokio::spawn(async move {
                let options = SendOptions::default().with_correlation_id(CorrelationId(9));
                channel.send_command(&Command::Battery, options).await
            })
        };
        transport.wait_for_writes(1).await;
        transport.notify(TX_UUID, reply(CommandType::Battery, 9, &[42]));
        let message = request.await.unwrap().unwrap().unwrap();
        assert_eq!(message.data, Some(ResponseData::Battery(42)));

        transport.notify(FLOW_CONTROL_UUID, vec![0x02]);
        while channel.can_send() {
            tokio::task::yield_now().await;
        }
        transport.notify(FLOW_CONTROL_UUID, vec![0x01]);
        while !channel.can_send() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_negotiated_mtu_sizes_writes() {
        let transport = Arc::new(RecordingTransport::new().with_mtu_limit(64));
        let channel = channel(&transport);
        assert_eq!(channel.negotiate_mtu(247).await.unwrap(), 64);

        let command = text(0, &"x".repeat(100));
        let frame = command.encode(None).unwrap();
        channel.send(&command).unwrap();
        transport.wait_for_writes(writes_for(&[frame], 64)).await;
        assert_eq!(transport.writes()[0].data.len(), 64);
    }

    #[tokio::test]
    async fn test_events_for_messages_and_parse_errors() {
        let transport = Arc::new(RecordingTransport::new());
        let channel = channel(&transport);
        let mut events = channel.subscribe();

        channel.feed(vec![0xFF, 0x05, 0x00, 0x06, 0x50, 0x00]);
        channel.feed(vec![0xAA]);

        assert!(matches!(
            events.recv().await,
            Ok(ChannelEvent::ParseError(ParseError::UnexpectedFooter(0x00)))
        ));
        match events.recv().await {
            Ok(ChannelEvent::Message(message)) => {
                assert_eq!(message.data, Some(ResponseData::Battery(0x50)));
            }
            other => panic!("expected message, got {other:?}"),
        }
    }
}
