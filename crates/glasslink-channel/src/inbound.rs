//! Serialized processing of notification chunks.

use std::sync::Arc;

use bytes::Bytes;
use glasslink_frame::{FrameParser, ParseResult};
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::channel::ChannelEvent;
use crate::correlation::PendingReplies;

pub(crate) enum Inbound {
    Chunk(Bytes),
    Reset,
}

/// Start the task that owns the parser. Chunks are parsed strictly in the
/// order they were queued; the task ends when the returned sender is dropped.
pub(crate) fn spawn(
    replies: Arc<PendingReplies>,
    events: broadcast::Sender<ChannelEvent>,
) -> mpsc::UnboundedSender<Inbound> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut parser = FrameParser::new();
        while let Some(item) = rx.recv().await {
            match item {
                Inbound::Chunk(chunk) => {
                    trace!(len = chunk.len(), "notification chunk");
                    for result in parser.feed(&chunk) {
                        handle(result, &replies, &events);
                    }
                }
                Inbound::Reset => parser.reset(),
            }
        }
    });
    tx
}

fn handle(result: ParseResult, replies: &PendingReplies, events: &broadcast::Sender<ChannelEvent>) {
    if let Some(err) = result.error {
        let _ = events.send(ChannelEvent::ParseError(err));
    }
    match (result.message, result.progress) {
        (Some(message), _) => {
            replies.resolve(&message);
            let _ = events.send(ChannelEvent::Message(message));
        }
        (None, Some(progress)) => {
            let _ = events.send(ChannelEvent::ReceiveProgress(progress));
        }
        (None, None) => {}
    }
}
