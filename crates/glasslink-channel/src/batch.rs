//! Sending several frames as one operation.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use glasslink_frame::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::CommandChannel;
use crate::error::{ChannelError, Result};
use crate::progress::{progress_fn, ProgressCallback, ProgressUpdate};
use crate::sync::lock;

impl CommandChannel {
    /// Encode `commands` and queue them as a single write.
    ///
    /// One progress listener covers the concatenated frames.
    pub fn send_commands(
        &self,
        commands: &[Command],
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let mut frames = BytesMut::new();
        for command in commands {
            frames.extend_from_slice(&command.encode(None)?);
        }
        debug!(commands = commands.len(), len = frames.len(), "sending batch");
        self.enqueue_frame(frames.freeze(), progress)?;
        Ok(())
    }

    /// Replay pre-built frames one after another.
    ///
    /// Progress is reported across the whole batch. Cancelling `cancel`
    /// abandons the batch's current frame, whether it is being written or
    /// still queued, and returns `Cancelled`. Other callers' commands are
    /// not affected.
    pub async fn send_raw_commands(
        &self,
        frames: Vec<Bytes>,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let total: usize = frames.iter().map(Bytes::len).sum();
        let mut base = 0;
        debug!(frames = frames.len(), total, "replaying frames");

        for frame in frames {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            let len = frame.len();
            let (done_tx, done_rx) = oneshot::channel();
            let done = Arc::new(Mutex::new(Some(done_tx)));
            let user = on_progress.clone();
            let progress = progress_fn(move |update| {
                let outcome = match update {
                    ProgressUpdate::Sending { sent, .. } => {
                        if let Some(user) = &user {
                            user(ProgressUpdate::Sending {
                                sent: base + sent,
                                total,
                            });
                        }
                        return;
                    }
                    ProgressUpdate::Finished { .. } => Ok(()),
                    ProgressUpdate::Failed(err) => Err(err),
                };
                if let Some(tx) = lock(&done).take() {
                    let _ = tx.send(outcome);
                }
            });

            let seq = self.enqueue_frame(Command::Raw(frame).encode(None)?, Some(progress))?;

            let outcome = tokio::select! {
                outcome = done_rx => outcome.unwrap_or(Err(ChannelError::Closed)),
                _ = cancel.cancelled() => {
                    debug!(sent = base, total, "batch cancelled");
                    self.cancel_command(seq);
                    Err(ChannelError::Cancelled)
                }
            };
            if let Err(err) = outcome {
                if let Some(user) = &on_progress {
                    user(ProgressUpdate::Failed(err.clone()));
                }
                return Err(err);
            }

            base += len;
            if base < total {
                if let Some(user) = &on_progress {
                    user(ProgressUpdate::Sending { sent: base, total });
                }
            }
        }

        if let Some(user) = &on_progress {
            user(ProgressUpdate::Finished { total });
        }
        Ok(())
    }
}
