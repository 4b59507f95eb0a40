//! Send progress reporting.

use std::sync::Arc;

use crate::error::ChannelError;

/// Progress of one send, as seen by its listener.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// `sent` of `total` bytes handed to the transport.
    Sending { sent: usize, total: usize },
    /// Everything was written.
    Finished { total: usize },
    /// The send was abandoned; nothing more will be reported.
    Failed(ChannelError),
}

impl ProgressUpdate {
    /// Completed fraction in `0.0..=1.0`; `None` for failures.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::Sending { total: 0, .. } | Self::Finished { .. } => Some(1.0),
            Self::Sending { sent, total } => Some(*sent as f64 / *total as f64),
            Self::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Sending { .. })
    }
}

/// Called with every update of a send. Runs on the sender's drive task and
/// must not block.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

pub fn progress_fn(f: impl Fn(ProgressUpdate) + Send + Sync + 'static) -> ProgressCallback {
    Arc::new(f)
}

/// A callback bound to a byte range `[start, end)` of the sender's stream.
pub(crate) struct ProgressListener {
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) callback: ProgressCallback,
}

impl ProgressListener {
    pub(crate) fn total(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Update for a stream position of `sent` bytes.
    pub(crate) fn update(&self, sent: u64) -> ProgressUpdate {
        if sent >= self.end {
            ProgressUpdate::Finished {
                total: self.total(),
            }
        } else {
            ProgressUpdate::Sending {
                sent: sent.saturating_sub(self.start) as usize,
                total: self.total(),
            }
        }
    }
}

/// Callbacks collected under a lock, run after it is released.
#[derive(Default)]
pub(crate) struct Dispatch(Vec<(ProgressCallback, ProgressUpdate)>);

impl Dispatch {
    pub(crate) fn push(&mut self, callback: ProgressCallback, update: ProgressUpdate) {
        self.0.push((callback, update));
    }

    pub(crate) fn run(self) {
        for (callback, update) in self.0 {
            callback(update);
        }
    }
}
