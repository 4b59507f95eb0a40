//! Pre-built upload files.
//!
//! Layouts, images and fonts are uploaded as pre-encoded frames stored as
//! hex text, one chunk per line. Blank lines and `#` comments are ignored.

use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use data_encoding::HEXLOWER_PERMISSIVE;

use crate::codec::{decode_frame, Frame};
use crate::error::{FrameError, Result};

/// Hex-encoded chunks ready to be sent verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadFile {
    chunks: Vec<Bytes>,
}

impl UploadFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut chunks = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bytes = HEXLOWER_PERMISSIVE
                .decode(line.as_bytes())
                .map_err(|e| FrameError::InvalidHex {
                    line: index + 1,
                    reason: e.to_string(),
                })?;
            chunks.push(Bytes::from(bytes));
        }
        Ok(Self { chunks })
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn into_chunks(self) -> Vec<Bytes> {
        self.chunks
    }

    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Decode every frame carried by the chunks, in order.
    ///
    /// Frames may span chunk boundaries; bytes left over after the last
    /// complete frame are an error.
    pub fn frames(&self) -> Result<Vec<Frame>> {
        let mut buf = BytesMut::with_capacity(self.total_len());
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        let mut frames = Vec::new();
        while let Some(frame) = decode_frame(&mut buf)? {
            frames.push(frame);
        }
        if !buf.is_empty() {
            return Err(FrameError::Truncated(buf.len()));
        }
        Ok(frames)
    }
}

impl FromStr for UploadFile {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
