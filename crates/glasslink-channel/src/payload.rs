//! Buffers the chunked sender can slice.

use bytes::{Bytes, BytesMut};
use glasslink_frame::text;

/// A pending-data buffer: measurable, splittable from the front, appendable.
pub trait SendBuffer: Send + Sized + 'static {
    /// Length in slicing units (bytes, or characters for text).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the first `at` units.
    fn split_to(&mut self, at: usize) -> Self;

    /// Append `other` after the current contents.
    fn append(&mut self, other: Self);

    /// Bytes written to the characteristic.
    fn into_wire(self) -> Bytes;
}

impl SendBuffer for BytesMut {
    fn len(&self) -> usize {
        BytesMut::len(self)
    }

    fn split_to(&mut self, at: usize) -> Self {
        BytesMut::split_to(self, at.min(BytesMut::len(self)))
    }

    fn append(&mut self, other: Self) {
        self.unsplit(other);
    }

    fn into_wire(self) -> Bytes {
        self.freeze()
    }
}

/// Text is sliced by characters and projected to single bytes on write.
impl SendBuffer for String {
    fn len(&self) -> usize {
        self.chars().count()
    }

    fn split_to(&mut self, at: usize) -> Self {
        let index = self
            .char_indices()
            .nth(at)
            .map_or(String::len(self), |(i, _)| i);
        let rest = self.split_off(index);
        std::mem::replace(self, rest)
    }

    fn append(&mut self, other: Self) {
        self.push_str(&other);
    }

    fn into_wire(self) -> Bytes {
        Bytes::from(text::to_latin1(&self))
    }
}
