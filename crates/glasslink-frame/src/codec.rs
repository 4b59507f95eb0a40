use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::CommandType;
use crate::error::{FrameError, Result};

/// First byte of every frame.
pub const HEADER: u8 = 0xFF;

/// Last byte of every frame.
pub const FOOTER: u8 = 0xAA;

/// Header, command id, control flag and footer.
pub const FRAME_OVERHEAD: usize = 4;

/// Width of the correlation id written by the encoder.
pub const CORRELATION_ID_LEN: usize = 8;

/// Largest frame the 2-byte length field can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Largest frame described by the 1-byte length field.
pub const SHORT_FRAME_MAX: usize = u8::MAX as usize;

const LONG_LENGTH_FLAG: u8 = 0x10;

/// Identifier echoed back by the glasses in a response frame.
///
/// Written most-significant byte first. Any unique value works; [`CorrelationId::next`]
/// uses milliseconds since the epoch, bumped to stay strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u64);

static LAST_CORRELATION_ID: AtomicU64 = AtomicU64::new(0);

impl CorrelationId {
    /// A fresh id derived from the wall clock.
    pub fn next() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let previous = LAST_CORRELATION_ID
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        Self(now.max(previous + 1))
    }

    pub fn to_be_bytes(self) -> [u8; CORRELATION_ID_LEN] {
        self.0.to_be_bytes()
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw command id; may be outside [`CommandType`].
    pub command_id: u8,
    pub correlation_id: Option<CorrelationId>,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(command: CommandType, payload: impl Into<Bytes>) -> Self {
        Self {
            command_id: command.into(),
            correlation_id: None,
            payload: payload.into(),
        }
    }

    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::try_from(self.command_id).ok()
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        let id_len = if self.correlation_id.is_some() {
            CORRELATION_ID_LEN
        } else {
            0
        };
        frame_layout(id_len, self.payload.len()).0
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        encode_frame(self.command_id, self.correlation_id, &self.payload, dst)
    }
}

/// Width of the length field announced by a control flag.
pub fn length_width(flag: u8) -> usize {
    if flag >> 4 != 0 {
        2
    } else {
        1
    }
}

/// Correlation id length announced by a control flag.
pub fn correlation_len(flag: u8) -> usize {
    usize::from(flag & 0x0F)
}

/// Total frame length and length-field width for the given id and payload sizes.
fn frame_layout(id_len: usize, payload_len: usize) -> (usize, usize) {
    let short = FRAME_OVERHEAD + 1 + id_len + payload_len;
    if short > SHORT_FRAME_MAX {
        (short + 1, 2)
    } else {
        (short, 1)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬─────────┬──────┬───────────────┬──────────────┬─────────┬──────┐
/// │ 0xFF │ Command │ Flag │ Length        │ Correlation  │ Payload │ 0xAA │
/// │      │ (1B)    │ (1B) │ (1B or 2B BE) │ id (0 or 8B) │         │      │
/// └──────┴─────────┴──────┴───────────────┴──────────────┴─────────┴──────┘
/// ```
///
/// The flag's low nibble holds the correlation id length, its high nibble
/// selects the 2-byte length field. Length counts the whole frame.
pub fn encode_frame(
    command_id: u8,
    correlation_id: Option<CorrelationId>,
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<()> {
    let id_len = if correlation_id.is_some() {
        CORRELATION_ID_LEN
    } else {
        0
    };
    let (total, width) = frame_layout(id_len, payload.len());
    if total > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: MAX_FRAME_LEN,
        });
    }

    dst.reserve(total);
    dst.put_u8(HEADER);
    dst.put_u8(command_id);
    if width == 2 {
        dst.put_u8(LONG_LENGTH_FLAG | id_len as u8);
        dst.put_u16(total as u16);
    } else {
        dst.put_u8(id_len as u8);
        dst.put_u8(total as u8);
    }
    if let Some(id) = correlation_id {
        dst.put_slice(&id.to_be_bytes());
    }
    dst.put_slice(payload);
    dst.put_u8(FOOTER);
    Ok(())
}

/// Decode one frame from the front of a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Result<Option<Frame>> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };
    if first != HEADER {
        return Err(FrameError::InvalidHeader(first));
    }
    if src.len() < 3 {
        return Ok(None);
    }

    let flag = src[2];
    let width = length_width(flag);
    let id_len = correlation_len(flag);
    if src.len() < 3 + width {
        return Ok(None);
    }
    let total = if width == 2 {
        usize::from(u16::from_be_bytes([src[3], src[4]]))
    } else {
        usize::from(src[3])
    };

    let min = FRAME_OVERHEAD + width + id_len;
    if total < min {
        return Err(FrameError::InvalidLength { length: total, min });
    }
    if src.len() < total {
        return Ok(None);
    }
    if src[total - 1] != FOOTER {
        return Err(FrameError::InvalidFooter(src[total - 1]));
    }

    let command_id = src[1];
    src.advance(3 + width);
    let correlation_id = (id_len > 0).then(|| {
        let id = src[..id_len]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        CorrelationId(id)
    });
    src.advance(id_len);
    let payload = src.split_to(total - min).freeze();
    src.advance(1);

    Ok(Some(Frame {
        command_id,
        correlation_id,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(command: CommandType, id: Option<u64>, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(command.into(), id.map(CorrelationId), payload, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_free_space_request_bytes() {
        let buf = encode(CommandType::CfgFreeSpace, None, &[]);
        assert_eq!(buf.as_ref(), &[0xFF, 0xD7, 0x00, 0x05, 0xAA]);
    }

    #[test]
    fn test_correlation_id_msb_first() {
        let buf = encode(CommandType::Battery, Some(0x0102_0304_0506_0708), &[]);
        assert_eq!(
            buf.as_ref(),
            &[0xFF, 0x05, 0x08, 0x0D, 1, 2, 3, 4, 5, 6, 7, 8, 0xAA]
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = encode(CommandType::Txt, Some(42), b"hello");
        let frame = decode_frame(&mut buf).unwrap().unwrap();

        assert_eq!(frame.command_type(), Some(CommandType::Txt));
        assert_eq!(frame.correlation_id, Some(CorrelationId(42)));
        assert_eq!(frame.payload.as_ref(), b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_boundary_short_form() {
        // 5 bytes of framing + 250 payload = 255
        let payload = vec![0x11; 250];
        let mut buf = encode(CommandType::ImgSave, None, &payload);
        assert_eq!(buf.len(), 255);
        assert_eq!(buf[2], 0x00);
        assert_eq!(buf[3], 0xFF);

        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 250);
    }

    #[test]
    fn test_length_boundary_long_form() {
        // one more payload byte forces the 2-byte length field
        let payload = vec![0x22; 251];
        let mut buf = encode(CommandType::ImgSave, None, &payload);
        assert_eq!(buf.len(), 257);
        assert_eq!(buf[2], 0x10);
        assert_eq!(&buf[3..5], &[0x01, 0x01]);

        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn test_long_form_with_correlation_id() {
        let payload = vec![0x33; 300];
        let mut buf = encode(CommandType::ImgSave, Some(7), &payload);
        assert_eq!(buf[2], 0x18);

        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(frame.correlation_id, Some(CorrelationId(7)));
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn test_frame_too_large() {
        let payload = vec![0; MAX_FRAME_LEN];
        let mut buf = BytesMut::new();
        let result = encode_frame(0x41, None, &payload, &mut buf);
        assert!(matches!(result, Err(FrameError::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete() {
        let full = encode(CommandType::Txt, Some(1), b"partial");
        for cut in 0..full.len() {
            let mut buf = BytesMut::from(&full[..cut]);
            assert!(decode_frame(&mut buf).unwrap().is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn test_decode_invalid_header() {
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x05, 0xAA][..]);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(FrameError::InvalidHeader(0x00))
        ));
    }

    #[test]
    fn test_decode_invalid_footer() {
        let mut buf = BytesMut::from(&[0xFF, 0x01, 0x00, 0x05, 0xAB][..]);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(FrameError::InvalidFooter(0xAB))
        ));
    }

    #[test]
    fn test_decode_length_below_overhead() {
        let mut buf = BytesMut::from(&[0xFF, 0x01, 0x08, 0x06, 0, 0, 0, 0, 0, 0, 0, 0, 0xAA][..]);
        assert!(matches!(
            decode_frame(&mut buf),
            Err(FrameError::InvalidLength { length: 6, min: 13 })
        ));
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = encode(CommandType::Clear, None, &[]);
        buf.extend_from_slice(&encode(CommandType::Power, None, &[1]));

        let f1 = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(f1.command_type(), Some(CommandType::Clear));
        let f2 = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(f2.payload.as_ref(), &[1]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(CommandType::Power, vec![1]);
        assert_eq!(frame.wire_size(), 6);
        let frame = frame.with_correlation_id(CorrelationId(1));
        assert_eq!(frame.wire_size(), 14);

        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.wire_size());
    }

    #[test]
    fn test_correlation_ids_increase() {
        let a = CorrelationId::next();
        let b = CorrelationId::next();
        assert!(b > a);
    }
}
