use crate::command::CommandType;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The encoded frame does not fit the 2-byte length field.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A command parameter cannot be represented on the wire.
    #[error("invalid parameter for {command}: {reason}")]
    InvalidParameter {
        command: CommandType,
        reason: String,
    },

    /// The frame does not start with the header byte.
    #[error("invalid frame header 0x{0:02X} (expected 0xFF)")]
    InvalidHeader(u8),

    /// The frame does not end with the footer byte.
    #[error("invalid frame footer 0x{0:02X} (expected 0xAA)")]
    InvalidFooter(u8),

    /// The declared total length is shorter than the frame overhead.
    #[error("invalid frame length {length} (minimum {min})")]
    InvalidLength { length: usize, min: usize },

    /// Bytes left over that do not form a complete frame.
    #[error("incomplete frame ({0} trailing bytes)")]
    Truncated(usize),

    /// An upload file line is not valid hex.
    #[error("invalid hex on line {line}: {reason}")]
    InvalidHex { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, FrameError>;
