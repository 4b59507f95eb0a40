//! Binary framing for the glasses command protocol.
//!
//! Every command and response travels in a frame:
//! - `0xFF` header, one-byte command id and a control flag
//! - a 1- or 2-byte big-endian total length
//! - an optional correlation id echoed back by the glasses
//! - the payload and a `0xAA` footer
//!
//! [`FrameParser`] reassembles frames from notification chunks of any size.

pub mod codec;
pub mod command;
pub mod error;
pub mod message;
pub mod parser;
pub mod response;
pub mod text;
pub mod upload;

pub use codec::{
    decode_frame, encode_frame, CorrelationId, Frame, CORRELATION_ID_LEN, FOOTER, HEADER,
    MAX_FRAME_LEN,
};
pub use command::{BleConnectParams, Command, CommandType};
pub use error::{FrameError, Result};
pub use message::Message;
pub use parser::{FrameParser, ParseError, ParseProgress, ParseResult, ParserState};
pub use response::{
    decode_response, ConfigEntry, ConfigInfo, DeviceError, FreeSpace, ResponseData, Settings,
};
pub use upload::UploadFile;
