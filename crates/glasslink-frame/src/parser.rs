//! Incremental frame parser.
//!
//! BLE notifications split frames at arbitrary points. [`FrameParser`]
//! consumes chunks of any size and emits each frame once its footer
//! arrives; the result never depends on where the input was split.

use std::time::SystemTime;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::codec::{self, CorrelationId, FOOTER, FRAME_OVERHEAD, HEADER};
use crate::message::Message;
use crate::response::decode_response;

/// Position of the parser within the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParserState {
    #[default]
    Waiting,
    ParsingCommandType,
    ParsingControlFlag,
    ParsingQueryId,
    ParsingTotalMessageLength,
    ParsingPayload,
    ParsingEndFlag,
}

/// Payload reception progress of the frame in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseProgress {
    pub correlation_id: Option<CorrelationId>,
    pub received: usize,
    pub total: usize,
}

impl ParseProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.received as f64 / self.total as f64
        }
    }
}

/// Malformed input seen by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A byte other than the footer where the footer belongs. The parser
    /// keeps waiting for the footer.
    #[error("unexpected byte 0x{0:02X} where frame footer expected")]
    UnexpectedFooter(u8),

    /// The declared length cannot hold the frame's own fields. The partial
    /// frame is dropped.
    #[error("declared frame length {length} below minimum {min}")]
    InvalidLength { length: usize, min: usize },
}

/// Something the parser has to report after a `feed`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    /// State after the event.
    pub state: ParserState,
    pub command_id: Option<u8>,
    pub correlation_id: Option<CorrelationId>,
    /// A completed frame.
    pub message: Option<Message>,
    pub progress: Option<ParseProgress>,
    pub error: Option<ParseError>,
}

/// Resumable state machine turning notification chunks into [`Message`]s.
#[derive(Debug, Default)]
pub struct FrameParser {
    state: ParserState,
    command_id: u8,
    length_width: usize,
    length_remaining: usize,
    total_length: usize,
    id_len: usize,
    id_remaining: usize,
    id_acc: u64,
    payload_len: usize,
    payload: BytesMut,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Whether a frame is partially received.
    pub fn is_receiving(&self) -> bool {
        self.state != ParserState::Waiting
    }

    /// Discard any partial frame and wait for the next header.
    pub fn reset(&mut self) {
        if self.is_receiving() {
            debug!(state = ?self.state, "discarding partial frame");
        }
        self.state = ParserState::Waiting;
        self.payload.clear();
        self.payload_len = 0;
        self.id_acc = 0;
    }

    /// Abandon the frame in flight. Same as [`FrameParser::reset`].
    pub fn cancel(&mut self) {
        self.reset();
    }

    fn correlation_id(&self) -> Option<CorrelationId> {
        (self.id_len > 0 && self.id_remaining == 0).then_some(CorrelationId(self.id_acc))
    }

    fn result(&self) -> ParseResult {
        ParseResult {
            state: self.state,
            command_id: Some(self.command_id),
            correlation_id: self.correlation_id(),
            message: None,
            progress: None,
            error: None,
        }
    }

    fn progress(&self) -> ParseProgress {
        ParseProgress {
            correlation_id: self.correlation_id(),
            received: self.payload.len(),
            total: self.payload_len,
        }
    }

    /// Consume a chunk and report completed frames, payload progress and errors.
    pub fn feed(&mut self, data: &[u8]) -> Vec<ParseResult> {
        let mut results = Vec::new();
        let mut payload_progressed = false;
        let mut pos = 0;

        while pos < data.len() {
            let byte = data[pos];
            match self.state {
                ParserState::Waiting => {
                    pos += 1;
                    if byte == HEADER {
                        self.state = ParserState::ParsingCommandType;
                    } else {
                        trace!(byte, "skipping byte outside frame");
                    }
                }
                ParserState::ParsingCommandType => {
                    pos += 1;
                    self.command_id = byte;
                    self.state = ParserState::ParsingControlFlag;
                }
                ParserState::ParsingControlFlag => {
                    pos += 1;
                    self.length_width = codec::length_width(byte);
                    self.length_remaining = self.length_width;
                    self.total_length = 0;
                    self.id_len = codec::correlation_len(byte);
                    self.id_remaining = self.id_len;
                    self.id_acc = 0;
                    self.state = ParserState::ParsingTotalMessageLength;
                }
                ParserState::ParsingTotalMessageLength => {
                    pos += 1;
                    self.total_length = (self.total_length << 8) | usize::from(byte);
                    self.length_remaining -= 1;
                    if self.length_remaining == 0 {
                        if let Some(error) = self.length_complete() {
                            results.push(error);
                        }
                    }
                }
                ParserState::ParsingQueryId => {
                    pos += 1;
                    self.id_acc = (self.id_acc << 8) | u64::from(byte);
                    self.id_remaining -= 1;
                    if self.id_remaining == 0 {
                        self.enter_payload();
                    }
                }
                ParserState::ParsingPayload => {
                    let wanted = self.payload_len - self.payload.len();
                    let take = wanted.min(data.len() - pos);
                    self.payload.extend_from_slice(&data[pos..pos + take]);
                    pos += take;
                    payload_progressed = true;
                    if self.payload.len() == self.payload_len {
                        self.state = ParserState::ParsingEndFlag;
                    }
                }
                ParserState::ParsingEndFlag => {
                    pos += 1;
                    if byte == FOOTER {
                        results.push(self.complete());
                    } else {
                        warn!(
                            byte,
                            command_id = self.command_id,
                            "unexpected byte where frame footer expected"
                        );
                        let mut result = self.result();
                        result.error = Some(ParseError::UnexpectedFooter(byte));
                        results.push(result);
                    }
                }
            }
        }

        if payload_progressed && self.state == ParserState::ParsingPayload {
            let mut result = self.result();
            result.progress = Some(self.progress());
            results.push(result);
        }
        results
    }

    fn length_complete(&mut self) -> Option<ParseResult> {
        let min = FRAME_OVERHEAD + self.length_width + self.id_len;
        let Some(payload_len) = self.total_length.checked_sub(min) else {
            warn!(
                length = self.total_length,
                min,
                command_id = self.command_id,
                "declared frame length below minimum"
            );
            let mut result = self.result();
            result.error = Some(ParseError::InvalidLength {
                length: self.total_length,
                min,
            });
            self.reset();
            result.state = self.state;
            return Some(result);
        };
        self.payload_len = payload_len;
        if self.id_len > 0 {
            self.state = ParserState::ParsingQueryId;
        } else {
            self.enter_payload();
        }
        None
    }

    fn enter_payload(&mut self) {
        self.payload.clear();
        if self.payload_len == 0 {
            self.state = ParserState::ParsingEndFlag;
        } else {
            self.payload.reserve(self.payload_len);
            self.state = ParserState::ParsingPayload;
        }
    }

    fn complete(&mut self) -> ParseResult {
        let raw_payload = self.payload.split().freeze();
        let message = Message {
            command_id: self.command_id,
            correlation_id: self.correlation_id(),
            data: decode_response(self.command_id, &raw_payload),
            raw_payload,
            received_at: SystemTime::now(),
        };
        debug!(
            command_id = self.command_id,
            correlation_id = ?message.correlation_id,
            len = message.raw_payload.len(),
            "frame received"
        );

        self.state = ParserState::Waiting;
        let mut result = self.result();
        result.progress = Some(ParseProgress {
            correlation_id: message.correlation_id,
            received: self.payload_len,
            total: self.payload_len,
        });
        result.message = Some(message);
        result
    }
}
