use std::time::SystemTime;

use bytes::Bytes;

use crate::codec::CorrelationId;
use crate::command::CommandType;
use crate::response::ResponseData;

/// A complete frame received from the glasses.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Raw command id; may be outside [`CommandType`].
    pub command_id: u8,
    pub correlation_id: Option<CorrelationId>,
    /// Typed payload, when the command has a known response shape.
    pub data: Option<ResponseData>,
    pub raw_payload: Bytes,
    pub received_at: SystemTime,
}

impl Message {
    pub fn command_type(&self) -> Option<CommandType> {
        CommandType::try_from(self.command_id).ok()
    }
}
