//! Frames exchanged between two ferry peers.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, ErrorCode, RpcError, Shape};

/// Protocol version carried in [`Message::Hello`].
pub const PROTOCOL_VERSION: u32 = 1;

/// Protocol message.
///
/// Per stream, the caller sends `Open`, then `Data*` and `Close`. The
/// responder answers with `Data*`, `Close` and `Status(Ok)` on success, or
/// `Data*` and `Status(Error)` on failure. Either side may send `Cancel` at
/// any point.
///
/// Each direction of a stream is flow-controlled by message credit: a sender
/// starts with the `initial_credit` negotiated in `Hello`, spends one per
/// `Data`, and gets more from the receiver's `Credit` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========================================================================
    // Link control
    // ========================================================================
    /// First message in both directions. Both limits are negotiated down to
    /// the smaller of the two sides.
    Hello {
        version: u32,
        max_payload_size: u32,
        initial_credit: u32,
    },

    /// The sender is tearing the session down. Every open stream fails.
    Goodbye { reason: String },

    // ========================================================================
    // Stream control
    // ========================================================================
    /// Start a logical stream for the named operation.
    Open {
        channel_id: ChannelId,
        method: String,
        shape: Shape,
    },

    /// One encoded payload on the sender's half of the stream.
    Data {
        channel_id: ChannelId,
        payload: Vec<u8>,
    },

    /// The sender half-closed: no more `Data` from it on this stream.
    Close { channel_id: ChannelId },

    /// Terminal status, sent once by the responder.
    Status {
        channel_id: ChannelId,
        status: WireStatus,
    },

    /// Abort the stream. Never acknowledged.
    Cancel { channel_id: ChannelId },

    /// The receiver consumed `messages` more `Data` frames on this stream;
    /// the sender may send that many more.
    Credit { channel_id: ChannelId, messages: u32 },
}

impl Message {
    /// The stream this frame belongs to, if any.
    pub fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Message::Hello { .. } | Message::Goodbye { .. } => None,
            Message::Open { channel_id, .. }
            | Message::Data { channel_id, .. }
            | Message::Close { channel_id }
            | Message::Status { channel_id, .. }
            | Message::Cancel { channel_id }
            | Message::Credit { channel_id, .. } => Some(*channel_id),
        }
    }
}

/// Terminal status as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireStatus {
    Ok,
    Error { code: u32, message: String },
}

impl From<&Result<(), RpcError>> for WireStatus {
    fn from(value: &Result<(), RpcError>) -> Self {
        match value {
            Ok(()) => WireStatus::Ok,
            Err(e) => WireStatus::Error {
                code: e.code.as_u32(),
                message: e.message.clone(),
            },
        }
    }
}

impl From<WireStatus> for Result<(), RpcError> {
    fn from(value: WireStatus) -> Self {
        match value {
            WireStatus::Ok => Ok(()),
            WireStatus::Error { code, message } => {
                Err(RpcError::new(ErrorCode::from_u32(code), message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_have_no_channel() {
        let hello = Message::Hello {
            version: PROTOCOL_VERSION,
            max_payload_size: 1024,
            initial_credit: 16,
        };
        assert_eq!(hello.channel_id(), None);
        let close = Message::Close {
            channel_id: ChannelId(3),
        };
        assert_eq!(close.channel_id(), Some(ChannelId(3)));
    }

    #[test]
    fn error_status_decodes_with_its_cause() {
        let status = WireStatus::from(&Err(RpcError::out_of_range("sum overflows i32")));
        let bytes = postcard::to_allocvec(&Message::Status {
            channel_id: ChannelId(5),
            status,
        })
        .unwrap();
        let Message::Status { status, .. } = postcard::from_bytes::<Message>(&bytes).unwrap()
        else {
            panic!("expected a status frame");
        };
        let result: Result<(), RpcError> = status.into();
        assert_eq!(result, Err(RpcError::out_of_range("sum overflows i32")));
    }
}
