use std::fmt;

/// Error codes aligned with gRPC (0-99) plus ferry-specific (100+).
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // ===== gRPC-aligned codes (0-99) =====
    /// Operation was cancelled by either peer
    Cancelled = 1,
    /// Code not known to this build
    Unknown = 2,
    /// Malformed or unacceptable request
    InvalidArgument = 3,
    /// Deadline passed before completion
    DeadlineExceeded = 4,
    /// No operation registered under that name
    NotFound = 5,
    /// System not in required state
    FailedPrecondition = 9,
    /// Value out of valid range
    OutOfRange = 11,
    /// Operation exists but not with the requested shape
    Unimplemented = 12,
    /// Handler bug (including panics)
    Internal = 13,
    /// Connection lost or peer went away
    Unavailable = 14,

    // ===== ferry-specific codes (100+) =====
    /// Peer broke the stream protocol
    ProtocolViolation = 100,
}

/// Coarse classification of an [`ErrorCode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The link or session failed underneath the stream.
    Transport,
    /// A peer sent something the stream state machine does not allow.
    Protocol,
    /// The handler rejected the request or failed computing the result.
    Computation,
    /// Either side cancelled the stream.
    Cancelled,
}

impl ErrorCode {
    /// Convert from a u32 wire value.
    ///
    /// Unrecognized values map to [`ErrorCode::Unknown`] so a newer peer can
    /// never make us drop a terminal status on the floor.
    pub fn from_u32(val: u32) -> Self {
        match val {
            1 => ErrorCode::Cancelled,
            3 => ErrorCode::InvalidArgument,
            4 => ErrorCode::DeadlineExceeded,
            5 => ErrorCode::NotFound,
            9 => ErrorCode::FailedPrecondition,
            11 => ErrorCode::OutOfRange,
            12 => ErrorCode::Unimplemented,
            13 => ErrorCode::Internal,
            14 => ErrorCode::Unavailable,
            100 => ErrorCode::ProtocolViolation,
            _ => ErrorCode::Unknown,
        }
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::Cancelled => ErrorCategory::Cancelled,
            ErrorCode::Unavailable | ErrorCode::DeadlineExceeded => ErrorCategory::Transport,
            ErrorCode::ProtocolViolation | ErrorCode::NotFound | ErrorCode::Unimplemented => {
                ErrorCategory::Protocol
            }
            ErrorCode::InvalidArgument
            | ErrorCode::FailedPrecondition
            | ErrorCode::OutOfRange
            | ErrorCode::Internal
            | ErrorCode::Unknown => ErrorCategory::Computation,
        }
    }

    /// Human-readable description of the code.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Unknown => "unknown error",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::DeadlineExceeded => "deadline exceeded",
            ErrorCode::NotFound => "not found",
            ErrorCode::FailedPrecondition => "failed precondition",
            ErrorCode::OutOfRange => "out of range",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Internal => "internal error",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::ProtocolViolation => "protocol violation",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Computation => "computation",
            ErrorCategory::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal failure of a logical stream.
///
/// This is what a caller observes instead of payload data when a stream ends
/// badly, and what a handler returns to end its stream with a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "stream cancelled")
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::FailedPrecondition, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OutOfRange, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message)
    }

    pub fn not_found(method: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("no such operation: {method}"))
    }

    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.category(), self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_survive_the_wire() {
        for code in [
            ErrorCode::Cancelled,
            ErrorCode::InvalidArgument,
            ErrorCode::NotFound,
            ErrorCode::Internal,
            ErrorCode::Unavailable,
            ErrorCode::ProtocolViolation,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), code);
        }
    }

    #[test]
    fn unrecognized_codes_decode_as_unknown() {
        assert_eq!(ErrorCode::from_u32(0), ErrorCode::Unknown);
        assert_eq!(ErrorCode::from_u32(4242), ErrorCode::Unknown);
    }

    #[test]
    fn categories_follow_the_taxonomy() {
        assert_eq!(
            RpcError::unavailable("link closed").category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            RpcError::protocol("data after close").category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            RpcError::invalid_argument("empty").category(),
            ErrorCategory::Computation
        );
        assert_eq!(RpcError::cancelled().category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn display_carries_category_and_message() {
        let err = RpcError::invalid_argument("cannot average an empty sequence");
        assert_eq!(
            err.to_string(),
            "invalid argument (computation): cannot average an empty sequence"
        );
    }
}
