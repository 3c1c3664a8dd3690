//! Error taxonomy for the endpoint core (spec §7).
//!
//! Every variant that originates from a parser `ERROR` event carries enough
//! information to map deterministically to an RFC 6455 close code via
//! [`Error::close_code`], so the endpoint never has to pattern-match on
//! error strings to decide how to close the connection.

use crate::frame::close_code;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("{source}")]
    Utf8 {
        #[from]
        source: FromUtf8Error,
    },

    #[error("channel communication error")]
    CommunicationError,

    #[error("the client disconnected before this send completed")]
    ClientDisconnected,

    // Framing errors (spec §4.1 validation rules, in the order checked) --
    #[error("RSV bits must be zero")]
    RsvNotZero,

    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("payload must be masked")]
    PayloadMustBeMasked,

    #[error("payload must not be masked")]
    PayloadMustNotBeMasked,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame payload exceeds 125 bytes")]
    ControlFramePayloadTooLarge,

    #[error("continuation frame received but no message is in progress")]
    UnexpectedContinuation,

    #[error("expected a continuation frame, a message is already in progress")]
    ExpectedContinuation,

    #[error("frame length exceeds the configured maximum frame size")]
    FrameTooLarge,

    #[error("cumulative message length exceeds the configured maximum message size")]
    MessageTooLarge,

    #[error("binary opcode rejected: endpoint is configured text-only")]
    UnacceptableType,

    #[error("extended payload length has its most significant bit set")]
    LengthMostSignificantBitSet,

    #[error("text message is not valid UTF-8")]
    InconsistentFrameDataType,

    // Construction errors -------------------------------------------------
    #[error("endpoint construction requires non-empty negotiated headers")]
    EmptyHeaders,

    /// Carries a close code straight from a parser `ERROR` event, for
    /// violations (`close_code()` below) that don't need their own
    /// named variant at the call site.
    #[error("{message}")]
    Protocol { message: String, code: u16 },
}

impl Error {
    /// Maps a protocol-level error to the RFC close code the endpoint
    /// should send back to the peer (spec §7 propagation rules).
    pub fn close_code(&self) -> u16 {
        match self {
            Error::RsvNotZero
            | Error::InvalidOpcode(_)
            | Error::PayloadMustBeMasked
            | Error::PayloadMustNotBeMasked
            | Error::ControlFramesFragmented
            | Error::ControlFramePayloadTooLarge
            | Error::UnexpectedContinuation
            | Error::ExpectedContinuation
            | Error::LengthMostSignificantBitSet => close_code::PROTOCOL_ERROR,
            Error::FrameTooLarge | Error::MessageTooLarge => close_code::MESSAGE_TOO_LARGE,
            Error::UnacceptableType => close_code::UNACCEPTABLE_TYPE,
            Error::InconsistentFrameDataType => close_code::INCONSISTENT_FRAME_DATA_TYPE,
            Error::Protocol { code, .. } => *code,
            _ => close_code::ABNORMAL_CLOSE,
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ClientDisconnected
    }
}
