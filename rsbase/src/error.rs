//! The two error domains of the protocol core: faults raised by the frame
//! codec itself, and the error codes carried on the wire by ERROR frames.

use thiserror::Error as ThisError;

/// A fault detected while encoding or decoding a frame.
///
/// During encode these are returned to the caller; during decode they are
/// fatal for the connection and map to [`Error::connection`] via
/// `From<FrameError>`.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FrameError {
    /// The encoded frame would not fit the 24-bit length field.
    #[error("frame of {len} bytes exceeds the 24-bit length limit")]
    FrameTooLarge { len: usize },
    /// The frame violates the wire layout rules.
    #[error("illegal frame: {0}")]
    IllegalFrame(&'static str),
    /// The buffer ends before the frame does.
    #[error("incomplete frame")]
    Incomplete,
    /// The 6-bit frame type is not part of the protocol alphabet.
    #[error("unrecognized frame type 0x{0:02x}")]
    InvalidType(u16),
}

/// The INVALID_SETUP error code. Stream ID MUST be 0.
pub const INVALID_SETUP: u32 = 0x0000_0001;
/// The UNSUPPORTED_SETUP error code. Stream ID MUST be 0.
pub const UNSUPPORTED_SETUP: u32 = 0x0000_0002;
/// The REJECTED_SETUP error code. Stream ID MUST be 0.
pub const REJECTED_SETUP: u32 = 0x0000_0003;
/// The REJECTED_RESUME error code. Stream ID MUST be 0.
pub const REJECTED_RESUME: u32 = 0x0000_0004;
/// The CONNECTION_ERROR error code: the connection is being terminated
/// immediately. Stream ID MUST be 0.
pub const CONNECTION_ERROR: u32 = 0x0000_0101;
/// The CONNECTION_CLOSE error code: the connection is being terminated
/// after outstanding streams finish. Stream ID MUST be 0.
pub const CONNECTION_CLOSE: u32 = 0x0000_0102;
/// The APPLICATION_ERROR error code. Stream ID MUST be > 0.
pub const APPLICATION_ERROR: u32 = 0x0000_0201;
/// The REJECTED error code: the responder refused the request without
/// processing it. Stream ID MUST be > 0.
pub const REJECTED: u32 = 0x0000_0202;
/// The CANCELED error code: the responder canceled the request but may
/// have started processing it. Stream ID MUST be > 0.
pub const CANCELED: u32 = 0x0000_0203;
/// The INVALID error code: the request is invalid. Stream ID MUST be > 0.
pub const INVALID: u32 = 0x0000_0204;

/// An error in the RSocket domain: a numeric error code plus a UTF-8
/// message, exactly what an ERROR frame carries.
///
/// Remote ERROR frames decode into this type; local failures encode from it.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("rsocket error 0x{code:08x}: {message}")]
pub struct Error {
    code: u32,
    message: String,
}

impl Error {
    /// An error with an explicit code.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// An APPLICATION_ERROR raised by handler logic.
    pub fn application(message: impl Into<String>) -> Self {
        Self::new(APPLICATION_ERROR, message)
    }

    /// A CONNECTION_ERROR terminating the connection.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(CONNECTION_ERROR, message)
    }

    /// A REJECTED error: the request was refused before processing.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(REJECTED, message)
    }

    /// A CANCELED error.
    pub fn canceled() -> Self {
        Self::new(CANCELED, "canceled")
    }

    /// An INVALID error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(INVALID, message)
    }

    /// The termination error installed when the transport goes away
    /// without a peer-supplied reason.
    pub fn closed_channel() -> Self {
        Self::connection("closed channel")
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Self::connection(err.to_string())
    }
}
