use std::fmt;
use std::str::Utf8Error;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// What kind of grammar violation a [`SipParseError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The message violates the grammar.
    Malformed,
    /// A mandatory header is absent.
    MissingMandatory,
    /// A URI could not be parsed.
    BadUri,
    /// The body is shorter than Content-Length promises.
    Truncated,
}

/// Structured parse failure.
///
/// `suggested_status` tells the transport which 4xx to answer with when
/// the sender is identifiable; `recoverable` is `false` when the datagram
/// is not recognizably SIP and must be dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct SipParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: usize,
    pub col: usize,
    pub offset: usize,
    pub suggested_status: u16,
    pub recoverable: bool,
}

impl fmt::Display for SipParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} at line {} col {}: {}",
            self.kind, self.line, self.col, self.message
        )
    }
}

impl SipParseError {
    pub fn new<T: AsRef<str>>(kind: ParseErrorKind, message: T) -> Self {
        Self {
            kind,
            message: message.as_ref().to_string(),
            line: 0,
            col: 0,
            offset: 0,
            suggested_status: 400,
            recoverable: true,
        }
    }

    /// A malformed start line: not recognizably SIP, never answered.
    pub fn not_sip<T: AsRef<str>>(message: T) -> Self {
        Self {
            recoverable: false,
            ..Self::new(ParseErrorKind::Malformed, message)
        }
    }

    pub(crate) fn missing_header(name: &'static str) -> Self {
        Self::new(ParseErrorKind::MissingMandatory, format!("Missing required '{name}' header"))
    }

    pub(crate) fn at(mut self, line: usize, col: usize, offset: usize) -> Self {
        self.line = line;
        self.col = col;
        self.offset = offset;
        self
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.suggested_status = status;
        self
    }
}

impl From<Utf8Error> for SipParseError {
    fn from(err: Utf8Error) -> Self {
        SipParseError::new(ParseErrorKind::Malformed, format!("Invalid UTF-8: {err}"))
    }
}

impl From<sipua_util::Error> for SipParseError {
    fn from(err: sipua_util::Error) -> Self {
        SipParseError {
            kind: ParseErrorKind::Malformed,
            message: format!("Failed to scan, kind: {:?}", err.kind),
            line: err.line,
            col: err.col,
            offset: err.offset,
            suggested_status: 400,
            recoverable: true,
        }
    }
}

/// Failures in the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Failed to send to {addr}: {reason}")]
    SendFailed { addr: String, reason: String },

    #[error("Destination {0} is unreachable")]
    Unreachable(String),

    #[error("Socket closed")]
    SocketClosed,
}

/// Failures attached to a terminating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("Transaction timed out (Timer B)")]
    TimeoutB,

    #[error("Transaction timed out (Timer F)")]
    TimeoutF,

    #[error("No ACK received before Timer H fired")]
    NoAck,

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Input {input} is invalid in state {state}")]
    InvalidState { state: &'static str, input: &'static str },
}

/// Failures surfaced by the dialog layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialogError {
    #[error("Request is invalid inside this dialog")]
    InvalidRequest,

    #[error("CSeq {got} is lower than the last received {last}")]
    CSeqRegression { got: u32, last: u32 },

    #[error("Route set does not match the dialog")]
    RouteSetMismatch,

    #[error("Dialog-establishing request carries no '{0}' header")]
    MissingHeader(&'static str),

    #[error("Operation requires state {expected}, dialog is {actual}")]
    NotInState { expected: &'static str, actual: &'static str },

    #[error("Transaction timed out")]
    TransactionTimeout,

    #[error("Transport failed: {0}")]
    Transport(String),
}

/// Protocol violations detected above the transaction layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Message on confirmed dialog is missing the '{0}' header")]
    MissingMandatoryHeader(&'static str),

    #[error("Branch parameter does not start with the RFC 3261 magic cookie")]
    BadBranch,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] SipParseError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Fmt Error")]
    Fmt(#[from] std::fmt::Error),
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::Parse(err.into())
    }
}

impl From<sipua_util::Error> for Error {
    fn from(err: sipua_util::Error) -> Self {
        Error::Parse(err.into())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}
