use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

/// Mirrors the Wait/Fatal split used throughout the transport layer: `Wait`
/// means "nothing went wrong, there is just nothing to do right now" (a
/// receive timeout during a retransmit loop), `Fatal` means the session
/// cannot continue.
#[derive(Debug)]
pub enum Error {
    Wait,
    Fatal(Kind),
}

#[derive(Debug)]
pub enum Kind {
    Io(io::ErrorKind),
    Eof,
    ShortWrite,
    AddrParse,
    InvalidPort,
    InvalidPacketId(u8),
    InvalidProtocolId(u8),
    EmptyPayload,
    PayloadTooLarge(u32),
    PayloadOverrun { payload_length: u32, remaining: u64 },
    ZeroLength,
    SessionMismatch { expected: u64, actual: u64 },
    SequenceMismatch { expected: u64, actual: u64 },
    OutOfWindow { expected: u64, actual: u64 },
    UnexpectedPacket { context: &'static str, id: u8 },
    Rejected,
    RetransmitsExhausted,
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Wait,
            io::ErrorKind::UnexpectedEof => Error::Fatal(Kind::Eof),
            kind => Error::Fatal(Kind::Io(kind)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Wait => write!(f, "operation timed out"),
            Error::Fatal(kind) => write!(f, "{}", kind),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Io(kind) => write!(f, "I/O error: {}", kind),
            Kind::Eof => write!(f, "connection closed before the expected data arrived"),
            Kind::ShortWrite => write!(f, "short write: not all bytes were accepted by the socket"),
            Kind::AddrParse => write!(f, "could not resolve host to an IPv4 address"),
            Kind::InvalidPort => write!(f, "port must be a valid 16-bit integer"),
            Kind::InvalidPacketId(id) => write!(f, "invalid packet id: {}", id),
            Kind::InvalidProtocolId(id) => write!(f, "invalid protocol id: {}", id),
            Kind::EmptyPayload => write!(f, "DATA payload must not be empty"),
            Kind::PayloadTooLarge(len) => write!(f, "DATA payload of {} bytes exceeds the maximum", len),
            Kind::PayloadOverrun { payload_length, remaining } => write!(
                f,
                "DATA payload of {} bytes exceeds the {} bytes remaining in the sequence",
                payload_length, remaining
            ),
            Kind::ZeroLength => write!(f, "CONN announced a zero-length byte sequence"),
            Kind::SessionMismatch { expected, actual } => {
                write!(f, "session id mismatch: expected {}, got {}", expected, actual)
            }
            Kind::SequenceMismatch { expected, actual } => {
                write!(f, "packet number mismatch: expected {}, got {}", expected, actual)
            }
            Kind::OutOfWindow { expected, actual } => write!(
                f,
                "packet number {} is ahead of the expected {}",
                actual, expected
            ),
            Kind::UnexpectedPacket { context, id } => {
                write!(f, "unexpected packet id {} while {}", id, context)
            }
            Kind::Rejected => write!(f, "peer rejected the session"),
            Kind::RetransmitsExhausted => write!(f, "retransmission budget exhausted"),
        }
    }
}

impl std::error::Error for Error {}

/// A `has_failed` convenience to collapse `Wait` into "not actually a
/// failure" at call sites that only care about fatal outcomes.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for Result<T> {
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(Error::Wait))
    }
}
