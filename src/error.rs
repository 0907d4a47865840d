//! Error taxonomy for the M-Bus master (spec.md §7).
//!
//! Errors are layered the way `itm`'s `DecoderErrorInt`/`DecoderError`
//! pair is: each stage of the pipeline (frame envelope, FDH, DIF/VIF
//! record loop, transport, facade) owns a small error enum, and the
//! facade-level [`MasterError`] aggregates them with `#[from]`
//! conversions so callers only ever match on one type.

use std::fmt;

/// Frame-envelope failures (spec.md §7.2): bad start/stop byte,
/// mismatched duplicated length, failed checksum, truncated payload.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: got {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("unrecognized start byte: {0:#04x}")]
    BadStartByte(u8),

    #[error("long frame stop byte missing or wrong: {0:#04x}")]
    BadStopByte(u8),

    #[error("duplicated length bytes disagree: {0:#04x} != {1:#04x}")]
    LengthMismatch(u8, u8),

    #[error("second start byte of long frame is not 0x68: {0:#04x}")]
    BadSecondStartByte(u8),

    #[error("declared length {declared} does not match frame size (expected {expected} bytes from C to last payload byte)")]
    LengthFieldError { declared: u8, expected: usize },

    #[error("checksum mismatch: frame says {expected:#04x}, computed {computed:#04x}")]
    ChecksumMismatch { expected: u8, computed: u8 },
}

/// Protocol-level failures (spec.md §7.3): unexpected control code,
/// unsupported CI, ASCII-without-LVAR, LVAR out of range.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unexpected control code in RSP_UD: {0:#04x}")]
    UnexpectedControlCode(u8),

    #[error("unsupported control information field: {0:#04x}")]
    UnsupportedControlInformation(u8),

    #[error("ASCII VIF encountered but preceding DIF did not declare variable length (LVAR)")]
    AsciiWithoutLvar,

    #[error("LVAR value out of supported range: {0:#04x}")]
    UnsupportedLvar(u8),
}

/// VIF table lookup exhausted its wildcard shifts without a match
/// (spec.md §7.4). Carries the byte that failed to resolve.
#[derive(Debug, thiserror::Error)]
#[error("no VIF table entry matches byte {0:#04x} after exhausting wildcard shifts")]
pub struct UnknownVif(pub u8);

/// A feature named by spec.md as explicitly out of scope for this
/// implementation (spec.md §7.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Unimplemented {
    #[error("FLOAT32 decoder is not implemented")]
    Float32,
    #[error("6-byte integer decoder is not implemented")]
    Int48,
    #[error("8-byte integer decoder is not implemented")]
    Int64,
    #[error("special-functions DIF (nibble 0xF) is not implemented")]
    SpecialFunction,
    #[error("manufacturer-specific VIF {0:#04x} is not implemented")]
    ManufacturerSpecificVif(u8),
    #[error("manufacturer-extended VIF {0:#04x} is not implemented")]
    ManufacturerExtendedVif(u8),
    #[error("RSP_UD application-error response (CI 0x70) is not implemented")]
    ApplicationError,
    #[error("transport {0} is not implemented; only TCP is in scope")]
    Transport(&'static str),
}

/// Transport-layer failures (spec.md §7.1): connect/send/recv failure,
/// timeout, abrupt close.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect to {host}:{port} timed out or failed after {attempts} attempt(s)")]
    ConnectFailed {
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("operation timed out")]
    Timeout,

    #[error("connection closed by peer")]
    ClosedByPeer,

    #[error("send failed after {attempts} attempt(s)")]
    SendFailed { attempts: u32 },
}

impl TransportError {
    /// True for anything that means "nothing answered in time" rather
    /// than a genuine transport failure: an explicit [`TransportError::Timeout`]
    /// or an underlying I/O error whose kind is a read-timeout kind
    /// (spec.md §4.9: distinguishes "no slave at this address" from
    /// other errors during a bus scan).
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Timeout => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Byte-level decode failures (spec.md §4.1): short buffers, non-ASCII
/// bytes where strict ASCII is required.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer too short: need {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    #[error("byte {0:#04x} is not valid 7-bit ASCII")]
    NotAscii(u8),
}

/// Raised when an operation requires [`ConnectionState::Connected`]
/// (spec.md §3) but the master is in some other state.
#[derive(Debug, thiserror::Error)]
#[error("operation requires a connected master, current state is {0}")]
pub struct StateError(pub crate::transport::ConnectionState);

impl fmt::Display for crate::transport::ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            crate::transport::ConnectionState::Disconnected => "Disconnected",
            crate::transport::ConnectionState::Connecting => "Connecting",
            crate::transport::ConnectionState::Connected => "Connected",
            crate::transport::ConnectionState::Disconnecting => "Disconnecting",
        };
        f.write_str(s)
    }
}

/// Aggregate error returned by the master facade (spec.md §4.9).
///
/// A parse error aborts the current record or the current
/// `get_all_fields` call, but never closes the TCP session; only
/// [`MasterError::Transport`] and [`MasterError::State`] imply the
/// caller may need to reconnect.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    UnknownVif(#[from] UnknownVif),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Unimplemented(#[from] Unimplemented),

    #[error(transparent)]
    State(#[from] StateError),
}
