//! Error types for the link simulator.
//!
//! All operations return structured errors rather than panicking. Errors on a
//! single received frame are local to that frame: callers log them and keep
//! the receive loop running. Only [`TransportError`] is terminal for a task.

use thiserror::Error;

/// Top-level error type for all operations in the system.
///
/// Each variant corresponds to a specific failure domain:
/// - Framing: stuffing, destuffing and positional field layout
/// - Checksum: FCS verification and single-bit correction
/// - Ring: token-ring media access rules
/// - Transport: the serial link collaborator
/// - Config: invalid in-memory configuration
#[derive(Debug, Error)]
pub enum Error {
    /// Frame could not be built or parsed
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Frame check sequence did not verify
    #[error("checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    /// Token-ring access rule violated
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Transport failed; not recoverable by the protocol engine
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Framing errors for both the bus frame and the ring frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Frame is too short to contain every positional field
    #[error("frame too short: need at least {required} bytes, got {actual}")]
    TooShort { required: usize, actual: usize },

    /// Stuffed sequence ended with a lone escape byte
    #[error("stuffed frame ends with a lone escape byte")]
    TruncatedEscape,

    /// Encoded payload does not fit the fixed data field
    #[error("payload is {actual} bytes, data field holds {max}")]
    PayloadTooLong { max: usize, actual: usize },

    /// Start or end delimiter of a ring frame is wrong
    #[error("invalid {field} delimiter: expected {expected:#04x}, got {actual:#04x}")]
    InvalidDelimiter {
        field: &'static str,
        expected: u8,
        actual: u8,
    },

    /// Ring frame information field exceeds the per-segment limit
    #[error("info field is {actual} bytes, segment limit is {max}")]
    InfoTooLong { max: usize, actual: usize },

    /// Message needs more segments than the sequence byte can number
    #[error("message needs {segments} segments, at most {max} allowed")]
    TooManySegments { segments: usize, max: usize },
}

/// Frame check sequence errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    /// Carried FCS differs from the recomputed one
    #[error("FCS mismatch: carried {carried:#04x}, computed {computed:#04x}")]
    Mismatch { carried: u8, computed: u8 },

    /// No single-bit flip reproduces the carried FCS
    #[error("FCS mismatch not correctable by a single bit flip (carried {carried:#04x})")]
    UncorrectableMultiBit { carried: u8 },
}

/// Token-ring media access errors.
///
/// `NoToken` is logged and returned to the operator; `MonitorAbsent` is the
/// only ring condition escalated beyond the log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    /// Station tried to originate a frame without holding the token
    #[error("station {station} does not hold the token")]
    NoToken { station: String },

    /// No active station can serve as monitor
    #[error("no active station can serve as ring monitor")]
    MonitorAbsent,

    /// Address does not belong to any station on the ring
    #[error("no station with address {address:#04x} on the ring")]
    UnknownStation { address: u8 },

    /// Operation requires an active station
    #[error("station {station} is inactive")]
    InactiveStation { station: String },
}

/// Transport collaborator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Endpoint or its peer has been closed
    #[error("port {port} is closed")]
    Closed { port: String },

    /// Underlying I/O failure
    #[error("I/O error on {port}: {reason}")]
    Io { port: String, reason: String },
}

/// Type alias for Result with our Error type
pub type Result<T> = std::result::Result<T, Error>;
