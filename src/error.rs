//! Crate-wide error type.
//!
//! One enum per §7 of the design: each variant names a failure kind the
//! satellite node or orchestrator must recognize and react to
//! differently, rather than a generic "something went wrong" bucket.

use thiserror::Error;

/// Errors surfaced by the cache engine, the wire protocol, and the
/// satellite/orchestrator state machines.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required configuration field was missing or malformed.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A trace line did not match the `[Requests Records]` grammar.
    #[error("corrupt trace line: {0}")]
    TraceCorrupt(String),

    /// A neighbor socket read or write failed.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// An object's size exceeds the cache's total capacity.
    #[error("object of size {size} exceeds cache capacity {capacity}")]
    CapacityExceededByOneObject {
        /// Size of the rejected object, in bytes.
        size: u64,
        /// Total capacity of the cache, in bytes.
        capacity: u64,
    },

    /// The configured prefetch byte budget was exhausted.
    ///
    /// This is a normal loop-termination signal, not a fault; callers
    /// that only care about the final counters can ignore it, but it is
    /// represented here so a caller that wants to log it, can.
    #[error("prefetch budget exhausted after {admitted_bytes} bytes")]
    BudgetExhausted {
        /// Bytes admitted before the budget ran out.
        admitted_bytes: u64,
    },

    /// A wire-format frame failed to decode.
    #[error(transparent)]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// Underlying I/O failure (socket, trace file, log file).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure for a config or payload.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;
