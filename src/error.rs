//! Error types for the recoverable failure modes of the runtime.
//!
//! One `thiserror` enum per subsystem, with `#[error("...")]` messages and
//! `#[from]` for wrapped I/O errors. Only *recoverable, surfaced* failures
//! get a variant here — invariant violations and lookup misses are fatal and
//! are modeled as `panic!`/`assert!` at the point of violation, not as
//! `Result`s.

use std::io;
use thiserror::Error;

/// Failures loading a program image. All fatal: the caller is expected
/// to log and terminate, never to retry against the same file.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error reading program image: {0}")]
    Io(#[from] io::Error),

    #[error("program image is truncated: expected {expected} more bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("program image declares zero nodes")]
    ZeroNodes,
}

/// Failures propagated out of the allocator pools. The worker that observes
/// this drains its state, ends its round, and returns "no more work" with
/// the flag set; the scheduler then sets its stop flag.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("allocator pool exhausted: requested {requested} bytes")]
    OutOfMemory { requested: usize },
}

/// Failures surfaced by an external collaborator when delivering a
/// cross-process derivation.
#[derive(Error, Debug)]
pub enum RemoteDeliveryError {
    #[error("remote delivery failed but is retriable: {0}")]
    Retriable(String),

    #[error("remote delivery failed fatally: {0}")]
    Fatal(String),
}
