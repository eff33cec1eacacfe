//! Error types shared by every index family.
//!
//! `OutOfRegion` (a point falling outside a quad/octree's boundary) and
//! `NotFound` (a failed delete) are not represented here: both are normal,
//! total outcomes and surface as `bool` returns rather than errors.

use thiserror::Error;

/// The error type returned by fallible `spart` operations.
#[derive(Error, Debug)]
pub enum SpartError {
    /// A constructor or query argument was invalid (zero capacity, negative
    /// `k`/`r`, a malformed boundary descriptor).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `save`/`load` failed on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `load` detected a wrong magic tag, unknown version, truncated
    /// stream, or a payload that failed to decode.
    #[error("format error: {0}")]
    Format(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpartError>;
