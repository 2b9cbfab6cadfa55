// SPDX-FileCopyrightText: 2025-2026 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for fabric operations.
//!
//! The fabric status codes occupy their own numeric range starting at 1024,
//! directly after the core range, and are stable across releases.

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Stable numeric status code associated with each fabric error kind.
pub type Status = u32;

pub const STATUS_STRLEN: Status = 1024;
pub const STATUS_INTERRUPTED: Status = 1025;
pub const STATUS_NO_FABRIC: Status = 1026;
pub const STATUS_INVALID_STATE: Status = 1027;
pub const STATUS_INTERNAL: Status = 1028;
pub const STATUS_NOT_READY: Status = 1029;
pub const STATUS_NOT_FOUND: Status = 1030;
pub const STATUS_EXISTS: Status = 1031;

/// Errors that can occur when using the fabrics API.
///
/// Transport error codes are translated into this taxonomy (`EAGAIN` becomes
/// [`Error::NotReady`], `EINTR` becomes [`Error::Interrupted`]); the original
/// code is preserved in the log line at the translation site.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A serialized blob was truncated or malformed.
    #[error("Serialized data truncated or malformed")]
    StrLen,

    /// A blocking operation was interrupted by a signal.
    #[error("Interrupted")]
    Interrupted,

    /// The requested provider has no usable fabric on this system.
    #[error("No fabric available: {0}")]
    NoFabric(String),

    /// An operation was attempted in the wrong state (e.g. transfer before
    /// setup, completion without immediate data).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An internal transport failure; the message identifies the offending
    /// endpoint where applicable.
    #[error("Internal error: {0}")]
    Internal(String),

    /// There is still queued work, or a wait timed out before data arrived.
    #[error("Not ready")]
    NotReady,

    /// The referenced target is not registered.
    #[error("Not found")]
    NotFound,

    /// The resource already exists.
    #[error("Already exists")]
    Exists,

    /// A core MXL failure surfaced through the fabric layer.
    #[error(transparent)]
    Mxl(#[from] mxl::Error),
}

impl Error {
    /// Returns the stable numeric status code for this error. Core errors
    /// wrapped in [`Error::Mxl`] report their core-range code.
    pub fn status(&self) -> Status {
        match self {
            Error::StrLen => STATUS_STRLEN,
            Error::Interrupted => STATUS_INTERRUPTED,
            Error::NoFabric(_) => STATUS_NO_FABRIC,
            Error::InvalidState(_) => STATUS_INVALID_STATE,
            Error::Internal(_) => STATUS_INTERNAL,
            Error::NotReady => STATUS_NOT_READY,
            Error::NotFound => STATUS_NOT_FOUND,
            Error::Exists => STATUS_EXISTS,
            Error::Mxl(e) => e.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_status_codes_start_at_1024() {
        assert_eq!(Error::StrLen.status(), 1024);
        assert_eq!(Error::NotReady.status(), 1029);
        assert_eq!(Error::Exists.status(), 1031);
    }
}
