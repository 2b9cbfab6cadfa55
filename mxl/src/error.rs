// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for MXL operations.
//!
//! This module defines the error type returned by MXL API calls together with
//! the stable numeric status codes shared with other language bindings.

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Stable numeric status code associated with each error kind.
///
/// The values are part of the cross-language contract and never change:
/// `0` is success, `1..=11` are the core error codes.
pub type Status = u32;

pub const STATUS_OK: Status = 0;
pub const STATUS_UNKNOWN: Status = 1;
pub const STATUS_FLOW_NOT_FOUND: Status = 2;
pub const STATUS_OUT_OF_RANGE_TOO_LATE: Status = 3;
pub const STATUS_OUT_OF_RANGE_TOO_EARLY: Status = 4;
pub const STATUS_INVALID_FLOW_READER: Status = 5;
pub const STATUS_INVALID_FLOW_WRITER: Status = 6;
pub const STATUS_TIMEOUT: Status = 7;
pub const STATUS_INVALID_ARG: Status = 8;
pub const STATUS_CONFLICT: Status = 9;
pub const STATUS_PERMISSION_DENIED: Status = 10;
pub const STATUS_FLOW_INVALID: Status = 11;

/// Errors that can occur when using the MXL API.
///
/// Each variant maps to one of the stable numeric status codes via
/// [`Error::status`]. Environment failures (file system, mmap) are wrapped in
/// [`Error::Io`] with the failing operation as context; they report
/// [`STATUS_UNKNOWN`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An unclassified failure.
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// The requested flow ID does not exist in the domain.
    #[error("Flow not found")]
    FlowNotFound,

    /// Attempted to read data that is no longer available in the ring buffer
    /// (has been overwritten by newer data).
    #[error("Out of range - too late")]
    OutOfRangeTooLate,

    /// Attempted to read data that is not yet available in the ring buffer
    /// (index is ahead of the current head, or not enough slices are valid).
    #[error("Out of range - too early")]
    OutOfRangeTooEarly,

    /// The flow reader handle is invalid or has been released.
    #[error("Invalid flow reader")]
    InvalidFlowReader,

    /// The flow writer handle is invalid or has been released.
    #[error("Invalid flow writer")]
    InvalidFlowWriter,

    /// A blocking operation timed out before completing.
    #[error("Timeout")]
    Timeout,

    /// An argument passed to an MXL function was invalid.
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    /// A resource conflict occurred (e.g. a lock on the flow data file is
    /// already held in a conflicting mode).
    #[error("Conflict")]
    Conflict,

    /// The caller lacks permission for the requested operation.
    #[error("Permission denied")]
    PermissionDenied,

    /// The flow backing this handle was deleted and recreated; the mapping is
    /// stale and the caller must re-resolve the flow.
    #[error("Flow invalid (stale mapping)")]
    FlowInvalid,

    /// An operating system or file system call failed.
    #[error("{context}: {source}")]
    Io {
        /// The operation that failed (path and syscall).
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an I/O error with the failing operation as context.
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns the stable numeric status code for this error.
    pub fn status(&self) -> Status {
        match self {
            Error::Unknown(_) => STATUS_UNKNOWN,
            Error::FlowNotFound => STATUS_FLOW_NOT_FOUND,
            Error::OutOfRangeTooLate => STATUS_OUT_OF_RANGE_TOO_LATE,
            Error::OutOfRangeTooEarly => STATUS_OUT_OF_RANGE_TOO_EARLY,
            Error::InvalidFlowReader => STATUS_INVALID_FLOW_READER,
            Error::InvalidFlowWriter => STATUS_INVALID_FLOW_WRITER,
            Error::Timeout => STATUS_TIMEOUT,
            Error::InvalidArg(_) => STATUS_INVALID_ARG,
            Error::Conflict => STATUS_CONFLICT,
            Error::PermissionDenied => STATUS_PERMISSION_DENIED,
            Error::FlowInvalid => STATUS_FLOW_INVALID,
            Error::Io { .. } => STATUS_UNKNOWN,
        }
    }

    /// Converts a numeric status code back into a [`Result`].
    ///
    /// `STATUS_OK` maps to `Ok(())`; every other value maps to the matching
    /// error variant, with unrecognized codes reported as [`Error::Unknown`].
    pub fn from_status(status: Status) -> Result<()> {
        match status {
            STATUS_OK => Ok(()),
            STATUS_FLOW_NOT_FOUND => Err(Error::FlowNotFound),
            STATUS_OUT_OF_RANGE_TOO_LATE => Err(Error::OutOfRangeTooLate),
            STATUS_OUT_OF_RANGE_TOO_EARLY => Err(Error::OutOfRangeTooEarly),
            STATUS_INVALID_FLOW_READER => Err(Error::InvalidFlowReader),
            STATUS_INVALID_FLOW_WRITER => Err(Error::InvalidFlowWriter),
            STATUS_TIMEOUT => Err(Error::Timeout),
            STATUS_INVALID_ARG => Err(Error::InvalidArg(String::new())),
            STATUS_CONFLICT => Err(Error::Conflict),
            STATUS_PERMISSION_DENIED => Err(Error::PermissionDenied),
            STATUS_FLOW_INVALID => Err(Error::FlowInvalid),
            other => Err(Error::Unknown(format!("status code {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Error::FlowNotFound.status(), 2);
        assert_eq!(Error::OutOfRangeTooLate.status(), 3);
        assert_eq!(Error::OutOfRangeTooEarly.status(), 4);
        assert_eq!(Error::Timeout.status(), 7);
        assert_eq!(Error::FlowInvalid.status(), 11);
    }

    #[test]
    fn status_round_trip() {
        for status in 1..=11u32 {
            let err = Error::from_status(status).unwrap_err();
            assert_eq!(err.status(), status);
        }
        assert!(Error::from_status(STATUS_OK).is_ok());
    }
}
