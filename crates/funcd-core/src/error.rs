// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for funcd-core.

use thiserror::Error;

/// Errors produced while decoding protocol lines.
///
/// A parse error never mutates manager state: the offending line is logged
/// and skipped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line does not start with a known keyword.
    #[error("unexpected line format")]
    UnexpectedLine,

    /// `FUNCTION_CANCEL` must carry exactly one transaction id.
    #[error("unexpected FUNCTION_CANCEL format")]
    MalformedCancel,

    /// The quoted, space-delimited fields could not be split.
    #[error("failed to parse fields: {0}")]
    Fields(#[from] csv::Error),

    /// The call line has the wrong number of fields.
    #[error("unexpected number of parts: want 6 or 7, got {0}")]
    FieldCount(usize),

    /// The timeout field is not an integer.
    #[error("invalid timeout value: {0}")]
    InvalidTimeout(#[from] std::num::ParseIntError),

    /// The quoted "name args..." field is empty.
    #[error("empty function name and arguments")]
    EmptyFunctionName,

    /// An unrecognized `FUNCTION_*` control token arrived while a payload was
    /// being captured.
    #[error("unexpected control line during payload: {0}")]
    UnexpectedControl(String),
}

/// Reasons the key scheduler refuses a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// The global pending counter reached the configured capacity.
    #[error("scheduler queue is full")]
    QueueFull,

    /// The scheduler no longer accepts work.
    #[error("scheduler is stopping")]
    Stopping,

    /// The request has no transaction id or no schedule key.
    #[error("scheduler invalid request")]
    Invalid,
}

/// Crate-level errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager must be built from within a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    /// `run` was called on a manager that already ran.
    #[error("functions manager is already running")]
    AlreadyRunning,
}

/// Result type using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
