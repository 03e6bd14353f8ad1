//! Application-level error replies.
//!
//! A [`Status`] is what a peer receives instead of a reply when dispatch
//! fails for a reason that does not warrant dropping the connection:
//! unknown service or method, undecodable payload, or a handler failure.
//! Statuses travel as text messages holding the JSON form of the struct,
//! which keeps them distinguishable from binary reply frames.

// Rust guideline compliant 2026-02

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status code carried by an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    /// The call was cancelled, usually because the hub is shutting down.
    Cancelled,
    /// Failure with no better classification.
    Unknown,
    /// The request payload could not be decoded into the expected type.
    InvalidArgument,
    /// No registered service or method matches the request.
    NotFound,
    /// The method exists but its call shape is not served (streaming).
    Unimplemented,
    /// Server-side failure (handler panic, reply marshal failure).
    Internal,
    /// The service is temporarily unable to handle the call.
    Unavailable,
}

impl Code {
    /// Wire name of the code, as it appears in the JSON status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Cancelled => "cancelled",
            Code::Unknown => "unknown",
            Code::InvalidArgument => "invalid_argument",
            Code::NotFound => "not_found",
            Code::Unimplemented => "unimplemented",
            Code::Internal => "internal",
            Code::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reply returned by handlers and produced by the hub on dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Status {
    /// Classification of the failure.
    pub code: Code,
    /// Human-readable detail.
    pub message: String,
}

impl Status {
    /// Build a status from a code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `cancelled` status.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    /// `invalid_argument` status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// `not_found` status.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// `unimplemented` status.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// `internal` status.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }
}
