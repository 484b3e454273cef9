// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Machine-readable error codes rendered to HTTP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    Unavailable,
    Timeout,
    OperationFailed,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unavailable => 503,
            Self::Timeout => 504,
            Self::OperationFailed => 502,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unavailable => "UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::OperationFailed => "OPERATION_FAILED",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

// -- Manager protocol ---------------------------------------------------------

/// Failures of the manager protocol client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManagerError {
    /// Socket-level failure. Triggers reconnection.
    #[error("transport error: {0}")]
    Transport(String),
    /// Login rejected. The socket is discarded; a retry needs a new connection.
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("command queue timeout")]
    QueueTimeout,
    #[error("response timeout")]
    ResponseTimeout,
    #[error("not connected to PBX")]
    NotConnected,
}

impl ManagerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueTimeout | Self::ResponseTimeout => ErrorCode::Timeout,
            Self::Transport(_) | Self::Auth(_) | Self::NotConnected => ErrorCode::Unavailable,
        }
    }
}

impl From<std::io::Error> for ManagerError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

// -- Call control -------------------------------------------------------------

/// The call-control operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOp {
    Originate,
    Hangup,
    Answer,
    Transfer,
    Hold,
    Unhold,
    Status,
    ListChannels,
    EndpointStatus,
}

impl CallOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Originate => "origination",
            Self::Hangup => "hangup",
            Self::Answer => "answer",
            Self::Transfer => "transfer",
            Self::Hold => "hold",
            Self::Unhold => "unhold",
            Self::Status => "status query",
            Self::ListChannels => "channel listing",
            Self::EndpointStatus => "endpoint status",
        }
    }
}

impl fmt::Display for CallOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced verbatim to the HTTP layer by call-control operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No ready PBX connection. Raised before any network attempt.
    #[error("PBX unavailable: not connected")]
    NotConnected,
    /// The PBX answered with a non-success response.
    #[error("{op} failed: {reason}")]
    Failed { op: CallOp, reason: String },
    #[error("{op}: {source}")]
    Manager {
        op: CallOp,
        #[source]
        source: ManagerError,
    },
}

impl CallError {
    pub(crate) fn from_manager(op: CallOp, source: ManagerError) -> Self {
        match source {
            ManagerError::NotConnected => Self::NotConnected,
            source => Self::Manager { op, source },
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotConnected => ErrorCode::Unavailable,
            Self::Failed { .. } => ErrorCode::OperationFailed,
            Self::Manager { source, .. } => source.code(),
        }
    }
}

// -- Hub delivery -------------------------------------------------------------

/// Hub unicast/broadcast failures. Never fatal to the sender.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("no client found for extension: {0}")]
    NoSuchExtension(String),
    #[error("failed to send message to any client for extension {0}")]
    AllClientsFailed(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("hub is shut down")]
    HubClosed,
}

impl DeliveryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoSuchExtension(_) => ErrorCode::NotFound,
            Self::AllClientsFailed(_) | Self::HubClosed => ErrorCode::Unavailable,
            Self::Encode(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
