// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the control plane.
//!
//! Each family is a small code enum with an HTTP mapping; handlers turn
//! them into `{error: {code, message}}` bodies.  Auth failures are never
//! logged with payload contents and are never retried server-side.

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope authentication failures, one rejection reason per
/// verification step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
    /// Envelope failed shape validation before any verification ran.
    Malformed,
    ClockSkew,
    ReplayDetected,
    UnknownAgent,
    SignatureInvalid,
}

impl AuthError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Malformed => 400,
            _ => 401,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "ENVELOPE_INVALID",
            Self::ClockSkew => "CLOCK_SKEW",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::UnknownAgent => "UNKNOWN_AGENT",
            Self::SignatureInvalid => "SIGNATURE_INVALID",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Malformed => "envelope failed validation",
            Self::ClockSkew => "message timestamp outside allowed window",
            Self::ReplayDetected => "nonce already used (replay detected)",
            Self::UnknownAgent => "unknown agent",
            Self::SignatureInvalid => "signature verification failed",
        }
    }
}

/// Enrollment failures, surfaced verbatim to the enrolling agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollError {
    TokenInvalid,
    TokenExpired,
    TokenExhausted,
}

impl EnrollError {
    pub fn http_status(&self) -> u16 {
        400
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenExhausted => "TOKEN_EXHAUSTED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::TokenInvalid => "invalid enrollment token",
            Self::TokenExpired => "enrollment token has expired",
            Self::TokenExhausted => "enrollment token usage limit reached",
        }
    }
}

/// Job dispatch failures.  None of these mutate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    AgentNotFound,
    CapabilityMissing,
    PermissionMissing,
    JobNotOwned,
    /// Result arrived for a job the sweep or a cancel already closed.
    JobClosed,
    /// Cancel refused because the job already left pending/queued.
    CancelRejected,
}

impl DispatchError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AgentNotFound => 404,
            Self::CapabilityMissing => 400,
            Self::PermissionMissing => 403,
            Self::JobNotOwned => 400,
            Self::JobClosed | Self::CancelRejected => 409,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::CapabilityMissing => "CAPABILITY_MISSING",
            Self::PermissionMissing => "PERMISSION_MISSING",
            Self::JobNotOwned => "JOB_NOT_OWNED",
            Self::JobClosed => "JOB_CLOSED",
            Self::CancelRejected => "CANCEL_REJECTED",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::AgentNotFound => "agent not found",
            Self::CapabilityMissing => "agent does not support the required capability",
            Self::PermissionMissing => "operator lacks the required permission",
            Self::JobNotOwned => "job not found for this agent",
            Self::JobClosed => "job already reached a terminal state",
            Self::CancelRejected => "job already left a cancellable state",
        }
    }
}

/// Transport-level failures for the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiError {
    Unauthorized,
    BadRequest,
    NotFound,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for EnrollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Build the `(status, body)` pair axum handlers return for a failure.
pub fn error_response(
    status: u16,
    code: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse {
        success: false,
        error: ErrorBody { code: code.to_owned(), message: message.into() },
    };
    (status, Json(body))
}

impl AuthError {
    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        error_response(self.http_status(), self.as_str(), self.message())
    }
}

impl EnrollError {
    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        error_response(self.http_status(), self.as_str(), self.message())
    }
}

impl DispatchError {
    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        error_response(self.http_status(), self.as_str(), self.message())
    }
}

impl ApiError {
    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        error_response(self.http_status(), self.as_str(), message)
    }
}
