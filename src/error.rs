//! Error handling for Warden.
//!
//! Admission decisions resolve to booleans at the orchestrator boundary;
//! the error type here covers everything that legitimately crosses the
//! filter layer: rejections with an HTTP status, configuration problems,
//! and access-list collaborator failures.

use std::borrow::Cow;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use thiserror::Error;
use tracing::{error, warn};

/// A specialized Result type for Warden operations.
pub type Result<T> = std::result::Result<T, WardenError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// An IP, user, or token tier ran out of tokens.
    RateLimited,

    /// The client IP is on the deny list.
    IpBlacklisted,

    /// Missing or invalid tier configuration, or an unrecognized role.
    ConfigurationError,

    /// An authenticated request without a resolvable identity.
    InternalStateError,

    /// The allow/deny list collaborator failed. Too important to mask.
    AccessListUnavailable,
}

impl ErrorCode {
    /// HTTP status for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::IpBlacklisted => StatusCode::FORBIDDEN,
            Self::ConfigurationError | Self::InternalStateError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::AccessListUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Category label for metrics.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limit",
            Self::IpBlacklisted => "blacklist",
            Self::ConfigurationError => "configuration",
            Self::InternalStateError => "internal",
            Self::AccessListUnavailable => "access_list",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Warden.
///
/// Carries a short client-safe message and an optional internal message for
/// logging only; no internal detail leaks into a response body.
#[derive(Error, Debug)]
pub struct WardenError {
    code: ErrorCode,
    user_message: Cow<'static, str>,
    internal_message: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for WardenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl WardenError {
    /// Create a new error with code and client-safe message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both client-safe and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// A quota rejection (429).
    pub fn rate_limited(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::RateLimited, reason)
    }

    /// A blacklist rejection (403).
    pub fn blacklisted() -> Self {
        Self::new(ErrorCode::IpBlacklisted, "Access denied")
    }

    /// A configuration error. Fail closed per request; fatal at startup.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::ConfigurationError,
            "Request could not be processed",
            message,
        )
    }

    /// An internal-state error (identity missing in an authenticated
    /// context).
    pub fn internal_state(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalStateError,
            "Request could not be processed",
            message,
        )
    }

    /// An access-list collaborator failure (503).
    pub fn access_list(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::AccessListUnavailable,
            "Service temporarily unavailable",
            message,
        )
    }

    /// Attach the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the client-safe message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Log this error at a severity matching its code.
    pub fn log(&self) {
        match self.code {
            ErrorCode::RateLimited | ErrorCode::IpBlacklisted => {
                warn!(
                    error_code = %self.code,
                    user_message = %self.user_message,
                    "Request rejected"
                );
            }
            ErrorCode::ConfigurationError
            | ErrorCode::InternalStateError
            | ErrorCode::AccessListUnavailable => {
                error!(
                    error_code = %self.code,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Admission control error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "warden_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for WardenError {
    fn into_response(self) -> Response {
        self.log();

        // Plain-text body: a stable status plus a short reason, nothing
        // internal.
        (self.http_status(), self.user_message.into_owned()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_http_status() {
        assert_eq!(
            ErrorCode::RateLimited.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ErrorCode::IpBlacklisted.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::ConfigurationError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCode::AccessListUnavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_message_stays_out_of_user_message() {
        let error = WardenError::configuration("missing reseller tier");
        assert_eq!(error.user_message(), "Request could not be processed");

        let display = format!("{}", error);
        assert!(display.contains("missing reseller tier"));
    }

    #[test]
    fn display_includes_code() {
        let error = WardenError::rate_limited("Rate limit exceeded");
        assert!(format!("{}", error).contains("RateLimited"));
    }
}
