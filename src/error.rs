//! Error types for Blazing
//!
//! All errors in the application are converted to `AppError`,
//! which implements `IntoResponse` for proper HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use thiserror::Error;

use crate::auth::SessionError;

/// Application-wide error type
///
/// Recoverable login failures turn into a redirect back to the
/// unauthenticated entry point. Everything that indicates inconsistent
/// server state becomes a generic 500 with no internal detail.
#[derive(Debug, Error)]
pub enum AppError {
    /// No session cookie, or a forged/malformed one (401)
    #[error(transparent)]
    Session(#[from] SessionError),

    /// OAuth callback state missing or not matching the state cookie
    #[error("OAuth state mismatch")]
    CsrfMismatch,

    /// OAuth callback carried no authorization code
    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    /// Identity provider answered with an error or an unexpected payload
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// Transport failure talking to the identity provider
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// User lookup/persistence exceeded its time budget (500)
    #[error("Persistence timed out")]
    PersistenceTimeout,

    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schema migration failure (fatal at startup)
    #[error("Migration error: {0}")]
    Migration(String),

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Short label used for logs and the error counter
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Session(SessionError::NoSession) => "no_session",
            AppError::Session(SessionError::InvalidSession) => "invalid_session",
            AppError::CsrfMismatch => "csrf_mismatch",
            AppError::MissingAuthorizationCode => "missing_code",
            AppError::Provider(_) => "provider",
            AppError::HttpClient(_) => "http_client",
            AppError::Database(_) => "database",
            AppError::PersistenceTimeout => "persistence_timeout",
            AppError::Config(_) => "config",
            AppError::Migration(_) => "migration",
            AppError::NotFound => "not_found",
            AppError::Internal(_) => "internal",
        }
    }

    /// Whether the login flow should simply be restarted
    pub fn restarts_login(&self) -> bool {
        matches!(
            self,
            AppError::CsrfMismatch
                | AppError::MissingAuthorizationCode
                | AppError::Provider(_)
                | AppError::HttpClient(_)
        )
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Session failures share one body so a client cannot tell a missing
    /// cookie from a rejected one.
    fn into_response(self) -> Response {
        use axum::Json;

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        if self.restarts_login() {
            tracing::warn!(error = %self, kind = self.kind(), "Login flow aborted");
            return Redirect::temporary("/").into_response();
        }

        let (status, error_message) = match &self {
            AppError::Session(_) => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            _ => {
                tracing::error!(error = %self, kind = self.kind(), "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
