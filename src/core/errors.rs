// Domain error types - Secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the attendance gate
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed, unsigned or expired session credential (HTTP 401)
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Operation strictly requires a session and none was presented (HTTP 401)
    #[error("Authentication required")]
    Unauthenticated,

    /// Email verification token absent, expired or already used (HTTP 400)
    #[error("Verification ticket expired or invalid")]
    TicketExpiredOrInvalid,

    /// Caller is authenticated but below the required tier (HTTP 403)
    #[error("Forbidden")]
    Forbidden,

    /// Resource genuinely absent, or an attendance link that no longer resolves (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write attempted after the event's registration deadline (HTTP 400)
    #[error("Registration closed")]
    RegistrationClosed,

    /// Request payload or parameter failed validation (HTTP 400)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Cryptographic error (HTTP 500)
    #[error("Cryptographic error: {0}")]
    CryptoError(#[from] CryptoError),

    /// Configuration error (HTTP 500)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Expiring key-value store error (HTTP 500)
    #[error("State error: {0}")]
    StateError(String),

    /// Relational store error (HTTP 500)
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Downstream collaborator failed (HTTP 502)
    #[error("Dependency failure ({service}): {error}")]
    DependencyFailure { service: String, error: String },

    /// Downstream collaborator temporarily unavailable (HTTP 503)
    #[error("Transient error: {0}")]
    TransientError(String),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Signing secret missing or too weak
    #[error("Failed to load signing key: {0}")]
    KeyLoadError(String),

    /// Failed to sign token
    #[error("Failed to sign token: {0}")]
    SigningError(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::InvalidCredential(_) => 401,
            AppError::Unauthenticated => 401,
            AppError::TicketExpiredOrInvalid => 400,
            AppError::Forbidden => 403,
            AppError::NotFound(_) => 404,
            AppError::RegistrationClosed => 400,
            AppError::ValidationError(_) => 400,
            AppError::CryptoError(_) => 500,
            AppError::ConfigurationError(_) => 500,
            AppError::StateError(_) => 500,
            AppError::DatabaseError(_) => 500,
            AppError::DependencyFailure { .. } => 502,
            AppError::TransientError(_) => 503,
        }
    }

    /// Get user-friendly error message (no sensitive information)
    ///
    /// `NotFound` never echoes what was looked up, so a replayed attendance
    /// link reads exactly like one that never existed.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidCredential(_) => "Invalid credential".to_string(),
            AppError::Unauthenticated => "Authentication required".to_string(),
            AppError::TicketExpiredOrInvalid => "The login link is invalid or has expired".to_string(),
            AppError::Forbidden => "Forbidden".to_string(),
            AppError::NotFound(_) => "Not found".to_string(),
            AppError::RegistrationClosed => "Registration for this event is closed".to_string(),
            AppError::ValidationError(reason) => format!("Validation failed: {}", reason),
            AppError::CryptoError(_) => "Internal error".to_string(),
            AppError::ConfigurationError(_) => "Internal error".to_string(),
            AppError::StateError(_) => "Internal error".to_string(),
            AppError::DatabaseError(_) => "Internal error".to_string(),
            AppError::DependencyFailure { .. } => "Service unavailable".to_string(),
            AppError::TransientError(_) => "Service unavailable".to_string(),
        }
    }
}
