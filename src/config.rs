// Configuration management

use secrecy::Secret;
use std::env;
use std::path::{Path, PathBuf};
use url::Url;

use crate::auth::session::{DEFAULT_SESSION_TTL_SECS, MAX_SESSION_TTL_SECS, MIN_SECRET_BYTES};
use crate::auth::ticket::DEFAULT_TICKET_TTL_SECS;
use crate::core::crypto::SigningSecret;
use crate::core::errors::AppError;

/// Deployment environment; production turns on the `Secure` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

/// Application configuration loaded from environment variables
///
/// All configuration is validated on load with clear error messages.
#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,
    pub public_origin: Url,
    pub app_env: AppEnv,

    // Redis configuration
    pub redis_url: String,
    pub redis_connection_timeout_secs: u64,

    // Database configuration
    pub database_url: String,
    pub database_max_connections: u32,
    /// Apply the embedded `migrations/` on startup
    pub run_migrations: bool,

    // Credential configuration
    pub session_secret: SigningSecret,
    pub session_ttl_secs: i64,
    pub email_ticket_ttl_secs: u64,

    // Mail delivery (log-only when no API URL is set)
    pub mail_api_url: Option<String>,
    pub mail_api_token: Option<Secret<String>>,
    pub mail_from: String,

    // Middleware configuration
    pub request_timeout_secs: u64,
    pub body_size_limit_bytes: usize,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    /// The session secret comes from `SESSION_SECRET_FILE` when set, otherwise
    /// from `SESSION_SECRET`.
    pub fn from_env() -> Result<Self, AppError> {
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let redis_url = Self::get_env_or_default("REDIS_URL", "redis://localhost:6379/0")?;

        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0")?,
            port: Self::parse_port()?,
            public_origin: Self::parse_origin(&Self::get_env_or_default(
                "PUBLIC_ORIGIN",
                "http://localhost:8000",
            )?)?,
            app_env: Self::parse_app_env(&Self::get_env_or_default("APP_ENV", "development")?)?,
            redis_connection_timeout_secs: Self::detect_redis_connection_timeout(&redis_url)?,
            redis_url,
            database_url: Self::get_required_env("DATABASE_URL")?,
            database_max_connections: Self::parse_u32_or_default("DATABASE_MAX_CONNECTIONS", 10)?,
            session_secret: Self::load_session_secret()?,
            run_migrations: Self::parse_bool_or_default("RUN_MIGRATIONS", true)?,
            session_ttl_secs: Self::parse_session_ttl(env::var("SESSION_TTL_SECS").ok().as_deref())?,
            email_ticket_ttl_secs: Self::parse_u64_or_default(
                "EMAIL_TICKET_TTL_SECS",
                DEFAULT_TICKET_TTL_SECS,
            )?,
            mail_api_url: Self::get_optional_env("MAIL_API_URL")?,
            mail_api_token: Self::get_optional_env("MAIL_API_TOKEN")?.map(Secret::new),
            mail_from: Self::get_env_or_default("MAIL_FROM", "no-reply@localhost")?,
            request_timeout_secs: Self::parse_u64_or_default("REQUEST_TIMEOUT_SECS", 30)?,
            body_size_limit_bytes: Self::parse_usize_or_default("BODY_SIZE_LIMIT_BYTES", 64 * 1024)?,
            log_level: Self::get_env_or_default("LOG_LEVEL", "info")?,
            log_format: Self::get_env_or_default("LOG_FORMAT", "json")?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }

    fn get_env_or_default(key: &str, default: &str) -> Result<String, AppError> {
        Ok(env::var(key).unwrap_or_else(|_| default.to_string()))
    }

    fn get_optional_env(key: &str) -> Result<Option<String>, AppError> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn get_required_env(key: &str) -> Result<String, AppError> {
        Self::get_optional_env(key)?
            .ok_or_else(|| AppError::ConfigurationError(format!("{} not set", key)))
    }

    fn load_session_secret() -> Result<SigningSecret, AppError> {
        let secret = match Self::get_optional_env("SESSION_SECRET_FILE")? {
            Some(path) => Self::read_secret_file(Path::new(&path))?,
            None => Self::get_required_env("SESSION_SECRET")?,
        };
        Self::validate_secret(&secret)?;
        Ok(SigningSecret::new(&secret))
    }

    /// Read a secret from a mounted file, ignoring a trailing newline
    fn read_secret_file(path: &Path) -> Result<String, AppError> {
        Self::validate_file_path(path, "Session secret file")?;
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigurationError(format!("Cannot read session secret file {:?}: {}", path, e))
        })?;
        Ok(raw.trim_end_matches(['\r', '\n']).to_string())
    }

    fn validate_secret(secret: &str) -> Result<(), AppError> {
        if secret.len() < MIN_SECRET_BYTES {
            return Err(AppError::ConfigurationError(format!(
                "SESSION_SECRET must be at least {} bytes",
                MIN_SECRET_BYTES
            )));
        }
        Ok(())
    }

    fn parse_port() -> Result<u16, AppError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port_str.parse::<u16>().map_err(|e| {
            AppError::ConfigurationError(format!("Invalid PORT value '{}': {}", port_str, e))
        })?;

        if port == 0 {
            return Err(AppError::ConfigurationError(
                "PORT must be between 1 and 65535".to_string(),
            ));
        }

        Ok(port)
    }

    fn parse_app_env(value: &str) -> Result<AppEnv, AppError> {
        match value.to_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "production" | "prod" => Ok(AppEnv::Production),
            other => Err(AppError::ConfigurationError(format!(
                "Invalid APP_ENV '{}': must be 'development' or 'production'",
                other
            ))),
        }
    }

    /// Public origin used to build emailed links; must be http(s) without a query
    ///
    /// The path always ends in `/` so relative joins keep a path prefix
    /// such as `https://host/app`.
    fn parse_origin(value: &str) -> Result<Url, AppError> {
        let mut url = Url::parse(value).map_err(|e| {
            AppError::ConfigurationError(format!("Invalid PUBLIC_ORIGIN '{}': {}", value, e))
        })?;
        if !matches!(url.scheme(), "http" | "https")
            || url.query().is_some()
            || url.fragment().is_some()
        {
            return Err(AppError::ConfigurationError(format!(
                "Invalid PUBLIC_ORIGIN '{}': must be an http(s) origin",
                value
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Session lifetime in seconds, 1 ..= 365 days
    fn parse_session_ttl(value: Option<&str>) -> Result<i64, AppError> {
        let Some(value) = value else {
            return Ok(DEFAULT_SESSION_TTL_SECS);
        };
        let ttl: u64 = Self::parse_positive("SESSION_TTL_SECS", value)?;
        match i64::try_from(ttl) {
            Ok(ttl) if ttl <= MAX_SESSION_TTL_SECS => Ok(ttl),
            _ => Err(AppError::ConfigurationError(format!(
                "SESSION_TTL_SECS must be at most {}",
                MAX_SESSION_TTL_SECS
            ))),
        }
    }

    fn parse_bool_or_default(key: &str, default: bool) -> Result<bool, AppError> {
        match env::var(key) {
            Ok(value) => match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(AppError::ConfigurationError(format!(
                    "Invalid {} value '{}': expected true or false",
                    key, value
                ))),
            },
            Err(_) => Ok(default),
        }
    }

    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, AppError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(key, &value),
            _ => Ok(default),
        }
    }

    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, AppError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(key, &value),
            _ => Ok(default),
        }
    }

    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, AppError> {
        match env::var(key) {
            Ok(value) => Self::parse_positive(key, &value),
            _ => Ok(default),
        }
    }

    fn parse_positive<T>(key: &str, value: &str) -> Result<T, AppError>
    where
        T: std::str::FromStr + PartialEq + Default,
        T::Err: std::fmt::Display,
    {
        let parsed = value.parse::<T>().map_err(|e| {
            AppError::ConfigurationError(format!("Invalid {} value '{}': {}", key, value, e))
        })?;

        if parsed == T::default() {
            return Err(AppError::ConfigurationError(format!(
                "{} must be greater than 0",
                key
            )));
        }

        Ok(parsed)
    }

    /// Redis connection timeout
    ///
    /// Overridden by REDIS_CONNECTION_TIMEOUT_SECS; otherwise 15s for a
    /// localhost Redis and 5s for anything else.
    fn detect_redis_connection_timeout(redis_url: &str) -> Result<u64, AppError> {
        if let Ok(val) = env::var("REDIS_CONNECTION_TIMEOUT_SECS") {
            return Self::parse_positive("REDIS_CONNECTION_TIMEOUT_SECS", &val);
        }

        let is_localhost = redis_url.contains("localhost") || redis_url.contains("127.0.0.1");
        Ok(if is_localhost { 15 } else { 5 })
    }

    fn validate(&self) -> Result<(), AppError> {
        Self::validate_url(&self.redis_url, "Redis URL")?;
        Self::validate_url(&self.database_url, "Database URL")?;
        if let Some(ref url) = self.mail_api_url {
            Self::validate_url(url, "Mail API URL")?;
        }
        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;
        Ok(())
    }

    fn validate_file_path(path: &Path, description: &str) -> Result<(), AppError> {
        if !path.exists() {
            return Err(AppError::ConfigurationError(format!(
                "{} not found at {:?}",
                description, path
            )));
        }

        if !path.is_file() {
            return Err(AppError::ConfigurationError(format!(
                "{} is not a file: {:?}",
                description, path
            )));
        }

        Ok(())
    }

    fn validate_url(url: &str, description: &str) -> Result<(), AppError> {
        Url::parse(url).map_err(|e| {
            AppError::ConfigurationError(format!("Invalid {} '{}': {}", description, url, e))
        })?;
        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<(), AppError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(AppError::ConfigurationError(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_log_format(format: &str) -> Result<(), AppError> {
        if format != "json" && format != "text" {
            return Err(AppError::ConfigurationError(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Test configuration that bypasses environment loading
    pub fn test_config() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8000,
            public_origin: Url::parse("http://localhost:8000").expect("static test origin"),
            app_env: AppEnv::Development,
            redis_url: "redis://localhost:6379/0".to_string(),
            redis_connection_timeout_secs: 15,
            database_url: "postgresql://localhost/attendance_test".to_string(),
            database_max_connections: 2,
            run_migrations: false,
            session_secret: SigningSecret::new("test-session-secret-0123456789abcdef"),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            email_ticket_ttl_secs: DEFAULT_TICKET_TTL_SECS,
            mail_api_url: None,
            mail_api_token: None,
            mail_from: "no-reply@localhost".to_string(),
            request_timeout_secs: 30,
            body_size_limit_bytes: 64 * 1024,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}
