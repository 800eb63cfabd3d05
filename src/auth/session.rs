// Session credential codec: HS256-signed, time-bound bearer tokens

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::collections::HashSet;

use crate::core::crypto::SigningSecret;
use crate::core::errors::{AppError, CryptoError};
use crate::core::models::{SessionClaims, SessionUser};

/// Default credential lifetime: 3 days
pub const DEFAULT_SESSION_TTL_SECS: i64 = 3 * 24 * 60 * 60;

/// Longest accepted credential lifetime: 365 days
pub const MAX_SESSION_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Minimum accepted length of the HMAC secret in bytes
pub const MIN_SECRET_BYTES: usize = 32;

/// Freshly issued credential plus its decoded claims
///
/// `expires_at` gives the cookie the same lifetime as the credential.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies session credentials
///
/// Stateless: validity is decided by signature and expiry alone.
pub struct SessionCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionCodec {
    /// Build a codec from the process-wide signing secret
    pub fn new(secret: &SigningSecret, ttl_secs: i64) -> Result<Self, CryptoError> {
        let key = secret.expose_secret().as_bytes();
        if key.len() < MIN_SECRET_BYTES {
            return Err(CryptoError::KeyLoadError(format!(
                "session secret must be at least {} bytes, got {}",
                MIN_SECRET_BYTES,
                key.len()
            )));
        }
        if ttl_secs <= 0 || ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(CryptoError::KeyLoadError(format!(
                "session ttl must be between 1 and {} seconds, got {}",
                MAX_SESSION_TTL_SECS, ttl_secs
            )));
        }
        let ttl = Duration::try_seconds(ttl_secs)
            .ok_or_else(|| CryptoError::KeyLoadError("session ttl out of range".to_string()))?;

        // Expiry is checked against an explicit clock in `verify_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            validation,
            ttl,
        })
    }

    pub fn issue(&self, user: &SessionUser) -> Result<IssuedSession, CryptoError> {
        self.issue_at(user, Utc::now())
    }

    pub fn issue_at(&self, user: &SessionUser, now: DateTime<Utc>) -> Result<IssuedSession, CryptoError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| CryptoError::SigningError("expiry out of range".to_string()))?;
        let claims = SessionClaims {
            user: user.clone(),
            issued_at: now.timestamp(),
            expires_at: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;

        Ok(IssuedSession { token, claims, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, AppError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify signature, structure and expiry as of `now`
    ///
    /// A credential is valid up to and including its `exp` second.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, AppError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::InvalidCredential(e.to_string()))?;

        let claims = data.claims;
        if now.timestamp() > claims.expires_at {
            return Err(AppError::InvalidCredential("credential expired".to_string()));
        }
        if claims.issued_at > claims.expires_at {
            return Err(AppError::InvalidCredential("issued after expiry".to_string()));
        }

        Ok(claims)
    }
}
