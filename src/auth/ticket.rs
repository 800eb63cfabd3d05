// Passwordless email verification tickets

use std::sync::Arc;
use tracing::{debug, info};

use crate::api::CredentialStore;
use crate::core::crypto::{generate_opaque_token, TokenHash};
use crate::core::errors::AppError;

/// Default ticket lifetime: 5 minutes
pub const DEFAULT_TICKET_TTL_SECS: u64 = 5 * 60;

const TICKET_KEY_PREFIX: &str = "email-ticket:";

/// One-time email verification tickets staged in the expiring store
///
/// Only `hash(token)` is stored; the plaintext token leaves the process
/// exclusively inside the emailed link.
pub struct EmailTickets {
    store: Arc<dyn CredentialStore + Send + Sync>,
    ttl_secs: u64,
}

impl EmailTickets {
    pub fn new(store: Arc<dyn CredentialStore + Send + Sync>, ttl_secs: u64) -> Self {
        Self { store, ttl_secs }
    }

    /// Stage a ticket for `email` and return the plaintext token
    pub async fn issue(&self, email: &str) -> Result<String, AppError> {
        let email = normalize_email(email)?;
        let token = generate_opaque_token();
        let hash = TokenHash::of(&token);

        self.store
            .put_expiring(&ticket_key(&hash), &email, self.ttl_secs)
            .await?;

        info!(ticket_hash = %hash, ttl_secs = self.ttl_secs, "Verification ticket issued");
        Ok(token)
    }

    /// Consume a ticket exactly once and return the address it was issued for
    ///
    /// Expired, already used and never issued all yield `TicketExpiredOrInvalid`.
    pub async fn consume(&self, token: &str) -> Result<String, AppError> {
        let hash = TokenHash::of(token);
        match self.store.take(&ticket_key(&hash)).await? {
            Some(email) => {
                info!(ticket_hash = %hash, "Verification ticket consumed");
                Ok(email)
            }
            None => {
                debug!(ticket_hash = %hash, "Verification ticket missing");
                Err(AppError::TicketExpiredOrInvalid)
            }
        }
    }
}

fn ticket_key(hash: &TokenHash) -> String {
    format!("{}{}", TICKET_KEY_PREFIX, hash)
}

/// Trim and lowercase an address, rejecting anything without a local part and a domain
pub fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(email)
        }
        _ => Err(AppError::ValidationError("invalid email address".to_string())),
    }
}
