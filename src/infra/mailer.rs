// Outbound mail delivery

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::Mailer;
use crate::core::errors::AppError;
use crate::core::models::MailMessage;
use crate::core::resilience::{create_circuit_breaker, execute_with_cb, DependencyCircuitBreaker};

#[derive(Debug, Serialize)]
struct MailApiRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
}

/// Mailer posting JSON to an HTTP mail API behind a circuit breaker
pub struct HttpMailer {
    http_client: Client,
    api_url: String,
    api_token: Option<Secret<String>>,
    from: String,
    cb: DependencyCircuitBreaker,
}

impl HttpMailer {
    pub fn new(
        api_url: String,
        api_token: Option<Secret<String>>,
        from: String,
        timeout_secs: u64,
    ) -> Result<Self, AppError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| {
                AppError::ConfigurationError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            api_url,
            api_token,
            from,
            cb: create_circuit_breaker(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: MailMessage) -> Result<(), AppError> {
        let body = MailApiRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            text: &message.text,
        };

        let mut request = self.http_client.post(&self.api_url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        execute_with_cb(&self.cb, "mail", || async move {
            request.send().await?.error_for_status().map(|_| ())
        })
        .await?;

        info!(recipients = message.to.len(), subject = %message.subject, "Mail dispatched");
        Ok(())
    }
}

/// Mailer that only logs; used when no mail API is configured
///
/// Message bodies carry credentials, so only recipients and subject are logged
/// at info. The body is available at debug for local development.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: MailMessage) -> Result<(), AppError> {
        info!(recipients = ?message.to, subject = %message.subject, "Mail not sent (log-only mailer)");
        debug!(text = %message.text, "Log-only mail body");
        Ok(())
    }
}
