// Redis-backed expiring credential store

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::api::CredentialStore;
use crate::core::errors::AppError;

/// GET followed by DEL, executed atomically inside Redis
const TAKE_SCRIPT: &str = r#"
local value = redis.call('GET', KEYS[1])
if value then
    redis.call('DEL', KEYS[1])
end
return value
"#;

/// Redis store for one-time credentials
///
/// `ConnectionManager` is cheap to clone and reconnects on its own, so every
/// operation clones it instead of sharing a lock.
pub struct RedisCredentialStore {
    connection_manager: ConnectionManager,
    take_script: Script,
}

impl RedisCredentialStore {
    /// Connect with retries (3 attempts, linear backoff) and verify with PING
    pub async fn new(redis_url: &str, connect_timeout_secs: u64) -> Result<Self, AppError> {
        const MAX_RETRIES: u32 = 3;
        const INITIAL_DELAY_MS: u64 = 1000;

        let mut connection_errors = Vec::new();

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                sleep(Duration::from_millis(INITIAL_DELAY_MS * attempt as u64)).await;
            }

            let store = match Self::try_create_connection(redis_url, connect_timeout_secs).await {
                Ok(store) => store,
                Err(e) => {
                    if attempt < MAX_RETRIES - 1 {
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = MAX_RETRIES,
                            error = %e,
                            "Redis connection attempt failed, retrying"
                        );
                    }
                    connection_errors.push(format!("attempt {}: {}", attempt + 1, e));
                    continue;
                }
            };

            match store.ping().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "Redis connection succeeded after retry");
                    }
                    return Ok(store);
                }
                Err(e) => {
                    connection_errors.push(format!("attempt {}: ping failed: {}", attempt + 1, e));
                }
            }
        }

        Err(AppError::StateError(format!(
            "Failed to connect to Redis after {} attempts: {}",
            MAX_RETRIES,
            connection_errors.join("; ")
        )))
    }

    async fn try_create_connection(redis_url: &str, connect_timeout_secs: u64) -> Result<Self, AppError> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::StateError(format!("Invalid Redis URL: {}", e)))?;

        let connection_manager = tokio::time::timeout(
            Duration::from_secs(connect_timeout_secs),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| {
            AppError::StateError(format!(
                "Redis connection timed out after {} seconds",
                connect_timeout_secs
            ))
        })?
        .map_err(|e| AppError::StateError(format!("Failed to create Redis connection: {}", e)))?;

        Ok(Self {
            connection_manager,
            take_script: Script::new(TAKE_SCRIPT),
        })
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    async fn put_expiring(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), AppError> {
        let mut conn = self.connection_manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| AppError::StateError(format!("Redis SET failed: {}", e)))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.connection_manager.clone();
        self.take_script
            .key(key)
            .invoke_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| AppError::StateError(format!("Redis GET+DEL failed: {}", e)))
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| AppError::StateError(format!("Redis PING failed: {}", e)))
    }
}
