use failsafe::{backoff, failure_policy, Config, StateMachine, Error};
use failsafe::futures::CircuitBreaker;
use std::time::Duration;
use crate::core::errors::AppError;

/// Circuit breaker guarding outbound calls to external collaborators
///
/// Policy:
/// - 5 consecutive failures trips the breaker OPEN
/// - 30 seconds cool-down before HALF-OPEN (retry)
pub type DependencyCircuitBreaker = StateMachine<
    failure_policy::ConsecutiveFailures<backoff::Constant>,
    ()
>;

pub fn create_circuit_breaker() -> DependencyCircuitBreaker {
    Config::new()
        .failure_policy(failure_policy::consecutive_failures(
            5,
            backoff::constant(Duration::from_secs(30)),
        ))
        .build()
}

/// Run a fallible async operation under circuit breaker protection
///
/// Inner failures map to `DependencyFailure { service }`, rejections while
/// the breaker is open map to `TransientError`.
pub async fn execute_with_cb<F, Fut, T, E>(
    cb: &DependencyCircuitBreaker,
    service: &str,
    operation: F,
) -> Result<T, AppError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    match cb.call(operation()).await {
        Ok(val) => Ok(val),
        Err(Error::Inner(e)) => Err(AppError::DependencyFailure {
            service: service.to_string(),
            error: e.to_string(),
        }),
        Err(Error::Rejected) => Err(AppError::TransientError(format!(
            "{} circuit open",
            service
        ))),
    }
}
