//! Store liveness probe.

use std::time::Instant;

use codekeep_core::HealthCheck;

use crate::store::CodeStore;

/// Ping `store` and report the outcome as a [`HealthCheck`].
pub async fn check_store<S>(store: &S, component: &str) -> HealthCheck
where
    S: CodeStore + ?Sized,
{
    let started = Instant::now();
    let result = store.ping().await;
    let elapsed_ms = started.elapsed().as_millis() as i64;

    match result {
        Ok(()) => HealthCheck::healthy(component).with_response_time(elapsed_ms),
        Err(e) => {
            tracing::warn!(component, error = %e, "Store health check failed");
            HealthCheck::unhealthy(component, e.to_string()).with_response_time(elapsed_ms)
        }
    }
}
