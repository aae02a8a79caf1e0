//! Bounded polling
//!
//! Every wait in the engine (connecting, node readiness, storage, rollouts)
//! goes through [`poll_until`]. The check decides per attempt whether the
//! condition holds, should be retried, or has failed for good.

use std::future::Future;

use tracing::{debug, info};

use crate::config::RetryPolicy;
use crate::error::CoreError;

/// Result of a single check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Condition satisfied
    Done(T),
    /// Not yet; the reason is kept for progress notices and the final error
    Retry(String),
}

/// Run `check` until it yields [`Attempt::Done`] or the budget runs out
///
/// `check` receives the 1-based attempt number. An `Err` from `check` is
/// fatal and returned immediately.
///
/// # Errors
/// Returns `CoreError::Timeout` once `policy.attempts` checks were retried,
/// or the error `check` returned
pub async fn poll_until<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut check: F,
) -> Result<T, CoreError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Attempt<T>, CoreError>>,
{
    let mut last = String::from("never checked");

    for attempt in 1..=policy.attempts {
        match check(attempt).await? {
            Attempt::Done(value) => {
                debug!(what, attempt, "condition met");
                return Ok(value);
            }
            Attempt::Retry(reason) => {
                if policy.notice_every > 0 && attempt % policy.notice_every == 0 {
                    info!(what, attempt, max = policy.attempts, %reason, "still waiting");
                } else {
                    debug!(what, attempt, %reason, "not ready");
                }
                last = reason;
            }
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(CoreError::Timeout {
        what: what.to_string(),
        attempts: policy.attempts,
        last,
    })
}
