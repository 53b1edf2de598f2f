/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use rand::{thread_rng, Rng};
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::is_transient;

/// Re-runs `work` from scratch while it fails with a transient write conflict.
///
/// `work` must be one all-or-nothing unit (typically a single `FederationDb::transact`
/// call) so an aborted attempt leaves nothing behind. Non-transient errors are returned
/// immediately; once `policy.attempts()` is used up the last conflict is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut work: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts();
    let max_backoff = policy.max_backoff();
    let mut backoff = policy.base_backoff();
    for attempt in 1..=max_attempts {
        match work().await {
            Ok(v) => {
                if attempt > 1 {
                    debug!(label, attempt, "succeeded after write conflict");
                }
                return Ok(v);
            }
            Err(e) if is_transient(&e) => {
                if attempt >= max_attempts {
                    warn!(label, attempt, "giving up after write conflicts: {e:#}");
                    return Err(e.context(format!("{label}: retry budget of {max_attempts} attempts exhausted")));
                }
                debug!(label, attempt, "write conflict, retrying: {e:#}");
                sleep_with_jitter(backoff).await;
                backoff = backoff.saturating_mul(2).min(max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop should return or error");
}

/// Sleeps `base` plus up to half of it again.
pub(crate) async fn sleep_with_jitter(base: Duration) {
    let spread = (base.as_millis() as u64 / 2).max(1);
    let jitter_ms: u64 = thread_rng().gen_range(0..=spread);
    tokio::time::sleep(base + Duration::from_millis(jitter_ms)).await;
}
