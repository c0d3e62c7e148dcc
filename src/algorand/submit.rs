//! Submission with retry and confirmation polling.

use crate::algorand::client::{AlgodApi, AlgodError};
use crate::algorand::transaction::{encode_group, SignedTransaction, TxnError};
use crate::config::schema::SubmissionConfig;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("transaction {tx_id} not confirmed within {secs}s")]
    ConfirmationTimeout { tx_id: String, secs: u64 },
    #[error("submission failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: AlgodError },
    #[error(transparent)]
    Encode(#[from] TxnError),
}

/// How hard to try getting a transaction on chain.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th (0-based) 403 response.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * 2u32.saturating_pow(attempt)
    }

    /// Zero-delay policy for tests and offline tools.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: Duration::ZERO,
            confirmation_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

impl From<&SubmissionConfig> for RetryPolicy {
    fn from(cfg: &SubmissionConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff_base: Duration::from_secs(cfg.backoff_base_secs),
            confirmation_timeout: Duration::from_secs(cfg.confirmation_timeout_secs),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        }
    }
}

/// A transaction that made it into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_id: String,
    pub round: u64,
}

/// Submit a raw body, retrying 403s with exponential backoff.
///
/// Logic-eval rejections are final; other failures are retried immediately.
pub async fn submit_with_retry(
    api: &dyn AlgodApi,
    body: &[u8],
    policy: &RetryPolicy,
) -> Result<String, SubmitError> {
    let attempts = policy.max_attempts.max(1);
    let mut last = None;

    for attempt in 0..attempts {
        match api.send_raw_transaction(body).await {
            Ok(tx_id) => {
                debug!("Submitted {} on attempt {}", tx_id, attempt + 1);
                return Ok(tx_id);
            }
            Err(e) if e.is_logic_rejection() => {
                warn!("Transaction rejected by AVM: {}", e);
                return Err(SubmitError::Rejected(e.to_string()));
            }
            Err(e) => {
                warn!("Submit attempt {}/{} failed: {}", attempt + 1, attempts, e);
                if e.is_forbidden() && attempt + 1 < attempts {
                    let delay = policy.backoff(attempt);
                    info!("Backing off {:?} after HTTP 403", delay);
                    tokio::time::sleep(delay).await;
                }
                last = Some(e);
            }
        }
    }

    Err(SubmitError::Exhausted {
        attempts,
        last: last.unwrap_or(AlgodError::Decode("no attempts made".into())),
    })
}

/// Poll the pending pool until the transaction confirms, is dropped, or times out.
pub async fn wait_for_confirmation(
    api: &dyn AlgodApi,
    tx_id: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<u64, SubmitError> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match api.pending_transaction_info(tx_id).await {
            Ok(pending) => {
                if let Some(round) = pending.confirmed_round.filter(|r| *r > 0) {
                    return Ok(round);
                }
                if !pending.pool_error.is_empty() {
                    return Err(SubmitError::Rejected(pending.pool_error));
                }
            }
            Err(e) => debug!("Pending lookup for {} failed: {}", tx_id, e),
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(SubmitError::ConfirmationTimeout {
                tx_id: tx_id.to_string(),
                secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(poll).await;
    }
}

/// Submit a signed group and wait for the last transaction to confirm.
pub async fn submit_and_confirm(
    api: &dyn AlgodApi,
    group: &[SignedTransaction],
    policy: &RetryPolicy,
) -> Result<Confirmation, SubmitError> {
    let body = encode_group(group)?;
    let tx_id = match group.last() {
        Some(stx) => stx.id()?,
        None => return Err(TxnError::EmptyGroup.into()),
    };

    submit_with_retry(api, &body, policy).await?;
    let round =
        wait_for_confirmation(api, &tx_id, policy.confirmation_timeout, policy.poll_interval)
            .await?;
    info!("Confirmed {} in round {}", tx_id, round);
    Ok(Confirmation { tx_id, round })
}
