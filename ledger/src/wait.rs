//! Polling waits for inclusion and finality.
//!
//! Both waits poll at the network's nominal block interval and give up on
//! either a caller deadline or a cancellation signal. Giving up never touches
//! the submission itself: it may still land, and the record stays in flight
//! for reconciliation.

use pharmachain_types::SubmissionRef;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{FinalReceipt, InclusionReceipt, LedgerAdapter, LedgerError, RetryPolicy};

#[derive(Debug, Default)]
struct Signal {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation signal. Cancelling wakes every wait sleeping between
/// polls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    signal: Arc<Signal>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.signal.cancelled.store(true, Ordering::Release);
        self.signal.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.signal.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    /// Upper bound on the whole wait. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl WaitOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

struct Poller<'a> {
    submission: SubmissionRef,
    interval: Duration,
    started: Instant,
    opts: &'a WaitOptions,
}

impl Poller<'_> {
    fn check(&self) -> Result<(), LedgerError> {
        if self.opts.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(LedgerError::Cancelled(self.submission));
        }
        if let Some(timeout) = self.opts.timeout {
            let waited = self.started.elapsed();
            if waited >= timeout {
                return Err(LedgerError::Timeout {
                    submission: self.submission,
                    waited,
                });
            }
        }
        Ok(())
    }

    /// Sleep one block interval, or until the deadline or a cancellation if
    /// either comes first.
    async fn tick(&self) {
        let mut step = self.interval;
        if let Some(timeout) = self.opts.timeout {
            let remaining = timeout.saturating_sub(self.started.elapsed());
            step = step.min(remaining);
        }
        match &self.opts.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(step) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(step).await,
        }
    }
}

/// Suspend until `submission` is recorded in a block.
pub async fn await_inclusion<L: LedgerAdapter + ?Sized>(
    ledger: &L,
    submission: &SubmissionRef,
    retry: &RetryPolicy,
    opts: &WaitOptions,
) -> Result<InclusionReceipt, LedgerError> {
    let poller = Poller {
        submission: *submission,
        interval: ledger.policy().block_interval(),
        started: Instant::now(),
        opts,
    };
    loop {
        poller.check()?;
        if let Some(receipt) = retry.run("receipt", || ledger.receipt(submission)).await? {
            tracing::debug!(%submission, block = %receipt.block, "submission included");
            return Ok(receipt);
        }
        poller.check()?;
        poller.tick().await;
    }
}

/// Suspend until `required` blocks have been built on top of the inclusion block.
pub async fn await_finality<L: LedgerAdapter + ?Sized>(
    ledger: &L,
    inclusion: &InclusionReceipt,
    required: u64,
    retry: &RetryPolicy,
    opts: &WaitOptions,
) -> Result<FinalReceipt, LedgerError> {
    let poller = Poller {
        submission: inclusion.submission,
        interval: ledger.policy().block_interval(),
        started: Instant::now(),
        opts,
    };
    loop {
        poller.check()?;
        let head = retry.run("block_height", || ledger.block_height()).await?;
        let confirmations = inclusion.block.confirmations_at(head);
        if confirmations >= required {
            tracing::debug!(
                submission = %inclusion.submission,
                head,
                confirmations,
                required,
                "submission final"
            );
            return Ok(FinalReceipt {
                inclusion: inclusion.clone(),
                head,
                confirmations,
            });
        }
        poller.check()?;
        poller.tick().await;
    }
}
