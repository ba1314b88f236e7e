//! Confirmation tracking of a single signed transaction
//!
//! A tracker broadcasts once, then races a push watcher (signature subscription)
//! against a pull watcher (status polling) while re-broadcasting in the background.
//! The first watcher to see a terminal status wins. If neither does before the
//! deadline the transaction is reported as timed out, though it may still land.
//!
//! ```text
//! Unsent -> Broadcasting -> { Confirmed | Failed | TimedOut }
//! ```

use crate::clock::{self, Deadline};
use crate::config::DispatchConfig;
use crate::error::report_text;
use crate::network::{BroadcastOptions, Commitment, NetworkCapability, SignatureNotification};
use crate::simulate;
use crate::types::{transaction_id, Signature, Transaction};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

/// Timing and durability used by a tracker
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub timeout: Duration,
    pub resend_interval: Duration,
    pub poll_interval: Duration,
    pub commitment: Commitment,
    pub simulation_commitment: Commitment,
    pub simulation_timeout: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for TrackerSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            timeout: config.timeout,
            resend_interval: config.resend_interval,
            poll_interval: config.poll_interval,
            commitment: config.commitment,
            simulation_commitment: config.simulation_commitment,
            simulation_timeout: config.simulation_timeout,
        }
    }
}

impl TrackerSettings {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }
}

/// Final status observed for a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Confirmed { slot: u64 },
    /// Rejected on broadcast or failed on chain; `reason` is the network's text
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerOutcome {
    pub signature: Signature,
    /// The initial broadcast was accepted
    pub sent: bool,
    pub status: TerminalStatus,
    /// Failure description from a dry run, when one could be produced
    pub diagnostic: Option<String>,
    pub elapsed: Duration,
}

impl TrackerOutcome {
    /// Best human-readable failure reason
    pub fn failure_reason(&self) -> Option<String> {
        match &self.status {
            TerminalStatus::Confirmed { .. } => None,
            TerminalStatus::Failed { reason } => {
                Some(self.diagnostic.clone().unwrap_or_else(|| reason.clone()))
            }
            TerminalStatus::TimedOut => Some(self.diagnostic.clone().unwrap_or_else(|| {
                "timed out awaiting confirmation; the transaction may still be processed"
                    .to_string()
            })),
        }
    }
}

/// Drives one transaction to a terminal status
pub struct ConfirmationTracker<'a, N> {
    network: &'a N,
    settings: &'a TrackerSettings,
}

impl<'a, N: NetworkCapability> ConfirmationTracker<'a, N> {
    pub fn new(network: &'a N, settings: &'a TrackerSettings) -> Self {
        Self { network, settings }
    }

    /// Broadcast `transaction` and wait for its terminal status
    ///
    /// `on_sent` is called once, as soon as the initial broadcast is accepted.
    pub async fn run<F>(&self, transaction: &Transaction, on_sent: F) -> TrackerOutcome
    where
        F: FnOnce(&Signature),
    {
        let started = clock::now();
        let deadline = Deadline::after(self.settings.timeout);
        let signature = transaction_id(transaction).unwrap_or_default();
        let options = BroadcastOptions::default();

        let initial = tokio::time::timeout_at(
            deadline.instant(),
            self.network.broadcast(transaction, &options),
        )
        .await;

        let (sent, status) = match initial {
            Ok(Ok(_)) => {
                tracing::info!("Started awaiting confirmation for {}", signature);
                on_sent(&signature);
                (true, self.await_confirmation(transaction, &signature, &deadline, &options).await)
            }
            Ok(Err(e)) => {
                let reason = report_text(&e);
                tracing::warn!("Broadcast of {} rejected: {}", signature, reason);
                (false, TerminalStatus::Failed { reason })
            }
            Err(_) => (false, TerminalStatus::TimedOut),
        };

        let diagnostic = match status {
            TerminalStatus::Confirmed { .. } => None,
            _ => {
                simulate::diagnose(
                    self.network,
                    transaction,
                    self.settings.simulation_commitment,
                    self.settings.simulation_timeout,
                )
                .await
            }
        };

        let elapsed = started.elapsed();
        match &status {
            TerminalStatus::Confirmed { slot } => {
                tracing::info!("Confirmed {} at slot {} in {:?}", signature, slot, elapsed)
            }
            TerminalStatus::Failed { reason } => {
                tracing::warn!("Transaction {} failed after {:?}: {}", signature, elapsed, reason)
            }
            TerminalStatus::TimedOut => {
                tracing::warn!("Timed out awaiting confirmation of {} after {:?}", signature, elapsed)
            }
        }

        TrackerOutcome {
            signature,
            sent,
            status,
            diagnostic,
            elapsed,
        }
    }

    async fn await_confirmation(
        &self,
        transaction: &Transaction,
        signature: &Signature,
        deadline: &Deadline,
        options: &BroadcastOptions,
    ) -> TerminalStatus {
        // dropping the handle also releases it if this future is cancelled
        let mut subscription = match tokio::time::timeout_at(
            deadline.instant(),
            self.network
                .subscribe_signature(signature, self.settings.commitment),
        )
        .await
        {
            Ok(Ok(subscription)) => Some(subscription),
            Ok(Err(e)) => {
                tracing::warn!(
                    "Signature subscription for {} unavailable, polling only: {}",
                    signature,
                    report_text(&e)
                );
                None
            }
            Err(_) => None,
        };

        let status = tokio::select! {
            biased;
            status = push_watcher(subscription.as_mut().map(|s| &mut s.notifications)) => status,
            status = self.pull_watcher(signature) => status,
            _ = deadline.wait() => TerminalStatus::TimedOut,
            never = self.rebroadcast(transaction, options) => match never {},
        };

        if let Some(subscription) = subscription {
            if let Err(e) = self.network.unsubscribe(subscription.id).await {
                tracing::warn!(
                    "Failed to close subscription {}: {}",
                    subscription.id,
                    report_text(&e)
                );
            }
        }
        status
    }

    /// Poll status until the network reports a terminal result
    async fn pull_watcher(&self, signature: &Signature) -> TerminalStatus {
        loop {
            match self.network.poll_signature_status(signature).await {
                Ok(Some(status)) if status.is_failed() => {
                    return TerminalStatus::Failed {
                        reason: status.err.unwrap_or_default(),
                    };
                }
                Ok(Some(status)) if status.is_confirmed() => {
                    return TerminalStatus::Confirmed { slot: status.slot };
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Status lookup for {} failed: {}", signature, report_text(&e));
                }
            }
            clock::sleep(self.settings.poll_interval).await;
        }
    }

    async fn rebroadcast(&self, transaction: &Transaction, options: &BroadcastOptions) -> Infallible {
        loop {
            clock::sleep(self.settings.resend_interval).await;
            if let Err(e) = self.network.broadcast(transaction, options).await {
                tracing::debug!("Re-broadcast failed: {}", report_text(&e));
            }
        }
    }
}

/// Wait for the subscription's notification; a closed or missing channel never resolves
async fn push_watcher(
    notifications: Option<&mut mpsc::UnboundedReceiver<SignatureNotification>>,
) -> TerminalStatus {
    if let Some(notifications) = notifications {
        if let Some(notification) = notifications.recv().await {
            return match notification.err {
                Some(reason) => TerminalStatus::Failed { reason },
                None => TerminalStatus::Confirmed {
                    slot: notification.slot,
                },
            };
        }
    }
    std::future::pending().await
}
