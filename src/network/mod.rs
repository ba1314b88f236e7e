//! Network capability abstraction
//!
//! The engine never talks to the ledger directly: everything goes through a
//! [`NetworkCapability`], so the same dispatcher runs against the RPC adapter
//! ([`RpcNetwork`]) or a scripted double in tests.

mod rpc;

pub use rpc::RpcNetwork;

use crate::types::{Hash, Signature, Transaction};
use eyre::Result;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Durability level requested from the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Seen by the connected node
    #[default]
    Processed,
    /// Voted on by a supermajority
    Confirmed,
    /// Rooted; will not be rolled back
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Commitment> for CommitmentLevel {
    fn from(commitment: Commitment) -> Self {
        match commitment {
            Commitment::Processed => CommitmentLevel::Processed,
            Commitment::Confirmed => CommitmentLevel::Confirmed,
            Commitment::Finalized => CommitmentLevel::Finalized,
        }
    }
}

impl From<Commitment> for CommitmentConfig {
    fn from(commitment: Commitment) -> Self {
        CommitmentConfig {
            commitment: commitment.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown commitment level: {0}")]
pub struct ParseCommitmentError(String);

impl FromStr for Commitment {
    type Err = ParseCommitmentError;

    /// Accepts current names and the deprecated aliases still seen in configs
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processed" | "recent" => Ok(Self::Processed),
            "confirmed" | "single" | "singlegossip" => Ok(Self::Confirmed),
            "finalized" | "root" | "max" => Ok(Self::Finalized),
            other => Err(ParseCommitmentError(other.to_string())),
        }
    }
}

/// Recent block reference a transaction is signed against
///
/// A transaction is only valid until the network passes
/// `last_valid_block_height`; after that it must be re-signed with a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

impl Checkpoint {
    pub fn new(blockhash: Hash, last_valid_block_height: u64) -> Self {
        Self {
            blockhash,
            last_valid_block_height,
        }
    }
}

/// Options for submitting a signed transaction
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    /// Skip the node's pre-flight simulation
    pub skip_preflight: bool,
    /// Commitment used by pre-flight when it is enabled
    pub preflight_commitment: Option<Commitment>,
    /// How often the node itself may retry; `None` leaves the node default
    pub max_retries: Option<usize>,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            skip_preflight: true,
            preflight_commitment: None,
            max_retries: None,
        }
    }
}

/// Result of a signature status lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// Blocks confirmed on top; `None` once the slot is rooted
    pub confirmations: Option<u64>,
    /// Execution error, if the transaction failed
    pub err: Option<String>,
    pub confirmation_status: Option<Commitment>,
}

impl SignatureStatus {
    pub fn is_failed(&self) -> bool {
        self.err.is_some()
    }

    /// Whether this status counts as a successful confirmation
    pub fn is_confirmed(&self) -> bool {
        if self.is_failed() {
            return false;
        }
        let voted = matches!(
            self.confirmation_status,
            Some(Commitment::Confirmed) | Some(Commitment::Finalized)
        );
        match self.confirmations {
            None => true,
            Some(count) => count > 0 || voted,
        }
    }
}

/// Push notification for a subscribed signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureNotification {
    pub slot: u64,
    pub err: Option<String>,
}

/// Local handle of an open signature subscription
pub type SubscriptionId = u64;

/// An open signature subscription and the channel its notifications arrive on
///
/// Dropping the handle cancels its token, so a subscription is released even when
/// the task that opened it is cancelled before it can call
/// [`NetworkCapability::unsubscribe`].
pub struct SignatureSubscription {
    pub id: SubscriptionId,
    pub notifications: mpsc::UnboundedReceiver<SignatureNotification>,
    _release: DropGuard,
}

impl SignatureSubscription {
    /// Handle whose drop cancels `release`
    pub fn new(
        id: SubscriptionId,
        notifications: mpsc::UnboundedReceiver<SignatureNotification>,
        release: CancellationToken,
    ) -> Self {
        Self {
            id,
            notifications,
            _release: release.drop_guard(),
        }
    }
}

impl fmt::Debug for SignatureSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Outcome of a dry run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationResult {
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub units_consumed: Option<u64>,
}

/// Everything the engine needs from the ledger network
///
/// Implementations must be shareable across concurrently running trackers.
pub trait NetworkCapability: Send + Sync {
    /// Fetch a recent checkpoint at the given durability level
    fn fresh_checkpoint(
        &self,
        commitment: Commitment,
    ) -> impl std::future::Future<Output = Result<Checkpoint>> + Send;

    /// Submit a signed transaction, returning its signature
    fn broadcast(
        &self,
        transaction: &Transaction,
        options: &BroadcastOptions,
    ) -> impl std::future::Future<Output = Result<Signature>> + Send;

    /// Open a push subscription for a signature's status
    fn subscribe_signature(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> impl std::future::Future<Output = Result<SignatureSubscription>> + Send;

    /// Close a subscription opened by [`subscribe_signature`](Self::subscribe_signature)
    fn unsubscribe(&self, id: SubscriptionId) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Look up a signature's status; `None` when the network has not seen it
    fn poll_signature_status(
        &self,
        signature: &Signature,
    ) -> impl std::future::Future<Output = Result<Option<SignatureStatus>>> + Send;

    /// Dry-run a transaction
    fn simulate(
        &self,
        transaction: &Transaction,
        commitment: Commitment,
    ) -> impl std::future::Future<Output = Result<SimulationResult>> + Send;
}
