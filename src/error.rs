//! Error types for the dispatch engine
//!
//! Wallet and network capabilities report failures with `eyre` so adapters can
//! attach context freely. The dispatcher folds those reports into the closed
//! [`DispatchError`] taxonomy that callers match on.

pub use eyre::{eyre, Context, Report, Result};

use thiserror::Error;

/// Errors surfaced by a dispatch call or carried on its events
///
/// `NotConnected`, `MalformedRequest`, `UserDeclined` and `CheckpointUnavailable`
/// abort the whole call. `TransactionFailed` and `DispatchTimeout` describe a single
/// record; they are reported as data on the outcome and on the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The wallet does not expose a public identity
    #[error("wallet not connected")]
    NotConnected,

    /// The request shape is inconsistent (caller programming error)
    #[error("malformed dispatch request: {0}")]
    MalformedRequest(String),

    /// The wallet rejected the batched signature request; nothing was broadcast
    #[error("user declined the signature request")]
    UserDeclined,

    /// No recent checkpoint could be fetched. Retryable by the caller.
    #[error("checkpoint unavailable: {0}")]
    CheckpointUnavailable(String),

    /// The transaction at `index` was rejected by the network or failed on chain
    #[error("transaction {index} failed: {reason}")]
    TransactionFailed { index: usize, reason: String },

    /// No terminal status was observed before the local timeout.
    ///
    /// The transaction may still land on the network later.
    #[error("timed out awaiting confirmation of transaction {index}; it may still be processed")]
    DispatchTimeout { index: usize },
}

impl DispatchError {
    /// Whether this error aborts the whole dispatch call
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::MalformedRequest(_)
                | Self::UserDeclined
                | Self::CheckpointUnavailable(_)
        )
    }

    /// Index of the record this error belongs to, if any
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::TransactionFailed { index, .. } | Self::DispatchTimeout { index } => Some(*index),
            _ => None,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest(reason.into())
    }
}

/// Flatten an `eyre` report into a single line, keeping the cause chain
pub(crate) fn report_text(report: &Report) -> String {
    format!("{:#}", report)
}
