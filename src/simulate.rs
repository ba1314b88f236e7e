//! Failure diagnostics via dry-run simulation

use crate::error::report_text;
use crate::network::{Commitment, NetworkCapability};
use crate::types::Transaction;
use std::time::Duration;

const PROGRAM_LOG_PREFIX: &str = "Program log: ";

/// Simulate `transaction` and describe why it fails
///
/// Returns `None` when the simulation succeeds, errors, or takes longer than
/// `limit`. The transaction itself is left untouched; the network is asked to
/// substitute a current blockhash.
pub async fn diagnose<N: NetworkCapability>(
    network: &N,
    transaction: &Transaction,
    commitment: Commitment,
    limit: Duration,
) -> Option<String> {
    let result = match tokio::time::timeout(limit, network.simulate(transaction, commitment)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::debug!("Diagnostic simulation failed: {}", report_text(&e));
            return None;
        }
        Err(_) => {
            tracing::debug!("Diagnostic simulation timed out after {:?}", limit);
            return None;
        }
    };

    let err = result.err?;
    let reason = result
        .logs
        .iter()
        .rev()
        .find_map(|line| line.strip_prefix(PROGRAM_LOG_PREFIX))
        .map(|message| format!("Transaction failed: {}", message))
        .unwrap_or(err);
    Some(reason)
}
