//! Transaction dispatch and confirmation engine
//!
//! Takes groups of unsigned ledger instructions, has them signed by a wallet in a
//! single approval, broadcasts them and decides for each one whether it confirmed,
//! failed, or timed out, on a network that may drop, reorder or never answer.
//!
//! # Features
//!
//! - Single transactions, ordered batches, or transactions signed elsewhere
//! - Parallel, sequential and stop-on-first-failure sequencing
//! - Push (subscription) and pull (polling) confirmation with periodic re-broadcast
//! - Failure diagnostics from a dry-run simulation
//! - Resumable batches: confirmed transactions are never sent twice
//! - Progress events via callbacks or an ordered stream
//!
//! # Example
//!
//! ```rust,ignore
//! use txn_dispatch::{
//!     DispatchConfig, DispatchRequest, DispatchSession, EventKind, LocalWallet, RpcConfig,
//!     RpcNetwork, SequencePolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> eyre::Result<()> {
//!     let network = RpcNetwork::new(RpcConfig::from_env()?);
//!     let wallet = LocalWallet::from_env()?;
//!     let mut session = DispatchSession::new(wallet, network, DispatchConfig::default());
//!
//!     session.on(EventKind::Sent, |event| println!("sent: {:?}", event));
//!
//!     let outcome = session
//!         .dispatch(DispatchRequest::batch(groups).with_policy(SequencePolicy::Sequential))
//!         .await?;
//!     println!("{} of {} confirmed", outcome.confirmed(), outcome.records().len());
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod network;
pub mod record;
pub mod session;
pub mod signer;
pub mod simulate;
pub mod test_utils;
pub mod tracker;
pub mod types;
pub mod wallet;

#[cfg(test)]
mod tests;

// Re-export main types for convenience
pub use config::{DispatchConfig, RpcConfig};
pub use dispatcher::{DispatchRequest, InstructionSet, SequencePolicy, SignerSet};
pub use error::{eyre, Context, DispatchError, Report, Result};
pub use events::{DispatchEvent, EventKind, EventNotifier};
pub use network::{Checkpoint, Commitment, NetworkCapability, RpcNetwork, SimulationResult};
pub use record::{DispatchOutcome, DispatchRecord, RecordStatus};
pub use session::DispatchSession;
pub use tracker::{ConfirmationTracker, TerminalStatus, TrackerOutcome, TrackerSettings};
pub use types::{
    AccountMeta, Hash, Instruction, InstructionGroup, Keypair, Pubkey, Signature, Signer,
    Transaction,
};
pub use wallet::{LocalWallet, WalletCapability};
