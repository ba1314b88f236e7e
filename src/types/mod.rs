//! Ledger data model
//!
//! Keys, instructions, messages and transactions are the ledger SDK's own types;
//! this crate only adds instruction groups and the batch fingerprint.

pub mod group;

pub use group::{batch_fingerprint, InstructionGroup};
pub use solana_sdk::hash::Hash;
pub use solana_sdk::instruction::{AccountMeta, Instruction};
pub use solana_sdk::message::Message;
pub use solana_sdk::packet::PACKET_DATA_SIZE;
pub use solana_sdk::pubkey::Pubkey;
pub use solana_sdk::signature::{Keypair, Signature};
pub use solana_sdk::signer::Signer;
pub use solana_sdk::transaction::Transaction;

/// Encoded size of a transaction on the wire
pub fn wire_size(transaction: &Transaction) -> eyre::Result<usize> {
    let size = bincode::serialized_size(transaction)?;
    Ok(size as usize)
}

/// Id of a transaction: its fee payer's signature
pub fn transaction_id(transaction: &Transaction) -> Option<Signature> {
    transaction.signatures.first().copied()
}
