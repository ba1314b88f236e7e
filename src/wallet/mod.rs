//! Wallet capability abstraction
//!
//! The engine never holds the user's key. It asks a wallet for its public identity
//! (the fee payer) and for one batched approval covering every transaction of a
//! dispatch. Browser wallets, hardware wallets and the bundled [`LocalWallet`] all
//! fit behind [`WalletCapability`].

mod local;

pub use local::LocalWallet;

use crate::types::{Pubkey, Transaction};
use eyre::Result;

/// Trait for wallets able to co-sign prepared transactions
pub trait WalletCapability: Send + Sync {
    /// The wallet's public identity, or `None` while disconnected
    fn public_identity(&self) -> Option<Pubkey>;

    /// Add the wallet's signature to every transaction in one approval
    ///
    /// Must return the transactions in the order given. Any error is treated as
    /// the user declining the request.
    fn sign_all(
        &self,
        transactions: Vec<Transaction>,
    ) -> impl std::future::Future<Output = Result<Vec<Transaction>>> + Send;
}
