//! Local keypair wallet

use super::WalletCapability;
use crate::types::{Keypair, Pubkey, Signer, Transaction};
use eyre::{Context, Result};

/// Wallet holding an ed25519 keypair in memory
///
/// Approves every request immediately. Intended for scripts, bots and tests where
/// no interactive wallet is available.
#[derive(Debug)]
pub struct LocalWallet {
    keypair: Keypair,
}

impl Clone for LocalWallet {
    fn clone(&self) -> Self {
        Self {
            keypair: self.keypair.insecure_clone(),
        }
    }
}

impl LocalWallet {
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Create a wallet from a base58-encoded 64-byte secret key
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let wallet = LocalWallet::from_base58("4Z7cXSyeFR8wNGMVXUE1TwtKn5D5Vu7FzEv69dokLv7K...")?;
    /// ```
    pub fn from_base58(secret: impl AsRef<str>) -> Result<Self> {
        let bytes = bs58::decode(secret.as_ref().trim())
            .into_vec()
            .context("Wallet secret key is not valid base58")?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| eyre::eyre!("Failed to parse wallet secret key: {}", e))?;
        Ok(Self { keypair })
    }

    /// Create a wallet from the `WALLET_SECRET_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("WALLET_SECRET_KEY")
            .context("WALLET_SECRET_KEY environment variable must be set")?;
        Self::from_base58(secret)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }
}

impl WalletCapability for LocalWallet {
    fn public_identity(&self) -> Option<Pubkey> {
        Some(self.keypair.pubkey())
    }

    async fn sign_all(&self, mut transactions: Vec<Transaction>) -> Result<Vec<Transaction>> {
        for tx in &mut transactions {
            let blockhash = tx.message.recent_blockhash;
            tx.try_partial_sign(&vec![&self.keypair], blockhash)
                .context("Failed to sign transaction")?;
        }
        tracing::debug!(
            "Local wallet {} signed {} transaction(s)",
            self.keypair.pubkey(),
            transactions.len()
        );
        Ok(transactions)
    }
}
