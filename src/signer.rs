//! Turning instruction groups into signed transactions
//!
//! Every group is compiled against the same checkpoint with the wallet as fee
//! payer, partially signed by its own co-signers, and then handed to the wallet in
//! a single approval request.

use crate::error::{report_text, DispatchError};
use crate::network::Checkpoint;
use crate::types::{
    wire_size, Hash, InstructionGroup, Keypair, Message, Pubkey, Transaction, PACKET_DATA_SIZE,
};
use crate::wallet::WalletCapability;
use std::collections::HashSet;
use std::fmt::Display;

/// Most accounts a single message can index
const MAX_ACCOUNT_KEYS: usize = 256;

/// Sign a single group
pub async fn sign<W: WalletCapability>(
    group: &InstructionGroup,
    checkpoint: &Checkpoint,
    wallet: &W,
) -> Result<Transaction, DispatchError> {
    let mut signed = sign_all(std::slice::from_ref(group), checkpoint, wallet).await?;
    signed.pop().ok_or(DispatchError::UserDeclined)
}

/// Sign every group with one wallet approval
///
/// The result is index-aligned with `groups`. Nothing is returned unless the
/// wallet signed all of them.
pub async fn sign_all<W: WalletCapability>(
    groups: &[InstructionGroup],
    checkpoint: &Checkpoint,
    wallet: &W,
) -> Result<Vec<Transaction>, DispatchError> {
    let payer = wallet.public_identity().ok_or(DispatchError::NotConnected)?;

    let mut prepared = Vec::with_capacity(groups.len());
    for (position, group) in groups.iter().enumerate() {
        if group.is_empty() {
            return Err(DispatchError::malformed(format!(
                "instruction group {} is empty",
                position
            )));
        }
        prepared.push(prepare(group, &payer, checkpoint.blockhash).map_err(|e| group_error(position, e))?);
    }

    tracing::info!(
        "Requesting wallet signature for {} transaction(s) at {}",
        prepared.len(),
        checkpoint.blockhash
    );

    let expected = prepared.len();
    let signed = match wallet.sign_all(prepared).await {
        Ok(signed) => signed,
        Err(e) => {
            tracing::warn!("Wallet declined signature request: {}", report_text(&e));
            return Err(DispatchError::UserDeclined);
        }
    };

    if signed.len() != expected {
        tracing::warn!(
            "Wallet returned {} transaction(s), expected {}",
            signed.len(),
            expected
        );
        return Err(DispatchError::UserDeclined);
    }
    if let Some(position) = signed.iter().position(|tx| !tx.is_signed()) {
        tracing::warn!("Wallet left transaction {} partially signed", position);
        return Err(DispatchError::UserDeclined);
    }

    Ok(signed)
}

/// Compile one group against `blockhash` and add its co-signers' signatures
fn prepare(group: &InstructionGroup, payer: &Pubkey, blockhash: Hash) -> eyre::Result<Transaction> {
    let mut keys: HashSet<&Pubkey> = HashSet::from([payer]);
    for ix in group.instructions() {
        keys.insert(&ix.program_id);
        keys.extend(ix.accounts.iter().map(|meta| &meta.pubkey));
    }
    if keys.len() > MAX_ACCOUNT_KEYS {
        eyre::bail!("{} accounts exceed the {} a message can hold", keys.len(), MAX_ACCOUNT_KEYS);
    }

    let message = Message::new_with_blockhash(group.instructions(), Some(payer), &blockhash);
    let mut tx = Transaction::new_unsigned(message);
    let cosigners: Vec<&Keypair> = group.signers().iter().collect();
    tx.try_partial_sign(&cosigners, blockhash)?;

    let size = wire_size(&tx)?;
    if size > PACKET_DATA_SIZE {
        eyre::bail!("transaction is {} bytes, limit is {}", size, PACKET_DATA_SIZE);
    }
    Ok(tx)
}

fn group_error(position: usize, err: impl Display) -> DispatchError {
    DispatchError::malformed(format!("instruction group {}: {}", position, err))
}
