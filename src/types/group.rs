//! Instruction groups: one group becomes one transaction

use super::{Instruction, Keypair, Signer};
use sha2::{Digest, Sha256};

/// Instructions that must land atomically, plus the co-signers they require
///
/// Co-signers are keypairs held by the caller (typically accounts created by the
/// group itself). The wallet's own signature is added later, once per dispatch.
#[derive(Debug)]
pub struct InstructionGroup {
    instructions: Vec<Instruction>,
    signers: Vec<Keypair>,
}

impl Clone for InstructionGroup {
    fn clone(&self) -> Self {
        Self {
            instructions: self.instructions.clone(),
            signers: self.signers.iter().map(Keypair::insecure_clone).collect(),
        }
    }
}

impl InstructionGroup {
    pub fn new(instructions: Vec<Instruction>, signers: Vec<Keypair>) -> Self {
        Self {
            instructions,
            signers,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn signers(&self) -> &[Keypair] {
        &self.signers
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Instruction>, Vec<Keypair>) {
        (self.instructions, self.signers)
    }

    fn digest_into(&self, hasher: &mut Sha256) {
        hasher.update((self.instructions.len() as u64).to_le_bytes());
        for ix in &self.instructions {
            hasher.update(ix.program_id);
            hasher.update((ix.accounts.len() as u64).to_le_bytes());
            for meta in &ix.accounts {
                hasher.update(meta.pubkey);
                hasher.update([u8::from(meta.is_signer), u8::from(meta.is_writable)]);
            }
            hasher.update((ix.data.len() as u64).to_le_bytes());
            hasher.update(&ix.data);
        }
        hasher.update((self.signers.len() as u64).to_le_bytes());
        for signer in &self.signers {
            hasher.update(signer.pubkey());
        }
    }
}

/// Content fingerprint of a batch, stable across re-submissions of the same groups
pub fn batch_fingerprint(groups: &[InstructionGroup]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((groups.len() as u64).to_le_bytes());
    for group in groups {
        group.digest_into(&mut hasher);
    }
    hasher.finalize().into()
}
