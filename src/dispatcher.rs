//! Dispatch requests and the sequence policies that drive trackers
//!
//! A request is either a single group or a batch of groups, each paired with the
//! co-signers it needs. The dispatcher runs one [`ConfirmationTracker`] per signed
//! record under the chosen [`SequencePolicy`] and reports progress to the
//! session's [`EventNotifier`].

use crate::error::DispatchError;
use crate::events::EventNotifier;
use crate::network::{Checkpoint, Commitment, NetworkCapability};
use crate::record::{DispatchRecord, RecordStatus};
use crate::tracker::{ConfirmationTracker, TerminalStatus, TrackerSettings};
use crate::types::{Instruction, InstructionGroup, Keypair};
use futures::future::join_all;
use std::time::Duration;

/// How the transactions of a batch are sent relative to each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SequencePolicy {
    /// All at once; wait for every tracker
    #[default]
    Parallel,
    /// One after another in index order; failures do not stop the loop
    Sequential,
    /// Like `Sequential`, but halt after the first record that fails or times out
    StopOnFirstFailure,
}

/// Instructions of a request
#[derive(Debug, Clone)]
pub enum InstructionSet {
    Single(Vec<Instruction>),
    Batch(Vec<Vec<Instruction>>),
}

/// Co-signers of a request, shaped like its [`InstructionSet`]
#[derive(Debug)]
pub enum SignerSet {
    Single(Vec<Keypair>),
    Batch(Vec<Vec<Keypair>>),
}

/// Shape of a validated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestMode {
    Single,
    Batch,
}

/// A dispatch call's input
#[derive(Debug)]
pub struct DispatchRequest {
    instructions: InstructionSet,
    signers: SignerSet,
    policy: SequencePolicy,
    commitment: Option<Commitment>,
    checkpoint: Option<Checkpoint>,
    timeout: Option<Duration>,
}

impl DispatchRequest {
    /// Create a request; shapes are checked when it is dispatched
    pub fn new(instructions: InstructionSet, signers: SignerSet) -> Self {
        Self {
            instructions,
            signers,
            policy: SequencePolicy::default(),
            commitment: None,
            checkpoint: None,
            timeout: None,
        }
    }

    /// Single-mode request for one group
    pub fn single(instructions: Vec<Instruction>, signers: Vec<Keypair>) -> Self {
        Self::new(InstructionSet::Single(instructions), SignerSet::Single(signers))
    }

    /// Batch-mode request from prepared groups
    pub fn batch(groups: Vec<InstructionGroup>) -> Self {
        let (instructions, signers) = groups
            .into_iter()
            .map(InstructionGroup::into_parts)
            .unzip();
        Self::new(InstructionSet::Batch(instructions), SignerSet::Batch(signers))
    }

    /// Set the sequence policy (batch mode only; single mode ignores it)
    pub fn with_policy(mut self, policy: SequencePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the session's durability level for this call
    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = Some(commitment);
        self
    }

    /// Sign against this checkpoint instead of fetching a fresh one
    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Override the session's confirmation timeout for this call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> SequencePolicy {
        self.policy
    }

    pub fn commitment(&self) -> Option<Commitment> {
        self.commitment
    }

    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Check the request's shape and pair instructions with their signers
    pub(crate) fn into_groups(self) -> Result<(RequestMode, Vec<InstructionGroup>), DispatchError> {
        match (self.instructions, self.signers) {
            (InstructionSet::Single(instructions), SignerSet::Single(signers)) => {
                if instructions.is_empty() {
                    return Err(DispatchError::malformed("instruction group is empty"));
                }
                Ok((
                    RequestMode::Single,
                    vec![InstructionGroup::new(instructions, signers)],
                ))
            }
            (InstructionSet::Batch(instructions), SignerSet::Batch(signers)) => {
                if instructions.is_empty() {
                    return Err(DispatchError::malformed("batch has no instruction groups"));
                }
                if instructions.len() != signers.len() {
                    return Err(DispatchError::malformed(format!(
                        "{} instruction groups but {} signer groups",
                        instructions.len(),
                        signers.len()
                    )));
                }
                if let Some(position) = instructions.iter().position(Vec::is_empty) {
                    return Err(DispatchError::malformed(format!(
                        "instruction group {} is empty",
                        position
                    )));
                }
                let groups = instructions
                    .into_iter()
                    .zip(signers)
                    .map(|(instructions, signers)| InstructionGroup::new(instructions, signers))
                    .collect();
                Ok((RequestMode::Batch, groups))
            }
            _ => Err(DispatchError::malformed(
                "instructions and signers must both be single or both be batched",
            )),
        }
    }
}

/// Runs trackers for prepared records under a sequence policy
pub(crate) struct Dispatcher<'a, N> {
    network: &'a N,
    notifier: &'a EventNotifier,
    settings: TrackerSettings,
}

impl<'a, N: NetworkCapability> Dispatcher<'a, N> {
    pub(crate) fn new(network: &'a N, notifier: &'a EventNotifier, settings: TrackerSettings) -> Self {
        Self {
            network,
            notifier,
            settings,
        }
    }

    /// Track every ready record; returns once the policy is satisfied
    pub(crate) async fn run(&self, records: &mut [DispatchRecord], policy: SequencePolicy) {
        let total = records.len();
        let ready = records.iter_mut().filter(|r| r.is_ready());

        match policy {
            SequencePolicy::Parallel => {
                join_all(ready.map(|record| self.track(record, total))).await;
            }
            SequencePolicy::Sequential => {
                for record in ready {
                    self.track(record, total).await;
                }
            }
            SequencePolicy::StopOnFirstFailure => {
                for record in ready {
                    self.track(record, total).await;
                    if matches!(record.status(), RecordStatus::Failed | RecordStatus::TimedOut) {
                        tracing::info!(
                            "Stopping batch after transaction {} did not confirm",
                            record.index()
                        );
                        break;
                    }
                }
            }
        }
    }

    async fn track(&self, record: &mut DispatchRecord, total: usize) {
        let Some(transaction) = record.transaction().cloned() else {
            return;
        };
        let index = record.index();
        let notifier = self.notifier;
        let tracker = ConfirmationTracker::new(self.network, &self.settings);

        let outcome = tracker
            .run(&transaction, |signature| {
                record.mark_sent(*signature);
                notifier.sent(*signature, index, total);
            })
            .await;
        record.resolve(&outcome);

        match outcome.status {
            TerminalStatus::Confirmed { slot } => {
                self.notifier.confirmation(index, outcome.signature, slot)
            }
            TerminalStatus::Failed { .. } => {
                if let Some(err) = record.error() {
                    self.notifier.error(Some(index), err);
                }
            }
            TerminalStatus::TimedOut => self.notifier.timeout(index),
        }
    }
}
