//! Per-transaction bookkeeping and the aggregate result of a dispatch call

use crate::dispatcher::SequencePolicy;
use crate::error::DispatchError;
use crate::tracker::{TerminalStatus, TrackerOutcome};
use crate::types::{Signature, Transaction};

/// Status of a record within its current attempt
///
/// Moves `Unsent -> Pending -> {Confirmed, Failed, TimedOut}` and never back. Only
/// a new attempt (a re-dispatch of an unfinished batch) resets a non-confirmed
/// record to `Unsent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Unsent,
    /// Broadcast accepted, awaiting a terminal status
    Pending,
    Confirmed { slot: u64 },
    Failed,
    TimedOut,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed | Self::TimedOut)
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }
}

/// One transaction of a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    index: usize,
    transaction: Option<Transaction>,
    sent: bool,
    status: RecordStatus,
    failure_reason: Option<String>,
    signature: Option<Signature>,
    attempts: u32,
}

impl DispatchRecord {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            transaction: None,
            sent: false,
            status: RecordStatus::Unsent,
            failure_reason: None,
            signature: None,
            attempts: 0,
        }
    }

    /// Position of the instruction group this record belongs to
    pub fn index(&self) -> usize {
        self.index
    }

    /// Signed transaction of the latest attempt
    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    /// Whether the latest attempt's initial broadcast was accepted
    pub fn sent(&self) -> bool {
        self.sent
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Transaction id, once broadcast
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// Slot of the confirmation, if confirmed
    pub fn slot(&self) -> Option<u64> {
        match self.status {
            RecordStatus::Confirmed { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_confirmed(&self) -> bool {
        self.status.is_confirmed()
    }

    /// Ready to hand to a tracker: signed for this attempt but not yet broadcast
    pub(crate) fn is_ready(&self) -> bool {
        self.status == RecordStatus::Unsent && self.transaction.is_some()
    }

    /// Start a new attempt with a freshly signed transaction
    ///
    /// Confirmed records are final and are left untouched.
    pub(crate) fn begin_attempt(&mut self, transaction: Transaction) {
        if self.is_confirmed() {
            return;
        }
        self.transaction = Some(transaction);
        self.sent = false;
        self.status = RecordStatus::Unsent;
        self.failure_reason = None;
        self.signature = None;
        self.attempts += 1;
    }

    pub(crate) fn mark_sent(&mut self, signature: Signature) {
        if self.status == RecordStatus::Unsent {
            self.sent = true;
            self.signature = Some(signature);
            self.status = RecordStatus::Pending;
        }
    }

    /// Apply a tracker's terminal status; ignored once the record is terminal
    pub(crate) fn resolve(&mut self, outcome: &TrackerOutcome) {
        if self.status.is_terminal() {
            return;
        }
        self.signature = Some(outcome.signature);
        self.failure_reason = outcome.failure_reason();
        self.status = match outcome.status {
            TerminalStatus::Confirmed { slot } => RecordStatus::Confirmed { slot },
            TerminalStatus::Failed { .. } => RecordStatus::Failed,
            TerminalStatus::TimedOut => RecordStatus::TimedOut,
        };
    }

    /// The per-record error for a failed or timed out record
    pub fn error(&self) -> Option<DispatchError> {
        match self.status {
            RecordStatus::Failed => Some(DispatchError::TransactionFailed {
                index: self.index,
                reason: self.failure_reason.clone().unwrap_or_default(),
            }),
            RecordStatus::TimedOut => Some(DispatchError::DispatchTimeout { index: self.index }),
            _ => None,
        }
    }
}

/// Aggregate result of a dispatch call, records in index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    records: Vec<DispatchRecord>,
    policy: SequencePolicy,
    from_cache: bool,
}

impl DispatchOutcome {
    pub(crate) fn new(records: Vec<DispatchRecord>, policy: SequencePolicy, from_cache: bool) -> Self {
        Self {
            records,
            policy,
            from_cache,
        }
    }

    pub fn records(&self) -> &[DispatchRecord] {
        &self.records
    }

    pub fn policy(&self) -> SequencePolicy {
        self.policy
    }

    /// Answered from a completed batch without touching wallet or network
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Records that reached any status beyond `Unsent`
    pub fn attempted(&self) -> usize {
        self.records.len() - self.skipped()
    }

    /// Records never broadcast, e.g. after a stop on the first failure
    pub fn skipped(&self) -> usize {
        self.count(|s| s == RecordStatus::Unsent)
    }

    pub fn confirmed(&self) -> usize {
        self.count(|s| s.is_confirmed())
    }

    pub fn failed(&self) -> usize {
        self.count(|s| s == RecordStatus::Failed)
    }

    pub fn timed_out(&self) -> usize {
        self.count(|s| s == RecordStatus::TimedOut)
    }

    /// Every record confirmed
    pub fn is_success(&self) -> bool {
        self.confirmed() == self.records.len()
    }

    /// Signatures of all records, or the error of the first one not confirmed
    pub fn into_result(self) -> Result<Vec<Signature>, DispatchError> {
        let mut signatures = Vec::with_capacity(self.records.len());
        for record in &self.records {
            if let Some(err) = record.error() {
                return Err(err);
            }
            match (record.status(), record.signature()) {
                (RecordStatus::Confirmed { .. }, Some(signature)) => signatures.push(*signature),
                _ => {
                    return Err(DispatchError::TransactionFailed {
                        index: record.index(),
                        reason: "not sent".to_string(),
                    })
                }
            }
        }
        Ok(signatures)
    }

    fn count(&self, predicate: impl Fn(RecordStatus) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(r.status())).count()
    }
}
