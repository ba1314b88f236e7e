//! Scripted wallet and network doubles
//!
//! Everything here is deterministic and driven by `tokio::time`, so tests can run
//! with a paused clock. Transactions are told apart by a label: the data of their
//! first instruction, as produced by [`memo_group`].
//!
//! Only compiled for tests or with the `test-utils` feature.

#![cfg(any(test, feature = "test-utils"))]

use crate::network::{
    BroadcastOptions, Checkpoint, Commitment, NetworkCapability, SignatureNotification,
    SignatureStatus, SignatureSubscription, SimulationResult, SubscriptionId,
};
use crate::types::{
    transaction_id, Hash, Instruction, InstructionGroup, Keypair, Message, Pubkey, Signature,
    Signer, Transaction,
};
use crate::wallet::WalletCapability;
use eyre::{eyre, Result};
use solana_sdk::signer::keypair::keypair_from_seed;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Program id used for test memo instructions
pub const MEMO_PROGRAM: Pubkey = Pubkey::new_from_array([0x4d; 32]);

/// Slot reported for every scripted confirmation
pub const MOCK_SLOT: u64 = 4_242;

/// A one-instruction group whose data is `label`
pub fn memo_group(label: &str) -> InstructionGroup {
    InstructionGroup::new(
        vec![Instruction::new_with_bytes(MEMO_PROGRAM, label.as_bytes(), vec![])],
        vec![],
    )
}

/// A memo transaction fully signed by a fixed keypair
pub fn signed_memo(label: &str) -> Transaction {
    let payer = fixed_keypair(0x11);
    let blockhash = Hash::new_from_array([1; 32]);
    let ix = Instruction::new_with_bytes(MEMO_PROGRAM, label.as_bytes(), vec![]);
    let message = Message::new_with_blockhash(&[ix], Some(&payer.pubkey()), &blockhash);
    let mut tx = Transaction::new_unsigned(message);
    if let Err(e) = tx.try_partial_sign(&vec![&payer], blockhash) {
        panic!("memo payer must sign: {e}");
    }
    tx
}

fn fixed_keypair(byte: u8) -> Keypair {
    match keypair_from_seed(&[byte; 32]) {
        Ok(keypair) => keypair,
        Err(e) => panic!("seed must derive a keypair: {e}"),
    }
}

/// Label of a transaction built from [`memo_group`]
pub fn label_of(tx: &Transaction) -> String {
    tx.message
        .instructions
        .first()
        .map(|ix| String::from_utf8_lossy(&ix.data).into_owned())
        .unwrap_or_default()
}

/// How the scripted network treats a labelled transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    /// The subscription reports success `after` it was opened; polls see nothing
    ConfirmViaPush { after: Duration },
    /// Polls report success once `after` has passed since the first broadcast;
    /// the subscription stays silent
    ConfirmViaPoll { after: Duration },
    /// The subscription reports an execution error
    FailViaPush { after: Duration, reason: String },
    /// Polls report an execution error
    FailViaPoll { after: Duration, reason: String },
    /// Every broadcast is rejected
    RejectBroadcast { reason: String },
    /// Accepted, but never observed again
    Silent,
}

impl Default for Behavior {
    fn default() -> Self {
        Self::ConfirmViaPush {
            after: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct NetworkState {
    behaviors: HashMap<String, Behavior>,
    simulations: HashMap<String, SimulationResult>,
    simulation_delay: Duration,
    simulations_fail: bool,
    simulation_requests: usize,
    checkpoint_unavailable: bool,
    checkpoint_requests: usize,
    subscriptions_fail: bool,
    first_broadcast: HashMap<Signature, Instant>,
    labels: HashMap<Signature, String>,
    broadcasts: HashMap<String, usize>,
    broadcast_order: Vec<String>,
    next_subscription: SubscriptionId,
    open_subscriptions: Vec<SubscriptionId>,
    opened: usize,
    closed: usize,
}

/// Scripted [`NetworkCapability`]
///
/// Clones share state, so a test can keep one handle while the session owns
/// another.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    /// Network that confirms everything immediately via push
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close a subscription once; later calls for the same id are ignored
    fn close(state: &Mutex<NetworkState>, id: SubscriptionId) {
        let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(position) = state.open_subscriptions.iter().position(|open| *open == id) {
            state.open_subscriptions.remove(position);
            state.closed += 1;
        }
    }

    fn behavior(&self, label: &str) -> Behavior {
        self.state().behaviors.get(label).cloned().unwrap_or_default()
    }

    pub fn set_behavior(&self, label: &str, behavior: Behavior) {
        self.state().behaviors.insert(label.to_string(), behavior);
    }

    pub fn script_simulation(&self, label: &str, result: SimulationResult) {
        self.state().simulations.insert(label.to_string(), result);
    }

    /// Make every simulation return an RPC error
    pub fn fail_simulations(&self) {
        self.state().simulations_fail = true;
    }

    pub fn set_simulation_delay(&self, delay: Duration) {
        self.state().simulation_delay = delay;
    }

    pub fn set_checkpoint_unavailable(&self, unavailable: bool) {
        self.state().checkpoint_unavailable = unavailable;
    }

    /// Make opening a subscription fail
    pub fn fail_subscriptions(&self) {
        self.state().subscriptions_fail = true;
    }

    /// Broadcasts of one label, re-broadcasts included
    pub fn broadcasts(&self, label: &str) -> usize {
        self.state().broadcasts.get(label).copied().unwrap_or(0)
    }

    pub fn total_broadcasts(&self) -> usize {
        self.state().broadcasts.values().sum()
    }

    /// Labels in the order they were first broadcast
    pub fn broadcast_order(&self) -> Vec<String> {
        self.state().broadcast_order.clone()
    }

    pub fn checkpoint_requests(&self) -> usize {
        self.state().checkpoint_requests
    }

    pub fn simulation_requests(&self) -> usize {
        self.state().simulation_requests
    }

    pub fn subscriptions_opened(&self) -> usize {
        self.state().opened
    }

    pub fn subscriptions_closed(&self) -> usize {
        self.state().closed
    }

    pub fn open_subscriptions(&self) -> usize {
        self.state().open_subscriptions.len()
    }
}

impl NetworkCapability for MockNetwork {
    async fn fresh_checkpoint(&self, _commitment: Commitment) -> Result<Checkpoint> {
        let mut state = self.state();
        state.checkpoint_requests += 1;
        if state.checkpoint_unavailable {
            return Err(eyre!("getLatestBlockhash failed: node is behind"));
        }
        let n = state.checkpoint_requests as u8;
        Ok(Checkpoint::new(Hash::new_from_array([n; 32]), 1_000 + u64::from(n)))
    }

    async fn broadcast(
        &self,
        transaction: &Transaction,
        _options: &BroadcastOptions,
    ) -> Result<Signature> {
        let label = label_of(transaction);
        let signature =
            transaction_id(transaction).ok_or_else(|| eyre!("transaction has no signature"))?;

        let behavior = self.behavior(&label);
        let mut state = self.state();
        *state.broadcasts.entry(label.clone()).or_default() += 1;
        if let Behavior::RejectBroadcast { reason } = behavior {
            return Err(eyre!("sendTransaction failed: {}", reason));
        }
        if !state.first_broadcast.contains_key(&signature) {
            state.first_broadcast.insert(signature, Instant::now());
            state.labels.insert(signature, label.clone());
            state.broadcast_order.push(label);
        }
        Ok(signature)
    }

    async fn subscribe_signature(
        &self,
        signature: &Signature,
        _commitment: Commitment,
    ) -> Result<SignatureSubscription> {
        let id = {
            let mut state = self.state();
            if state.subscriptions_fail {
                return Err(eyre!("Failed to connect to ws://mock"));
            }
            state.next_subscription += 1;
            state.opened += 1;
            let id = state.next_subscription;
            state.open_subscriptions.push(id);
            id
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let label = self.state().labels.get(signature).cloned();
        let scripted = label.map(|l| self.behavior(&l));
        let delivery = match scripted {
            Some(Behavior::ConfirmViaPush { after }) => Some((after, None)),
            Some(Behavior::FailViaPush { after, reason }) => Some((after, Some(reason))),
            _ => None,
        };
        if let Some((after, err)) = delivery {
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let _ = tx.send(SignatureNotification {
                    slot: MOCK_SLOT,
                    err,
                });
            });
        }

        let release = CancellationToken::new();
        let released = release.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            released.cancelled().await;
            Self::close(&state, id);
        });

        Ok(SignatureSubscription::new(id, rx, release))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        Self::close(&self.state, id);
        Ok(())
    }

    async fn poll_signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let (label, since) = {
            let state = self.state();
            match (state.labels.get(signature), state.first_broadcast.get(signature)) {
                (Some(label), Some(since)) => (label.clone(), *since),
                _ => return Ok(None),
            }
        };

        let (after, err) = match self.behavior(&label) {
            Behavior::ConfirmViaPoll { after } => (after, None),
            Behavior::FailViaPoll { after, reason } => (after, Some(reason)),
            _ => return Ok(None),
        };
        if since.elapsed() < after {
            return Ok(None);
        }
        Ok(Some(SignatureStatus {
            slot: MOCK_SLOT,
            confirmations: Some(1),
            confirmation_status: Some(Commitment::Confirmed),
            err,
        }))
    }

    async fn simulate(
        &self,
        transaction: &Transaction,
        _commitment: Commitment,
    ) -> Result<SimulationResult> {
        let label = label_of(transaction);
        let (delay, fail, scripted) = {
            let mut state = self.state();
            state.simulation_requests += 1;
            (
                state.simulation_delay,
                state.simulations_fail,
                state.simulations.get(&label).cloned(),
            )
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(eyre!("simulateTransaction failed: node unhealthy"));
        }
        Ok(scripted.unwrap_or_default())
    }
}

/// How a [`MockWallet`] answers signature requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletMode {
    Connected,
    Disconnected,
    Declining,
    /// Approves but returns one transaction fewer than requested
    DropsOne,
}

/// Scripted [`WalletCapability`] backed by a fixed keypair
///
/// Clones share their mode and request counter.
#[derive(Clone)]
pub struct MockWallet {
    keypair: Arc<Keypair>,
    mode: Arc<Mutex<WalletMode>>,
    sign_requests: Arc<AtomicUsize>,
}

impl MockWallet {
    pub fn with_mode(mode: WalletMode) -> Self {
        Self {
            keypair: Arc::new(fixed_keypair(0x22)),
            mode: Arc::new(Mutex::new(mode)),
            sign_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn mode(&self) -> WalletMode {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change how later requests are answered, e.g. to disconnect mid-session
    pub fn set_mode(&self, mode: WalletMode) {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
    }

    pub fn connected() -> Self {
        Self::with_mode(WalletMode::Connected)
    }

    pub fn disconnected() -> Self {
        Self::with_mode(WalletMode::Disconnected)
    }

    pub fn declining() -> Self {
        Self::with_mode(WalletMode::Declining)
    }

    /// Number of approval requests received
    pub fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }
}

impl WalletCapability for MockWallet {
    fn public_identity(&self) -> Option<Pubkey> {
        match self.mode() {
            WalletMode::Disconnected => None,
            _ => Some(self.keypair.pubkey()),
        }
    }

    async fn sign_all(&self, mut transactions: Vec<Transaction>) -> Result<Vec<Transaction>> {
        self.sign_requests.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode();
        match mode {
            WalletMode::Disconnected => return Err(eyre!("wallet disconnected")),
            WalletMode::Declining => return Err(eyre!("User rejected the request.")),
            WalletMode::Connected | WalletMode::DropsOne => {}
        }
        for tx in &mut transactions {
            let blockhash = tx.message.recent_blockhash;
            tx.try_partial_sign(&vec![self.keypair.as_ref()], blockhash)?;
        }
        if mode == WalletMode::DropsOne {
            transactions.pop();
        }
        Ok(transactions)
    }
}
