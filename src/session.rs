//! Dispatch sessions: the engine's entry point
//!
//! A session owns the wallet and network capabilities, the event notifier and the
//! records of the current batch. Records survive across calls so an unfinished
//! batch can be resumed without re-sending what already confirmed.

use crate::config::DispatchConfig;
use crate::dispatcher::{DispatchRequest, Dispatcher, RequestMode, SequencePolicy};
use crate::error::{report_text, DispatchError};
use crate::events::{DispatchEvent, EventKind, EventNotifier};
use crate::network::{Checkpoint, Commitment, NetworkCapability, SimulationResult};
use crate::record::{DispatchOutcome, DispatchRecord};
use crate::signer;
use crate::tracker::TrackerSettings;
use crate::types::{batch_fingerprint, InstructionGroup, Transaction};
use crate::wallet::WalletCapability;
use tokio::sync::broadcast;

/// Records of the batch currently held by a session
#[derive(Debug)]
struct BatchState {
    fingerprint: [u8; 32],
    records: Vec<DispatchRecord>,
    policy: SequencePolicy,
    complete: bool,
}

/// Dispatches instruction groups through a wallet and a network
///
/// # Example
///
/// ```rust,ignore
/// let network = RpcNetwork::new(RpcConfig::from_env()?);
/// let wallet = LocalWallet::from_env()?;
/// let mut session = DispatchSession::new(wallet, network, DispatchConfig::default());
///
/// session.on(EventKind::Confirmation, |event| println!("{:?}", event));
/// let outcome = session
///     .dispatch(DispatchRequest::batch(groups).with_policy(SequencePolicy::StopOnFirstFailure))
///     .await?;
/// ```
pub struct DispatchSession<W, N> {
    wallet: W,
    network: N,
    config: DispatchConfig,
    notifier: EventNotifier,
    batch: Option<BatchState>,
}

impl<W: WalletCapability, N: NetworkCapability> DispatchSession<W, N> {
    pub fn new(wallet: W, network: N, config: DispatchConfig) -> Self {
        let notifier = EventNotifier::new(config.event_capacity);
        Self {
            wallet,
            network,
            config,
            notifier,
            batch: None,
        }
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Register a callback for one kind of event
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&DispatchEvent) + Send + Sync + 'static,
    {
        self.notifier.on(kind, handler);
    }

    /// Ordered stream of every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.notifier.subscribe()
    }

    /// Records of the batch held by the session, in index order
    pub fn records(&self) -> &[DispatchRecord] {
        self.batch
            .as_ref()
            .map(|batch| batch.records.as_slice())
            .unwrap_or_default()
    }

    /// Drop the held batch if every record confirmed; returns whether it was dropped
    ///
    /// An unfinished batch is kept so it can be resumed.
    pub fn keep_or_reset(&mut self) -> bool {
        if self.batch.as_ref().is_some_and(|batch| batch.complete) {
            self.batch = None;
            return true;
        }
        false
    }

    /// Forget the held batch, finished or not
    pub fn reset(&mut self) {
        if self.batch.take().is_some() {
            tracing::info!("Discarded held batch");
        }
    }

    /// Sign, send and confirm the request's transactions
    ///
    /// Per-transaction failures and timeouts are reported on the outcome, not as
    /// `Err`. An `Err` means nothing more will happen for this call.
    pub async fn dispatch(&mut self, request: DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        self.notifier.begin();
        let result = self.dispatch_inner(request).await;
        self.conclude(result)
    }

    /// Send and confirm a transaction the caller signed elsewhere
    ///
    /// Emits the same events as a single-mode [`dispatch`](Self::dispatch). The
    /// transaction is not held by the session, so it cannot be resumed.
    pub async fn dispatch_signed(
        &mut self,
        transaction: Transaction,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.notifier.begin();
        let result = if transaction.is_signed() {
            let settings = TrackerSettings::from(&self.config);
            Ok(self
                .send_one(transaction, settings, SequencePolicy::Sequential)
                .await)
        } else {
            Err(DispatchError::malformed("transaction is missing signatures"))
        };
        self.conclude(result)
    }

    /// Dry-run a transaction at the configured simulation commitment
    pub async fn simulate(&self, transaction: &Transaction) -> eyre::Result<SimulationResult> {
        let limit = self.config.simulation_timeout;
        tokio::time::timeout(
            limit,
            self.network
                .simulate(transaction, self.config.simulation_commitment),
        )
        .await
        .map_err(|_| eyre::eyre!("Simulation timed out after {:?}", limit))?
    }

    fn conclude(
        &self,
        result: Result<DispatchOutcome, DispatchError>,
    ) -> Result<DispatchOutcome, DispatchError> {
        if let Err(err) = &result {
            tracing::warn!("Dispatch aborted: {}", err);
            self.notifier.error(None, err.clone());
        }
        self.notifier.finally();
        result
    }

    /// Track one signed transaction as record 0
    async fn send_one(
        &self,
        transaction: Transaction,
        settings: TrackerSettings,
        policy: SequencePolicy,
    ) -> DispatchOutcome {
        let mut records = vec![DispatchRecord::new(0)];
        records[0].begin_attempt(transaction);
        Dispatcher::new(&self.network, &self.notifier, settings)
            .run(&mut records, SequencePolicy::Sequential)
            .await;
        self.notifier.finish_sending();
        DispatchOutcome::new(records, policy, false)
    }

    async fn dispatch_inner(&mut self, request: DispatchRequest) -> Result<DispatchOutcome, DispatchError> {
        let policy = request.policy();
        let commitment = request.commitment().unwrap_or(self.config.commitment);
        let mut settings = TrackerSettings::from(&self.config).with_commitment(commitment);
        if let Some(timeout) = request.timeout() {
            settings = settings.with_timeout(timeout);
        }
        let supplied = request.checkpoint().copied();

        let (mode, groups) = request.into_groups()?;

        if mode == RequestMode::Single {
            self.require_wallet()?;
            let checkpoint = self.resolve_checkpoint(supplied, commitment).await?;
            let transaction = signer::sign(&groups[0], &checkpoint, &self.wallet).await?;
            return Ok(self.send_one(transaction, settings, policy).await);
        }

        let fingerprint = batch_fingerprint(&groups);
        let resuming = match &self.batch {
            Some(batch) if batch.fingerprint == fingerprint && batch.complete => {
                tracing::info!(
                    "Batch of {} already confirmed; returning held records",
                    batch.records.len()
                );
                self.notifier.finish_sending();
                return Ok(DispatchOutcome::new(batch.records.clone(), batch.policy, true));
            }
            Some(batch) if batch.fingerprint == fingerprint => true,
            Some(batch) if !batch.complete => {
                return Err(DispatchError::malformed(
                    "a different batch is still in progress; reset the session first",
                ));
            }
            _ => false,
        };
        // a confirmed batch is answered from memory even if the wallet went away
        self.require_wallet()?;

        let pending: Vec<usize> = match (&self.batch, resuming) {
            (Some(batch), true) => batch
                .records
                .iter()
                .filter(|r| !r.is_confirmed())
                .map(DispatchRecord::index)
                .collect(),
            _ => (0..groups.len()).collect(),
        };
        let to_sign: Vec<InstructionGroup> = pending.iter().map(|&i| groups[i].clone()).collect();

        let checkpoint = self.resolve_checkpoint(supplied, commitment).await?;
        let signed = signer::sign_all(&to_sign, &checkpoint, &self.wallet).await?;

        if !resuming {
            self.batch = None;
        }
        let total = groups.len();
        let batch = self.batch.get_or_insert_with(|| BatchState {
            fingerprint,
            records: (0..total).map(DispatchRecord::new).collect(),
            policy,
            complete: false,
        });
        batch.policy = policy;
        for (index, transaction) in pending.iter().zip(signed) {
            batch.records[*index].begin_attempt(transaction);
        }

        if resuming {
            tracing::info!(
                "Resuming batch: {} of {} transaction(s) left",
                pending.len(),
                batch.records.len()
            );
        } else {
            tracing::info!("Dispatching batch of {} transaction(s) ({:?})", total, policy);
        }

        Dispatcher::new(&self.network, &self.notifier, settings)
            .run(&mut batch.records, policy)
            .await;
        batch.complete = batch.records.iter().all(DispatchRecord::is_confirmed);
        self.notifier.finish_sending();

        Ok(DispatchOutcome::new(batch.records.clone(), policy, false))
    }

    fn require_wallet(&self) -> Result<(), DispatchError> {
        match self.wallet.public_identity() {
            Some(_) => Ok(()),
            None => Err(DispatchError::NotConnected),
        }
    }

    async fn resolve_checkpoint(
        &self,
        supplied: Option<Checkpoint>,
        commitment: Commitment,
    ) -> Result<Checkpoint, DispatchError> {
        if let Some(checkpoint) = supplied {
            return Ok(checkpoint);
        }
        self.network
            .fresh_checkpoint(commitment)
            .await
            .map_err(|e| DispatchError::CheckpointUnavailable(report_text(&e)))
    }
}
