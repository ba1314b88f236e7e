//! RPC and pubsub network adapter
//!
//! Requests go through the nonblocking `RpcClient`. Each signature subscription
//! gets its own `PubsubClient` connection driven by a background task that
//! forwards the first processed notification into an mpsc channel, then
//! unsubscribes and shuts the connection down.

use super::{
    BroadcastOptions, Checkpoint, Commitment, NetworkCapability, SignatureNotification,
    SignatureStatus, SignatureSubscription, SimulationResult, SubscriptionId,
};
use crate::config::RpcConfig;
use crate::types::{Signature, Transaction};
use eyre::{Context, Result};
use futures::{Stream, StreamExt};
use serde::Serialize;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcSignatureSubscribeConfig, RpcSimulateTransactionConfig,
};
use solana_client::rpc_response::{Response, RpcSignatureResult};
use solana_transaction_status::TransactionConfirmationStatus;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Network capability backed by an RPC node and its pubsub endpoint
pub struct RpcNetwork {
    client: RpcClient,
    config: RpcConfig,
    next_subscription: AtomicU64,
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, CancellationToken>>>,
}

impl RpcNetwork {
    /// Create an adapter for the configured endpoints
    pub fn new(config: RpcConfig) -> Self {
        let client = RpcClient::new_with_timeout_and_commitment(
            config.rpc_url.clone(),
            config.request_timeout,
            Commitment::default().into(),
        );

        Self {
            client,
            config,
            next_subscription: AtomicU64::new(1),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create an adapter from `RPC_URL` / `WS_URL`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(RpcConfig::from_env()?))
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Subscriptions whose background task has not finished yet
    pub fn open_subscriptions(&self) -> usize {
        lock(&self.subscriptions).len()
    }
}

fn lock(
    subscriptions: &Mutex<HashMap<SubscriptionId, CancellationToken>>,
) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, CancellationToken>> {
    subscriptions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NetworkCapability for RpcNetwork {
    async fn fresh_checkpoint(&self, commitment: Commitment) -> Result<Checkpoint> {
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(commitment.into())
            .await
            .context("Failed to fetch latest blockhash")?;

        Ok(Checkpoint::new(blockhash, last_valid_block_height))
    }

    async fn broadcast(
        &self,
        transaction: &Transaction,
        options: &BroadcastOptions,
    ) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: options.preflight_commitment.map(Into::into),
            max_retries: options.max_retries,
            ..Default::default()
        };

        self.client
            .send_transaction_with_config(transaction, config)
            .await
            .context("Failed to send transaction")
    }

    async fn subscribe_signature(
        &self,
        signature: &Signature,
        commitment: Commitment,
    ) -> Result<SignatureSubscription> {
        let client = PubsubClient::new(&self.config.ws_url)
            .await
            .with_context(|| format!("Failed to connect to {}", self.config.ws_url))?;

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        lock(&self.subscriptions).insert(id, cancel.clone());
        // released if we are dropped while waiting for the node to acknowledge
        let pending = cancel.clone().drop_guard();

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let subscriptions = Arc::clone(&self.subscriptions);
        let signature = *signature;
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            forward_notification(&client, signature, commitment, &task_cancel, ready_tx, tx).await;
            if let Err(e) = client.shutdown().await {
                tracing::debug!("Pubsub shutdown for {} failed: {}", signature, e);
            }
            lock(&subscriptions).remove(&id);
            tracing::debug!("Closed signature subscription {} for {}", id, signature);
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eyre::bail!("signatureSubscribe for {} failed: {}", signature, e),
            Err(_) => eyre::bail!("Subscription task for {} ended early", signature),
        }

        pending.disarm();
        Ok(SignatureSubscription::new(id, rx, cancel))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if let Some(cancel) = lock(&self.subscriptions).remove(&id) {
            cancel.cancel();
        }
        Ok(())
    }

    async fn poll_signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let statuses = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .context("Failed to fetch signature status")?
            .value;

        Ok(statuses
            .into_iter()
            .next()
            .flatten()
            .map(|status| SignatureStatus {
                slot: status.slot,
                confirmations: status.confirmations.map(|count| count as u64),
                err: status.err.as_ref().map(error_text),
                confirmation_status: status.confirmation_status.map(commitment_of),
            }))
    }

    async fn simulate(
        &self,
        transaction: &Transaction,
        commitment: Commitment,
    ) -> Result<SimulationResult> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: true,
            commitment: Some(commitment.into()),
            ..Default::default()
        };

        let simulation = self
            .client
            .simulate_transaction_with_config(transaction, config)
            .await
            .context("Failed to simulate transaction")?
            .value;

        Ok(SimulationResult {
            err: simulation.err.as_ref().map(error_text),
            logs: simulation.logs.unwrap_or_default(),
            units_consumed: simulation.units_consumed,
        })
    }
}

/// Drive one subscription until it is answered or cancelled
async fn forward_notification(
    client: &PubsubClient,
    signature: Signature,
    commitment: Commitment,
    cancel: &CancellationToken,
    ready: oneshot::Sender<std::result::Result<(), String>>,
    notifications: mpsc::UnboundedSender<SignatureNotification>,
) {
    let config = RpcSignatureSubscribeConfig {
        commitment: Some(commitment.into()),
        enable_received_notification: Some(false),
    };

    let subscribed = tokio::select! {
        _ = cancel.cancelled() => return,
        subscribed = client.signature_subscribe(&signature, Some(config)) => subscribed,
    };
    let (mut stream, unsubscribe) = match subscribed {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    tokio::select! {
        _ = cancel.cancelled() => {}
        notification = next_processed(&mut stream) => {
            // one-shot on the node side; nothing more will arrive
            if let Some(notification) = notification {
                let _ = notifications.send(notification);
            }
        }
    }

    drop(stream);
    unsubscribe().await;
}

/// First processed-signature notification on the stream
async fn next_processed<S>(stream: &mut S) -> Option<SignatureNotification>
where
    S: Stream<Item = Response<RpcSignatureResult>> + Unpin,
{
    while let Some(response) = stream.next().await {
        if let RpcSignatureResult::ProcessedSignature(result) = response.value {
            return Some(SignatureNotification {
                slot: response.context.slot,
                err: result.err.as_ref().map(error_text),
            });
        }
    }
    None
}

fn commitment_of(status: TransactionConfirmationStatus) -> Commitment {
    match status {
        TransactionConfirmationStatus::Processed => Commitment::Processed,
        TransactionConfirmationStatus::Confirmed => Commitment::Confirmed,
        TransactionConfirmationStatus::Finalized => Commitment::Finalized,
    }
}

/// Render a ledger error the way the node reports it
fn error_text<E: Serialize + Debug>(err: &E) -> String {
    serde_json::to_string(err).unwrap_or_else(|_| format!("{:?}", err))
}
