//! End-to-end dispatch scenarios against the scripted wallet and network

use crate::config::DispatchConfig;
use crate::dispatcher::{DispatchRequest, SequencePolicy};
use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventKind};
use crate::network::{Checkpoint, SimulationResult};
use crate::record::RecordStatus;
use crate::session::DispatchSession;
use crate::test_utils::{
    memo_group, signed_memo, Behavior, MockNetwork, MockWallet, WalletMode, MOCK_SLOT,
};
use crate::types::{transaction_id, Hash, Transaction};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

type MockSession = DispatchSession<MockWallet, MockNetwork>;

fn new_session(network: &MockNetwork, wallet: &MockWallet) -> MockSession {
    DispatchSession::new(wallet.clone(), network.clone(), DispatchConfig::default())
}

fn batch(labels: &[&str]) -> DispatchRequest {
    DispatchRequest::batch(labels.iter().map(|l| memo_group(l)).collect())
}

fn single(label: &str) -> DispatchRequest {
    let group = memo_group(label);
    DispatchRequest::single(group.instructions().to_vec(), vec![])
}

fn drain(stream: &mut broadcast::Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = stream.try_recv() {
        events.push(event);
    }
    events
}

fn count(events: &[DispatchEvent], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

fn assert_elapsed(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(50),
        "elapsed {elapsed:?}, expected about {expected:?}"
    );
}

fn statuses(records: &[crate::record::DispatchRecord]) -> Vec<RecordStatus> {
    records.iter().map(|r| r.status()).collect()
}

#[tokio::test(start_paused = true)]
async fn declined_signature_sends_nothing() {
    let network = MockNetwork::new();
    let wallet = MockWallet::declining();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();

    let err = session.dispatch(single("create-realm")).await.unwrap_err();

    assert_eq!(err, DispatchError::UserDeclined);
    assert_eq!(network.total_broadcasts(), 0);
    assert_eq!(wallet.sign_requests(), 1);
    assert_eq!(
        drain(&mut stream),
        vec![
            DispatchEvent::Error {
                index: None,
                error: DispatchError::UserDeclined
            },
            DispatchEvent::Finally,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn sequential_batch_continues_past_failure() {
    let network = MockNetwork::new();
    network.set_behavior(
        "deposit",
        Behavior::RejectBroadcast {
            reason: "Transaction simulation failed".into(),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();

    let outcome = session
        .dispatch(batch(&["realm", "governance", "deposit"]).with_policy(SequencePolicy::Sequential))
        .await
        .unwrap();

    assert_eq!(outcome.attempted(), 3);
    assert_eq!(outcome.skipped(), 0);
    assert_eq!(outcome.confirmed(), 2);
    assert_eq!(outcome.records()[2].status(), RecordStatus::Failed);
    assert!(!outcome.records()[2].sent());
    assert_eq!(network.broadcast_order(), vec!["realm", "governance"]);
    assert_eq!(wallet.sign_requests(), 1);

    let events = drain(&mut stream);
    assert_eq!(count(&events, EventKind::FinishSending), 1);
    assert_eq!(count(&events, EventKind::Sent), 2);
    assert!(events.iter().any(|e| matches!(
        e,
        DispatchEvent::Error {
            index: Some(2),
            error: DispatchError::TransactionFailed { index: 2, .. }
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn stop_on_first_failure_skips_the_rest() {
    let network = MockNetwork::new();
    network.set_behavior(
        "governance",
        Behavior::FailViaPush {
            after: Duration::from_millis(300),
            reason: "custom program error: 0x1".into(),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();

    let outcome = session
        .dispatch(
            batch(&["realm", "governance", "deposit"])
                .with_policy(SequencePolicy::StopOnFirstFailure),
        )
        .await
        .unwrap();

    assert_eq!(
        statuses(outcome.records()),
        vec![
            RecordStatus::Confirmed { slot: MOCK_SLOT },
            RecordStatus::Failed,
            RecordStatus::Unsent
        ]
    );
    assert_eq!(outcome.attempted(), 2);
    assert_eq!(outcome.skipped(), 1);
    assert_eq!(network.broadcasts("deposit"), 0);
    assert_eq!(
        outcome.records()[1].failure_reason(),
        Some("custom program error: 0x1")
    );

    let events = drain(&mut stream);
    assert_eq!(count(&events, EventKind::FinishSending), 1);
    assert!(events.iter().all(|e| e.index() != Some(2)));
}

#[tokio::test(start_paused = true)]
async fn polling_confirms_when_push_is_silent() {
    let network = MockNetwork::new();
    network.set_behavior(
        "vote",
        Behavior::ConfirmViaPoll {
            after: Duration::from_secs(4),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    let started = Instant::now();
    let outcome = session.dispatch(single("vote")).await.unwrap();

    assert_elapsed(started, Duration::from_secs(4));
    assert_eq!(outcome.records().len(), 1);
    assert_eq!(outcome.records()[0].slot(), Some(MOCK_SLOT));
    assert!(outcome.is_success());
    // single mode is not held by the session
    assert!(session.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn push_confirms_when_polling_sees_nothing() {
    let network = MockNetwork::new();
    network.set_behavior(
        "vote",
        Behavior::ConfirmViaPush {
            after: Duration::from_secs(3),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    let started = Instant::now();
    let outcome = session.dispatch(single("vote")).await.unwrap();

    assert_elapsed(started, Duration::from_secs(3));
    assert!(outcome.is_success());
}

#[tokio::test(start_paused = true)]
async fn confirmed_batch_is_not_sent_twice() {
    let network = MockNetwork::new();
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    let first = session.dispatch(batch(&["a", "b", "c"])).await.unwrap();
    assert!(first.is_success());
    assert!(!first.from_cache());

    let broadcasts = network.total_broadcasts();
    let checkpoints = network.checkpoint_requests();
    let mut stream = session.subscribe();

    let second = session.dispatch(batch(&["a", "b", "c"])).await.unwrap();

    assert!(second.from_cache());
    assert_eq!(second.records(), first.records());
    assert_eq!(network.total_broadcasts(), broadcasts);
    assert_eq!(network.checkpoint_requests(), checkpoints);
    assert_eq!(wallet.sign_requests(), 1);
    assert_eq!(
        drain(&mut stream),
        vec![DispatchEvent::FinishSending, DispatchEvent::Finally]
    );
}

#[tokio::test(start_paused = true)]
async fn resumed_batch_only_resends_unconfirmed() {
    let network = MockNetwork::new();
    network.set_behavior(
        "b",
        Behavior::FailViaPoll {
            after: Duration::ZERO,
            reason: "account in use".into(),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    let first = session
        .dispatch(batch(&["a", "b", "c"]).with_policy(SequencePolicy::Sequential))
        .await
        .unwrap();
    assert_eq!(first.failed(), 1);
    assert_eq!(session.records().len(), 3);
    let a_broadcasts = network.broadcasts("a");
    let c_broadcasts = network.broadcasts("c");

    network.set_behavior("b", Behavior::default());
    let second = session
        .dispatch(batch(&["a", "b", "c"]).with_policy(SequencePolicy::Sequential))
        .await
        .unwrap();

    assert!(second.is_success());
    assert!(!second.from_cache());
    assert_eq!(network.broadcasts("a"), a_broadcasts);
    assert_eq!(network.broadcasts("c"), c_broadcasts);
    assert_eq!(second.records()[0].attempts(), 1);
    assert_eq!(second.records()[1].attempts(), 2);
    assert_eq!(wallet.sign_requests(), 2);
    assert!(session.keep_or_reset());
    assert!(session.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unfinished_batch_blocks_a_different_one() {
    let network = MockNetwork::new();
    network.set_behavior(
        "a",
        Behavior::RejectBroadcast {
            reason: "insufficient funds".into(),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    session.dispatch(batch(&["a"])).await.unwrap();
    assert!(!session.keep_or_reset());

    let err = session.dispatch(batch(&["x", "y"])).await.unwrap_err();
    assert!(matches!(err, DispatchError::MalformedRequest(_)));
    assert_eq!(network.broadcasts("x"), 0);

    session.reset();
    let outcome = session.dispatch(batch(&["x", "y"])).await.unwrap();
    assert!(outcome.is_success());

    // a complete batch is simply replaced
    let replaced = session.dispatch(batch(&["z"])).await.unwrap();
    assert!(replaced.is_success());
    assert_eq!(session.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_and_sequential_agree_without_failures() {
    let labels = ["a", "b", "c", "d"];
    let mut results = Vec::new();
    for policy in [SequencePolicy::Parallel, SequencePolicy::Sequential] {
        let network = MockNetwork::new();
        network.set_behavior(
            "c",
            Behavior::ConfirmViaPoll {
                after: Duration::from_secs(2),
            },
        );
        let wallet = MockWallet::connected();
        let mut session = new_session(&network, &wallet);
        let outcome = session
            .dispatch(batch(&labels).with_policy(policy))
            .await
            .unwrap();
        results.push((
            statuses(outcome.records()),
            outcome.confirmed(),
            outcome.attempted(),
        ));
    }
    assert_eq!(results[0], results[1]);
}

#[tokio::test(start_paused = true)]
async fn parallel_trackers_overlap_in_time() {
    let slow = Behavior::ConfirmViaPoll {
        after: Duration::from_secs(4),
    };

    let network = MockNetwork::new();
    for label in ["a", "b", "c"] {
        network.set_behavior(label, slow.clone());
    }
    let wallet = MockWallet::connected();
    let mut parallel = new_session(&network, &wallet);
    let started = Instant::now();
    parallel
        .dispatch(batch(&["a", "b", "c"]).with_policy(SequencePolicy::Parallel))
        .await
        .unwrap();
    assert_elapsed(started, Duration::from_secs(4));

    let network = MockNetwork::new();
    for label in ["a", "b", "c"] {
        network.set_behavior(label, slow.clone());
    }
    let mut sequential = new_session(&network, &wallet);
    let started = Instant::now();
    sequential
        .dispatch(batch(&["a", "b", "c"]).with_policy(SequencePolicy::Sequential))
        .await
        .unwrap();
    assert_elapsed(started, Duration::from_secs(12));
    assert_eq!(network.broadcast_order(), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_overrides_session_default() {
    let network = MockNetwork::new();
    network.set_behavior("vote", Behavior::Silent);
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();

    let started = Instant::now();
    let outcome = session
        .dispatch(single("vote").with_timeout(Duration::from_secs(3)))
        .await
        .unwrap();

    assert_elapsed(started, Duration::from_secs(3));
    assert_eq!(outcome.timed_out(), 1);
    assert_eq!(
        outcome.into_result(),
        Err(DispatchError::DispatchTimeout { index: 0 })
    );
    let events = drain(&mut stream);
    assert!(events.contains(&DispatchEvent::Timeout {
        index: 0,
        error: DispatchError::DispatchTimeout { index: 0 }
    }));
}

#[tokio::test(start_paused = true)]
async fn every_subscription_is_closed() {
    let network = MockNetwork::new();
    network.set_behavior(
        "fails",
        Behavior::FailViaPush {
            after: Duration::from_millis(700),
            reason: "custom program error: 0x3".into(),
        },
    );
    network.set_behavior("silent", Behavior::Silent);
    network.set_behavior(
        "polled",
        Behavior::ConfirmViaPoll {
            after: Duration::from_secs(2),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    let outcome = session
        .dispatch(
            batch(&["ok", "fails", "silent", "polled"]).with_timeout(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert_eq!(outcome.confirmed(), 2);
    assert_eq!(outcome.failed(), 1);
    assert_eq!(outcome.timed_out(), 1);
    assert_eq!(network.subscriptions_opened(), 4);
    assert_eq!(network.subscriptions_closed(), 4);
    assert_eq!(network.open_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn events_are_ordered_and_terminal_once() {
    let network = MockNetwork::new();
    network.set_behavior(
        "b",
        Behavior::ConfirmViaPush {
            after: Duration::from_millis(800),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();

    session.dispatch(batch(&["a", "b"])).await.unwrap();
    let events = drain(&mut stream);

    assert_eq!(events.last(), Some(&DispatchEvent::Finally));
    assert_eq!(events[events.len() - 2], DispatchEvent::FinishSending);
    for index in 0..2 {
        let sent = events
            .iter()
            .position(|e| matches!(e, DispatchEvent::Sent { index: i, total: 2, .. } if *i == index));
        let terminal: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_terminal() && e.index() == Some(index))
            .map(|(position, _)| position)
            .collect();
        assert_eq!(terminal.len(), 1, "index {index}");
        assert!(sent.unwrap() < terminal[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn index_zero_is_reported_like_any_other() {
    let network = MockNetwork::new();
    network.set_behavior(
        "first",
        Behavior::FailViaPoll {
            after: Duration::ZERO,
            reason: "custom program error: 0x0".into(),
        },
    );
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    session.on(EventKind::Error, move |event| {
        if event.index() == Some(0) {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    let outcome = session.dispatch(batch(&["first", "second"])).await.unwrap();

    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcome.into_result(),
        Err(DispatchError::TransactionFailed {
            index: 0,
            reason: "custom program error: 0x0".into()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn fatal_errors_abort_before_signing() {
    let network = MockNetwork::new();
    let disconnected = MockWallet::disconnected();
    let mut session = new_session(&network, &disconnected);
    assert_eq!(
        session.dispatch(single("a")).await.unwrap_err(),
        DispatchError::NotConnected
    );

    network.set_checkpoint_unavailable(true);
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();
    let err = session.dispatch(batch(&["a"])).await.unwrap_err();

    assert!(matches!(err, DispatchError::CheckpointUnavailable(_)));
    assert_eq!(wallet.sign_requests(), 0);
    assert!(session.records().is_empty());
    let events = drain(&mut stream);
    assert_eq!(count(&events, EventKind::FinishSending), 0);
    assert_eq!(events.last(), Some(&DispatchEvent::Finally));
}

#[tokio::test(start_paused = true)]
async fn short_wallet_answer_counts_as_declined() {
    let network = MockNetwork::new();
    let wallet = MockWallet::with_mode(WalletMode::DropsOne);
    let mut session = new_session(&network, &wallet);

    let err = session.dispatch(batch(&["a", "b"])).await.unwrap_err();

    assert_eq!(err, DispatchError::UserDeclined);
    assert_eq!(network.total_broadcasts(), 0);
}

#[tokio::test(start_paused = true)]
async fn supplied_checkpoint_is_used_as_is() {
    let network = MockNetwork::new();
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let checkpoint = Checkpoint::new(Hash::new_from_array([0xCC; 32]), 9_999);

    let outcome = session
        .dispatch(single("a").with_checkpoint(checkpoint))
        .await
        .unwrap();

    assert_eq!(network.checkpoint_requests(), 0);
    let tx = outcome.records()[0].transaction().unwrap();
    assert_eq!(tx.message.recent_blockhash, checkpoint.blockhash);
}

#[tokio::test(start_paused = true)]
async fn malformed_batch_emits_fatal_error() {
    let network = MockNetwork::new();
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let finally = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&finally);
    session.on(EventKind::Finally, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let err = session.dispatch(batch(&[])).await.unwrap_err();

    assert!(matches!(err, DispatchError::MalformedRequest(_)));
    assert_eq!(finally.load(Ordering::SeqCst), 1);
    assert_eq!(wallet.sign_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_dispatch_releases_its_subscription() {
    let network = MockNetwork::new();
    network.set_behavior("vote", Behavior::Silent);
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);

    let cancelled =
        tokio::time::timeout(Duration::from_secs(5), session.dispatch(single("vote"))).await;

    assert!(cancelled.is_err());
    assert_eq!(network.subscriptions_opened(), 1);
    let broadcasts = network.broadcasts("vote");

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(network.open_subscriptions(), 0);
    assert_eq!(network.subscriptions_closed(), 1);
    assert_eq!(network.broadcasts("vote"), broadcasts);
}

#[tokio::test(start_paused = true)]
async fn presigned_transaction_is_tracked_without_the_wallet() {
    let network = MockNetwork::new();
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();
    let transaction = signed_memo("transfer");
    let signature = transaction_id(&transaction).unwrap();

    let outcome = session.dispatch_signed(transaction).await.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.records().len(), 1);
    assert_eq!(outcome.records()[0].signature(), Some(&signature));
    assert_eq!(wallet.sign_requests(), 0);
    assert_eq!(network.checkpoint_requests(), 0);
    assert!(session.records().is_empty());
    assert_eq!(
        drain(&mut stream),
        vec![
            DispatchEvent::Sent {
                signature,
                index: 0,
                total: 1
            },
            DispatchEvent::Confirmation {
                index: 0,
                signature,
                slot: MOCK_SLOT
            },
            DispatchEvent::FinishSending,
            DispatchEvent::Finally,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn presigned_failure_is_reported_on_the_outcome() {
    let network = MockNetwork::new();
    network.set_behavior(
        "transfer",
        Behavior::FailViaPoll {
            after: Duration::ZERO,
            reason: "insufficient funds".into(),
        },
    );
    let wallet = MockWallet::disconnected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();

    let outcome = session
        .dispatch_signed(signed_memo("transfer"))
        .await
        .unwrap();

    assert_eq!(outcome.failed(), 1);
    let events = drain(&mut stream);
    assert!(events.contains(&DispatchEvent::Error {
        index: Some(0),
        error: DispatchError::TransactionFailed {
            index: 0,
            reason: "insufficient funds".into()
        }
    }));
    assert_eq!(events.last(), Some(&DispatchEvent::Finally));
}

#[tokio::test(start_paused = true)]
async fn unsigned_transaction_is_rejected_before_broadcast() {
    let network = MockNetwork::new();
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let mut stream = session.subscribe();
    let unsigned = Transaction::new_unsigned(signed_memo("transfer").message);

    let err = session.dispatch_signed(unsigned).await.unwrap_err();

    assert!(matches!(err, DispatchError::MalformedRequest(_)));
    assert_eq!(network.total_broadcasts(), 0);
    let events = drain(&mut stream);
    assert_eq!(count(&events, EventKind::FinishSending), 0);
    assert_eq!(
        events,
        vec![
            DispatchEvent::Error {
                index: None,
                error: err
            },
            DispatchEvent::Finally,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn simulate_passes_through_to_the_network() {
    let network = MockNetwork::new();
    let scripted = SimulationResult {
        err: Some("InstructionError".into()),
        logs: vec!["Program log: Error: stale oracle".into()],
        units_consumed: Some(2_100),
    };
    network.script_simulation("swap", scripted.clone());
    let wallet = MockWallet::connected();
    let session = new_session(&network, &wallet);

    let result = session.simulate(&signed_memo("swap")).await.unwrap();

    assert_eq!(result, scripted);
    assert_eq!(network.simulation_requests(), 1);
    assert_eq!(network.total_broadcasts(), 0);
}

#[tokio::test(start_paused = true)]
async fn simulate_gives_up_after_its_timeout() {
    let network = MockNetwork::new();
    network.set_simulation_delay(Duration::from_secs(60));
    let wallet = MockWallet::connected();
    let session = new_session(&network, &wallet);

    let started = Instant::now();
    let err = session.simulate(&signed_memo("swap")).await.unwrap_err();

    assert!(err.to_string().contains("timed out"));
    assert_elapsed(started, DispatchConfig::default().simulation_timeout);
}

#[tokio::test(start_paused = true)]
async fn confirmed_batch_is_returned_after_wallet_disconnects() {
    let network = MockNetwork::new();
    let wallet = MockWallet::connected();
    let mut session = new_session(&network, &wallet);
    let first = session.dispatch(batch(&["a", "b"])).await.unwrap();
    assert!(first.is_success());

    wallet.set_mode(WalletMode::Disconnected);
    let again = session.dispatch(batch(&["a", "b"])).await.unwrap();

    assert!(again.from_cache());
    assert_eq!(again.records(), first.records());
    assert_eq!(wallet.sign_requests(), 1);

    assert_eq!(
        session.dispatch(batch(&["c"])).await.unwrap_err(),
        DispatchError::NotConnected
    );
}
