//! Dispatch a batch of memo transactions and watch them confirm
//!
//! Run with: cargo run --example dispatch_memos -- [parallel|sequential|stop]
//!
//! Requires RPC_URL and WALLET_SECRET_KEY environment variables (WS_URL optional)

use txn_dispatch::{
    DispatchConfig, DispatchEvent, DispatchRequest, DispatchSession, EventKind, Instruction,
    InstructionGroup, LocalWallet, Pubkey, RecordStatus, RpcConfig, RpcNetwork, SequencePolicy,
};

const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let policy = match std::env::args().nth(1).as_deref() {
        Some("sequential") => SequencePolicy::Sequential,
        Some("stop") => SequencePolicy::StopOnFirstFailure,
        _ => SequencePolicy::Parallel,
    };

    let network = RpcNetwork::new(RpcConfig::from_env()?);
    let wallet = LocalWallet::from_env()?;
    let config = DispatchConfig::from_env()?;

    println!("\n========================================");
    println!("       Memo batch dispatch");
    println!("========================================");
    println!("Wallet: {}", wallet.pubkey());
    println!("RPC:    {}", network.config().rpc_url);
    println!("Policy: {:?}", policy);

    let memo_program: Pubkey = MEMO_PROGRAM_ID.parse()?;
    let groups: Vec<InstructionGroup> = ["create realm", "create governance", "deposit tokens"]
        .iter()
        .map(|step| {
            InstructionGroup::new(
                vec![Instruction::new_with_bytes(memo_program, step.as_bytes(), vec![])],
                vec![],
            )
        })
        .collect();

    let mut session = DispatchSession::new(wallet, network, config);
    session.on(EventKind::Sent, |event| {
        if let DispatchEvent::Sent {
            signature,
            index,
            total,
        } = event
        {
            println!("  [{}/{}] sent {}", index + 1, total, signature);
        }
    });
    session.on(EventKind::Confirmation, |event| {
        if let DispatchEvent::Confirmation { index, slot, .. } = event {
            println!("  [{}] confirmed at slot {}", index + 1, slot);
        }
    });
    session.on(EventKind::Error, |event| {
        if let DispatchEvent::Error { error, .. } = event {
            println!("  error: {}", error);
        }
    });
    session.on(EventKind::Timeout, |event| {
        if let DispatchEvent::Timeout { error, .. } = event {
            println!("  timeout: {}", error);
        }
    });

    let outcome = session
        .dispatch(DispatchRequest::batch(groups).with_policy(policy))
        .await?;

    println!("\n----------------------------------------");
    for record in outcome.records() {
        let signature = record
            .signature()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        match record.status() {
            RecordStatus::Confirmed { slot } => {
                println!("  #{} confirmed (slot {}) {}", record.index(), slot, signature)
            }
            status => println!(
                "  #{} {:?}: {}",
                record.index(),
                status,
                record.failure_reason().unwrap_or("not sent")
            ),
        }
    }
    println!(
        "Confirmed {} / attempted {} / skipped {}",
        outcome.confirmed(),
        outcome.attempted(),
        outcome.skipped()
    );

    if session.keep_or_reset() {
        println!("Batch complete");
    }

    Ok(())
}
