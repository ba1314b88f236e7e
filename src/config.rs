//! Endpoint and dispatch configuration

use crate::clock::DEFAULT_RESEND_INTERVAL;
use crate::network::Commitment;
use eyre::{Context, Result};
use std::time::Duration;

/// Default time to wait for a terminal status before giving up locally
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay between status lookups
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default bound on the diagnostic simulation after a failure
pub const DEFAULT_SIMULATION_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// RPC endpoints of the ledger network
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// WebSocket endpoint URL for subscriptions
    pub ws_url: String,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_URL)
    }
}

impl RpcConfig {
    /// Configuration for an RPC URL, deriving the WebSocket URL from it
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let rpc_url = rpc_url.into();
        let ws_url = websocket_url(&rpc_url);
        Self {
            rpc_url,
            ws_url,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read `RPC_URL` and optional `WS_URL` from the environment
    pub fn from_env() -> Result<Self> {
        let rpc_url = std::env::var("RPC_URL").context("RPC_URL environment variable must be set")?;
        let mut config = Self::new(rpc_url);
        if let Ok(ws_url) = std::env::var("WS_URL") {
            config.ws_url = ws_url;
        }
        Ok(config)
    }

    /// Set the WebSocket URL explicitly
    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    /// Set the HTTP request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// `http(s)://host` -> `ws(s)://host`
fn websocket_url(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        rpc_url.to_string()
    }
}

/// Timing and durability settings for a dispatch session
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Give up on a transaction after this long (may still land later)
    pub timeout: Duration,
    /// Re-broadcast an in-flight transaction this often
    pub resend_interval: Duration,
    /// Look up signature status this often
    pub poll_interval: Duration,
    /// Durability level for checkpoints and signature subscriptions
    pub commitment: Commitment,
    /// Durability level for diagnostic simulations
    pub simulation_commitment: Commitment,
    /// Upper bound on a diagnostic simulation
    pub simulation_timeout: Duration,
    /// Buffered events per stream subscriber
    pub event_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            resend_interval: DEFAULT_RESEND_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            commitment: Commitment::Processed,
            simulation_commitment: Commitment::Processed,
            simulation_timeout: DEFAULT_SIMULATION_TIMEOUT,
            event_capacity: 256,
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by `DISPATCH_TIMEOUT_MS`, `DISPATCH_RESEND_MS`,
    /// `DISPATCH_POLL_MS` and `DISPATCH_COMMITMENT` when set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_millis("DISPATCH_TIMEOUT_MS")? {
            config.timeout = ms;
        }
        if let Some(ms) = env_millis("DISPATCH_RESEND_MS")? {
            config.resend_interval = ms;
        }
        if let Some(ms) = env_millis("DISPATCH_POLL_MS")? {
            config.poll_interval = ms;
        }
        if let Ok(value) = std::env::var("DISPATCH_COMMITMENT") {
            config.commitment = value
                .parse()
                .with_context(|| format!("Invalid DISPATCH_COMMITMENT: {}", value))?;
        }
        Ok(config)
    }

    /// Set the confirmation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the re-broadcast interval
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    /// Set the status polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the durability level used for checkpoints and subscriptions
    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    /// Set the diagnostic simulation bound
    pub fn with_simulation_timeout(mut self, timeout: Duration) -> Self {
        self.simulation_timeout = timeout;
        self
    }
}

fn env_millis(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(value) => {
            let ms: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds", name))?;
            Ok(Some(Duration::from_millis(ms)))
        }
        Err(_) => Ok(None),
    }
}
