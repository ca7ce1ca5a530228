use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::constants::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_EVENT_BATCH, DEFAULT_FINALITY_DEPTH_A,
    DEFAULT_FINALITY_DEPTH_B, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF_MS,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_RATE_LIMIT_RPS, DEFAULT_RETENTION_MS, DEFAULT_RPC_LISTEN,
    DEFAULT_WORKER_COUNT, DEVNET_PROFILE, FEE_BPS_DENOM, MAINNET_PROFILE, TESTNET_PROFILE,
    TimeoutProfile,
};
use crate::error::LockstepError;
use crate::types::{Amount, LedgerId};

// ── Network ──────────────────────────────────────────────────────────────────

/// Target network, selecting the timeout profile. No hot reload: the profile
/// is fixed for the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    pub fn profile(&self) -> TimeoutProfile {
        match self {
            Network::Mainnet => MAINNET_PROFILE,
            Network::Testnet => TESTNET_PROFILE,
            Network::Devnet => DEVNET_PROFILE,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
            Network::Devnet => write!(f, "devnet"),
        }
    }
}

// ── Per-ledger settings ──────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct LedgerConfig {
    /// Escrow gateway JSON-RPC endpoint. Empty selects the in-memory ledger
    /// (devnet only).
    #[serde(default)]
    pub rpc_url: String,
    /// Confirmations before an event is deemed irreversible.
    pub finality_depth: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: u32,
    /// Address this coordinator acts as on the ledger. Refunds are driven
    /// only for escrows owned by this address.
    pub local_address: String,
    /// Stake posted at resolver registration, smallest units. Zero when the
    /// on-chain registry requires none.
    #[serde(default)]
    pub resolver_stake: Amount,
    /// Opaque key reference handed to the key-provider collaborator. The
    /// core never sees private key material.
    #[serde(default)]
    pub key_ref: String,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_RPS
}

impl LedgerConfig {
    pub fn with_defaults(ledger: LedgerId) -> Self {
        Self {
            rpc_url: String::new(),
            finality_depth: match ledger {
                LedgerId::A => DEFAULT_FINALITY_DEPTH_A,
                LedgerId::B => DEFAULT_FINALITY_DEPTH_B,
            },
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            rate_limit_rps: DEFAULT_RATE_LIMIT_RPS,
            local_address: String::new(),
            resolver_stake: 0,
            key_ref: String::new(),
        }
    }
}

// ── Process configuration ────────────────────────────────────────────────────

/// Process-wide configuration, loaded once at start from a JSON file plus CLI
/// overrides. Invalid configuration aborts the process with exit code 2.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Config {
    pub network: Network,
    pub store_path: PathBuf,
    pub ledger_a: LedgerConfig,
    pub ledger_b: LedgerConfig,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// How long terminal swaps are retained before the sweep purges them.
    #[serde(default = "default_retention")]
    pub retention_ms: i64,

    #[serde(default)]
    pub fee_bps: u32,
    #[serde(default)]
    pub min_amount: Amount,
    #[serde(default = "default_max_amount")]
    pub max_amount: Amount,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_event_batch")]
    pub event_batch: usize,
    #[serde(default = "default_rpc_listen")]
    pub rpc_listen: String,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_backoff() -> u64 {
    DEFAULT_BASE_BACKOFF_MS
}

fn default_max_backoff() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

fn default_retention() -> i64 {
    DEFAULT_RETENTION_MS
}

fn default_max_amount() -> Amount {
    Amount::MAX
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_event_batch() -> usize {
    DEFAULT_EVENT_BATCH
}

fn default_rpc_listen() -> String {
    DEFAULT_RPC_LISTEN.to_string()
}

impl Config {
    /// Read and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, LockstepError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LockstepError::InvalidConfig(format!("reading {}: {e}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&json)
            .map_err(|e| LockstepError::InvalidConfig(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn ledger(&self, id: LedgerId) -> &LedgerConfig {
        match id {
            LedgerId::A => &self.ledger_a,
            LedgerId::B => &self.ledger_b,
        }
    }

    pub fn profile(&self) -> TimeoutProfile {
        self.network.profile()
    }

    /// Collect every violation, not just the first; operators fix a config
    /// file in one pass.
    pub fn validate(&self) -> Result<(), LockstepError> {
        let mut problems = Vec::new();

        if self.store_path.as_os_str().is_empty() {
            problems.push("store_path must not be empty".to_string());
        }
        if self.fee_bps > FEE_BPS_DENOM {
            problems.push(format!("fee_bps {} exceeds {}", self.fee_bps, FEE_BPS_DENOM));
        }
        if self.min_amount > self.max_amount {
            problems.push(format!(
                "min_amount {} exceeds max_amount {}",
                self.min_amount, self.max_amount
            ));
        }
        if self.max_attempts == 0 {
            problems.push("max_attempts must be at least 1".to_string());
        }
        if self.base_backoff_ms == 0 || self.base_backoff_ms > self.max_backoff_ms {
            problems.push(format!(
                "backoff range invalid: base {}ms, max {}ms",
                self.base_backoff_ms, self.max_backoff_ms
            ));
        }
        if self.retention_ms < 0 {
            problems.push("retention_ms must be non-negative".to_string());
        }
        if self.worker_count == 0 {
            problems.push("worker_count must be at least 1".to_string());
        }
        if self.event_batch == 0 {
            problems.push("event_batch must be at least 1".to_string());
        }
        if self.rpc_listen.parse::<SocketAddr>().is_err() {
            problems.push(format!("rpc_listen is not a socket address: {}", self.rpc_listen));
        }

        for (name, ledger) in [("ledger_a", &self.ledger_a), ("ledger_b", &self.ledger_b)] {
            if ledger.local_address.is_empty() {
                problems.push(format!("{name}.local_address must not be empty"));
            }
            if ledger.poll_interval_ms < 100 {
                problems.push(format!("{name}.poll_interval_ms must be at least 100"));
            }
            if ledger.rate_limit_rps == 0 {
                problems.push(format!("{name}.rate_limit_rps must be at least 1"));
            }
            if ledger.rpc_url.is_empty() && self.network != Network::Devnet {
                problems.push(format!(
                    "{name}.rpc_url is required on {} (in-memory ledger is devnet-only)",
                    self.network
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(LockstepError::InvalidConfig(problems.join("; ")))
        }
    }
}
