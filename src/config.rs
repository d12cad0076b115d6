// Configuration
//
// Every knob has a default; `AppConfig::from_env` overrides them from the
// process environment (after `.env` has been loaded by the binary).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default number of leading zero hex digits required in a block hash
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Default amount paid to the miner of each block
pub const DEFAULT_BLOCK_REWARD: i64 = 50;

/// Errors raised while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Consensus parameters of a ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Required leading zero hex digits; fixed for the ledger's lifetime
    pub difficulty: usize,

    /// Reward paid to the producer of each block
    pub block_reward: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            block_reward: DEFAULT_BLOCK_REWARD,
        }
    }
}

impl LedgerConfig {
    pub fn with_difficulty(difficulty: usize) -> Self {
        Self {
            difficulty,
            ..Self::default()
        }
    }
}

/// Miner loop settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerConfig {
    /// Address credited with block rewards
    pub address: String,

    /// Delay between two looks at the pending pool
    pub poll_interval: Duration,

    /// Delay after a failed produce or announce
    pub error_backoff: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            address: "miner".to_string(),
            poll_interval: Duration::from_millis(1_000),
            error_backoff: Duration::from_millis(5_000),
        }
    }
}

/// Network node settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Address the node binds to on its transport
    pub listen_address: String,

    /// Peers contacted during discovery
    pub bootstrap_peers: Vec<String>,

    /// Number of in-process replica nodes the binary spins up
    pub simulated_peers: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_address: "node-0".to_string(),
            bootstrap_peers: Vec::new(),
            simulated_peers: 0,
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Complete configuration of the node binary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub miner: MinerConfig,
    pub node: NodeConfig,
    pub api: ApiConfig,

    /// Directory of the block store; in-memory ledger when unset
    pub data_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Reads the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(difficulty) = parse(&lookup, "LEDGER_DIFFICULTY")? {
            config.ledger.difficulty = difficulty;
        }
        if let Some(reward) = parse::<i64, _>(&lookup, "LEDGER_BLOCK_REWARD")? {
            // Reward transactions need a positive amount to be well formed
            if reward <= 0 {
                return Err(ConfigError::Invalid {
                    key: "LEDGER_BLOCK_REWARD".to_string(),
                    value: reward.to_string(),
                });
            }
            config.ledger.block_reward = reward;
        }
        config.data_dir = lookup("LEDGER_DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        if let Some(address) = lookup("MINER_ADDRESS").filter(|a| !a.is_empty()) {
            config.miner.address = address;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "MINER_POLL_INTERVAL_MS")? {
            config.miner.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "MINER_ERROR_BACKOFF_MS")? {
            config.miner.error_backoff = Duration::from_millis(ms);
        }

        if let Some(address) = lookup("NODE_LISTEN_ADDRESS").filter(|a| !a.is_empty()) {
            config.node.listen_address = address;
        }
        if let Some(peers) = lookup("NODE_BOOTSTRAP_PEERS") {
            config.node.bootstrap_peers = peers
                .split(',')
                .map(str::trim)
                .filter(|peer| !peer.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(count) = parse(&lookup, "NODE_SIMULATED_PEERS")? {
            config.node.simulated_peers = count;
        }

        if let Some(host) = lookup("HOST").filter(|h| !h.is_empty()) {
            config.api.host = host;
        }
        if let Some(port) = parse(&lookup, "PORT")? {
            config.api.port = port;
        }

        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
