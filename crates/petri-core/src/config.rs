use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_opt(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

// ── Master config ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// ROUTER port for the worker-registration listener.
    pub rpc_port: u16,
    /// HTTP port serving the websocket subscribers and `GET /metrics`.
    pub http_port: u16,
    /// Capacity of the worker client pool.
    pub conn_buffer_size: usize,
    /// Side length of a spatial bucket.
    pub bucket_width: u32,
    /// Directory holding persisted simulation snapshots.
    pub states_dir: PathBuf,
    pub seed: SeedConfig,
}

impl MasterConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            rpc_port: env_u16("PETRI_RPC_PORT", 4000),
            http_port: env_u16("PETRI_HTTP_PORT", 4001),
            conn_buffer_size: env_usize("PETRI_CONN_BUFFER_SIZE", 64),
            bucket_width: env_u32("PETRI_BUCKET_WIDTH", 10),
            states_dir: PathBuf::from(env_or("PETRI_STATES_DIR", "states")),
            seed: SeedConfig {
                state_file: env_opt("PETRI_STATE_FILE"),
                load_latest_state: env_bool("PETRI_LOAD_LATEST_STATE", false),
                big_bang_config: env_opt("PETRI_BIG_BANG_CONFIG").map(PathBuf::from),
            },
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  rpc:      port={}", self.rpc_port);
        tracing::info!("  http:     port={}", self.http_port);
        tracing::info!("  pool:     buffer={}", self.conn_buffer_size);
        tracing::info!("  buckets:  width={}", self.bucket_width);
        tracing::info!("  states:   dir={}", self.states_dir.display());
        match self.seed.resolve() {
            Ok(source) => tracing::info!("  seed:     {}", source),
            Err(e) => tracing::warn!("  seed:     unresolved ({})", e),
        }
    }
}

// ── Seed source ───────────────────────────────────────────────

/// Where the initial population comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    /// Explicit snapshot file name inside the states directory.
    pub state_file: Option<String>,
    /// Resume from the most recent snapshot in the states directory.
    pub load_latest_state: bool,
    /// Path to big-bang seed parameters.
    pub big_bang_config: Option<PathBuf>,
}

/// The resolved choice, in precedence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedSource {
    StateFile(String),
    LatestState,
    BigBang(PathBuf),
}

impl SeedConfig {
    /// Pick the seed source. Precedence: explicit state file, then latest
    /// state, then big bang. Configuring more than one is tolerated (the
    /// higher-precedence source wins, with a warning); configuring none is an
    /// error.
    pub fn resolve(&self) -> Result<SeedSource, CoreError> {
        let configured = usize::from(self.state_file.is_some())
            + usize::from(self.load_latest_state)
            + usize::from(self.big_bang_config.is_some());
        if configured > 1 {
            tracing::warn!(
                "{} seed sources configured, using the highest-precedence one",
                configured
            );
        }

        if let Some(name) = &self.state_file {
            return Ok(SeedSource::StateFile(name.clone()));
        }
        if self.load_latest_state {
            return Ok(SeedSource::LatestState);
        }
        if let Some(path) = &self.big_bang_config {
            return Ok(SeedSource::BigBang(path.clone()));
        }
        Err(CoreError::NoSeedSource)
    }
}

impl std::fmt::Display for SeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateFile(name) => write!(f, "state file '{name}'"),
            Self::LatestState => write!(f, "latest state"),
            Self::BigBang(path) => write!(f, "big bang from {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_requires_a_source() {
        let seed = SeedConfig::default();
        assert!(matches!(seed.resolve(), Err(CoreError::NoSeedSource)));
    }

    #[test]
    fn resolve_precedence_state_file_first() {
        let seed = SeedConfig {
            state_file: Some("0000000042.state".into()),
            load_latest_state: true,
            big_bang_config: Some(PathBuf::from("bigbang.toml")),
        };
        assert_eq!(
            seed.resolve().unwrap(),
            SeedSource::StateFile("0000000042.state".into())
        );
    }

    #[test]
    fn resolve_precedence_latest_over_big_bang() {
        let seed = SeedConfig {
            state_file: None,
            load_latest_state: true,
            big_bang_config: Some(PathBuf::from("bigbang.toml")),
        };
        assert_eq!(seed.resolve().unwrap(), SeedSource::LatestState);
    }

    #[test]
    fn resolve_big_bang_alone() {
        let seed = SeedConfig {
            state_file: None,
            load_latest_state: false,
            big_bang_config: Some(PathBuf::from("bigbang.toml")),
        };
        assert_eq!(
            seed.resolve().unwrap(),
            SeedSource::BigBang(PathBuf::from("bigbang.toml"))
        );
    }
}
