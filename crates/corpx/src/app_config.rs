//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! Layers, lowest to highest priority:
//! 1. serde defaults (every knob except the store has one)
//! 2. `CORPX_*` environment variables, nested with `__`
//!    (`CORPX_RUNTIME__WORKER_COUNT=8`)
//! 3. the TOML file, if one was given

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{ElasticsearchStoreConfig, InMemoryStoreConfig};

/// 📦 One struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🗄️ Which document store, and how to reach it. The only required section.
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub deadlines: DeadlineConfig,
}

/// 🎭 The many faces of a document store.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    Elasticsearch(ElasticsearchStoreConfig),
    InMemory(InMemoryStoreConfig),
}

/// 🧵 Concurrency knobs. The pool is sized off the worker count unless told otherwise.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Tokio worker threads, and the base for the derived pool size.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Page size for full-collection reads.
    #[serde(default = "default_batch_size_hint")]
    pub batch_size_hint: usize,
    /// Explicit connection pool size. `None` means `2 × worker_count`.
    #[serde(default)]
    pub pool_size: Option<usize>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long the store may take to report a usable primary at startup.
    #[serde(default = "default_server_selection_timeout_secs")]
    pub server_selection_timeout_secs: u64,
}

fn default_worker_count() -> usize {
    4
}

fn default_batch_size_hint() -> usize {
    100
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_server_selection_timeout_secs() -> u64 {
    5
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_size_hint: default_batch_size_hint(),
            pool_size: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            server_selection_timeout_secs: default_server_selection_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    /// 🏊 Connections in the pool: the explicit setting, or twice the workers.
    /// Never zero, because a pool of nothing is a queue of everything.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size
            .unwrap_or(self.worker_count.saturating_mul(2))
            .max(1)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_secs(self.server_selection_timeout_secs)
    }
}

/// 🚪 Where we listen and how long we wait on the way out.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// In-flight requests get this long to finish after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_bind_addr() -> String {
    String::from("0.0.0.0:8080")
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// ⏱️ Per-operation budgets for store calls made on behalf of a request.
#[derive(Debug, Deserialize, Clone)]
pub struct DeadlineConfig {
    #[serde(default = "default_health_secs")]
    pub health_secs: u64,
    #[serde(default = "default_batch_secs")]
    pub batch_secs: u64,
    #[serde(default = "default_update_secs")]
    pub update_secs: u64,
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
}

fn default_health_secs() -> u64 {
    5
}

fn default_batch_secs() -> u64 {
    30
}

fn default_update_secs() -> u64 {
    10
}

fn default_fetch_secs() -> u64 {
    10
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            health_secs: default_health_secs(),
            batch_secs: default_batch_secs(),
            update_secs: default_update_secs(),
            fetch_secs: default_fetch_secs(),
        }
    }
}

/// 🚀 Load the config: from a file, from env vars, or from the sheer power of hoping.
///
/// - `config_file_name` is `None` → env vars only.
/// - `config_file_name` is `Some` → env vars + TOML file, merged. TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("CORPX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (CORPX_*). \
             Is there a [store.Elasticsearch] or [store.InMemory] section in there?",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (CORPX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}
