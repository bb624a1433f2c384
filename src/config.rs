//! Configuration
//!
//! Hierarchical configuration loading from:
//! - `config.toml` (default configuration)
//! - `config.local.toml` (git-ignored local overrides)
//! - Environment variables (`FACTGRAPH_` prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [scheduler]
//! num_workers = 0          # 0 = use all available CPU cores
//!
//! [pool]
//! initial_chunk_elems = 64
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FACTGRAPH_SCHEDULER__NUM_WORKERS=8
//! ```

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Scheduler tuning: worker count and work-stealing retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = use all available CPU cores.
    #[serde(default)]
    pub num_workers: usize,

    /// Capacity hint for each worker's node queue (a `crossbeam_deque::Worker`
    /// grows past this, but pre-sizing avoids early reallocation).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity_hint: usize,

    /// Number of consecutive failed steal attempts before a worker rechecks
    /// `all_threads_finished()` instead of immediately retrying `busy_wait`.
    #[serde(default = "default_steal_retries")]
    pub steal_retries_before_recheck: usize,
}

fn default_queue_capacity() -> usize {
    256
}
fn default_steal_retries() -> usize {
    8
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            num_workers: 0,
            queue_capacity_hint: default_queue_capacity(),
            steal_retries_before_recheck: default_steal_retries(),
        }
    }
}

/// Allocator pool tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of elements in the first chunk of a size class. Doubles on
    /// exhaustion up to `max_chunk_elems`.
    #[serde(default = "default_initial_chunk_elems")]
    pub initial_chunk_elems: usize,

    #[serde(default = "default_max_chunk_elems")]
    pub max_chunk_elems: usize,
}

fn default_initial_chunk_elems() -> usize {
    64
}
fn default_max_chunk_elems() -> usize {
    1 << 20
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial_chunk_elems: default_initial_chunk_elems(),
            max_chunk_elems: default_max_chunk_elems(),
        }
    }
}

/// Logging configuration. The crate never installs a global `tracing`
/// subscriber itself — that is the embedding application's call; this struct
/// only carries the intent through to whoever does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations.
    ///
    /// Merges in order:
    /// 1. `config.toml` (base configuration)
    /// 2. `config.local.toml` (local overrides, git-ignored)
    /// 3. Environment variables (`FACTGRAPH_` prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("FACTGRAPH_").split("__"))
            .extract()
    }

    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FACTGRAPH_").split("__"))
            .extract()
    }

    /// Number of workers to actually spawn, resolving `0` to the CPU count.
    pub fn resolved_num_workers(&self) -> usize {
        if self.scheduler.num_workers == 0 {
            num_cpus::get()
        } else {
            self.scheduler.num_workers
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scheduler: SchedulerConfig::default(),
            pool: PoolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.scheduler.num_workers, 0);
        assert_eq!(config.pool.initial_chunk_elems, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn resolved_num_workers_falls_back_to_cpu_count() {
        let config = Config::default();
        assert_eq!(config.resolved_num_workers(), num_cpus::get());
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("[pool]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.scheduler.queue_capacity_hint, config.scheduler.queue_capacity_hint);
    }
}
