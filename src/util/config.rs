//! Environment-driven configuration.
//!
//! All knobs are read once from the process environment:
//! - `SLIPWAY_CACHE_DIR`: fingerprint cache root (default `.slipway`)
//! - `SLIPWAY_NO_PARALLEL`: evaluate prerequisites strictly sequentially
//! - `SLIPWAY_PROF`: log per-target wall time
//! - `SLIPWAY_PROC_LIMIT`: concurrency cap for external process helpers
//!   (default 12); the scheduler itself never consults this.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Environment variable naming the fingerprint cache root.
pub const CACHE_DIR_ENV: &str = "SLIPWAY_CACHE_DIR";

/// Environment variable disabling parallel prerequisite evaluation.
pub const NO_PARALLEL_ENV: &str = "SLIPWAY_NO_PARALLEL";

/// Environment variable enabling per-target timing logs.
pub const PROF_ENV: &str = "SLIPWAY_PROF";

/// Environment variable capping external process concurrency.
pub const PROC_LIMIT_ENV: &str = "SLIPWAY_PROC_LIMIT";

const DEFAULT_CACHE_DIR: &str = ".slipway";
const DEFAULT_PROC_LIMIT: usize = 12;

/// Runtime configuration for a build invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for persisted fingerprints.
    pub cache_dir: PathBuf,

    /// Evaluate prerequisites one at a time instead of fanning out.
    pub sequential: bool,

    /// Log wall time per target.
    pub profile: bool,

    /// Concurrency cap handed to process-spawning helpers. Not used by
    /// the scheduler.
    pub process_limit: usize,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let cache_dir = std::env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));

        let process_limit = std::env::var(PROC_LIMIT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_PROC_LIMIT);

        Config {
            cache_dir,
            sequential: env_flag(NO_PARALLEL_ENV),
            profile: env_flag(PROF_ENV),
            process_limit,
        }
    }

    /// Create a configuration rooted at a specific cache directory,
    /// leaving the other knobs at their defaults.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Config {
            cache_dir: cache_dir.into(),
            ..Config::default()
        }
    }

    /// Semaphore sized by the external process limit, for collaborators
    /// that wrap command spawning.
    pub fn process_semaphore(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.process_limit))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            sequential: false,
            profile: false,
            process_limit: DEFAULT_PROC_LIMIT,
        }
    }
}

/// A flag variable is truthy when set to any non-empty value.
fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty()).unwrap_or(false)
}
