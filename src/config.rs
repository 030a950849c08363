//! Loader tuning and the option records handed over by push/pull tooling.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::DEFAULT_MAX_CONCURRENT_FETCHES;
use crate::oci::keychain::MultiKeychain;
use crate::signing::SigningConfig;

/// Traversal settings for [`crate::loader::ManifestLoader`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Upper bound on fetches in flight; 1 walks strictly depth-first in order
    pub max_concurrency: usize,
    /// Per-fetch deadline, on top of the caller's cancellation token
    pub fetch_timeout: Option<Duration>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENT_FETCHES,
            fetch_timeout: None,
        }
    }
}

impl LoaderConfig {
    /// Sequential depth-first traversal
    pub fn sequential() -> Self {
        Self {
            max_concurrency: 1,
            ..Self::default()
        }
    }

    /// Reads `UOR_MAX_CONCURRENT_FETCHES` and `UOR_FETCH_TIMEOUT_SECS`,
    /// falling back to defaults for unset or unparsable values
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = std::env::var("UOR_MAX_CONCURRENT_FETCHES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            config.max_concurrency = n.max(1);
        }
        if let Some(secs) = std::env::var("UOR_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.fetch_timeout = Some(Duration::from_secs(secs));
        }
        config
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    pub fn is_verbose(&self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => anyhow::bail!("unknown log level '{}'", other),
        }
    }
}

/// Options for pushing (and optionally signing) a collection
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub destination: String,
    /// Docker-style credential config files, consulted in order
    pub configs: Vec<PathBuf>,
    pub plain_http: bool,
    pub insecure: bool,
    pub log_level: LogLevel,
    pub sign: bool,
}

/// Options for pulling (and optionally verifying) a collection
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    pub source: String,
    pub configs: Vec<PathBuf>,
    pub plain_http: bool,
    pub insecure: bool,
    pub log_level: LogLevel,
    pub verify: bool,
}

fn keychain_for(configs: &[PathBuf]) -> MultiKeychain {
    if configs.is_empty() {
        MultiKeychain::default_docker()
    } else {
        MultiKeychain::from_config_files(configs)
    }
}

impl PushOptions {
    /// Keychain over `configs`, or the docker default when none are given
    pub fn keychain(&self) -> MultiKeychain {
        keychain_for(&self.configs)
    }

    pub fn signing_config(&self) -> SigningConfig {
        SigningConfig::default()
            .allow_insecure(self.plain_http || self.insecure)
            .verbose(self.log_level.is_verbose())
    }
}

impl PullOptions {
    /// Keychain over `configs`, or the docker default when none are given
    pub fn keychain(&self) -> MultiKeychain {
        keychain_for(&self.configs)
    }

    pub fn signing_config(&self) -> SigningConfig {
        SigningConfig::default()
            .allow_insecure(self.plain_http || self.insecure)
            .verbose(self.log_level.is_verbose())
    }
}
