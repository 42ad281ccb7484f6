//! Harness configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use crate::error::ConfigError;

/// Wall-clock limit for a single supervised run
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Flag injected to bind the node to its working directory
pub const DEFAULT_DIR_FLAG: &str = "--appdir";

/// Prefix for the supervisor's temporary working directory
pub const DEFAULT_DIR_PREFIX: &str = "stability-node-appdir";

/// Port assumed when an RPC address carries none
pub const DEFAULT_RPC_PORT: u16 = 16110;

/// Port assumed when a P2P address carries none
pub const DEFAULT_P2P_PORT: u16 = 16111;

/// Process supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Executable launched once per argument set
    pub program: PathBuf,
    /// Fixed arguments placed before the injected directory flag
    pub launcher_args: Vec<String>,
    /// Reserved flag bound to the working directory
    pub dir_flag: String,
    /// Prefix for the temporary working directory name
    pub dir_prefix: String,
}

impl SupervisorConfig {
    /// Create a configuration for the given program with default flags
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            launcher_args: Vec::new(),
            dir_flag: DEFAULT_DIR_FLAG.to_string(),
            dir_prefix: DEFAULT_DIR_PREFIX.to_string(),
        }
    }

    /// Add fixed launcher arguments
    pub fn with_launcher_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Check the configuration before any run starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.as_os_str().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if !self.dir_flag.starts_with("--") || self.dir_flag.len() <= 2 {
            return Err(ConfigError::InvalidDirFlag(self.dir_flag.clone()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `stability_core=debug`
    pub level: String,
    /// Shortcut for `debug`
    pub verbose: bool,
    /// Let `RUST_LOG` override `level` when set
    pub respect_env: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
            respect_env: true,
        }
    }
}

impl LogConfig {
    /// The effective filter directive
    pub fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Build the subscriber filter
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if self.respect_env {
            if let Ok(filter) = EnvFilter::try_from_default_env() {
                return Ok(filter);
            }
        }
        EnvFilter::try_new(self.directive()).map_err(|e| ConfigError::InvalidLogLevel {
            level: self.directive().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Append `default_port` to `address` when it has none
///
/// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`.
pub fn normalize_address(address: &str, default_port: u16) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let address = address.trim();
    if address.is_empty() {
        return Err(invalid("empty address"));
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
        match tail {
            "" => (format!("[{}]", host), None),
            tail => match tail.strip_prefix(':') {
                Some(port) => (format!("[{}]", host), Some(port)),
                None => return Err(invalid("unexpected text after ']'")),
            },
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => {
                return Err(invalid("IPv6 addresses must be bracketed"))
            }
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (address.to_string(), None),
        }
    };

    if host.is_empty() || host == "[]" {
        return Err(invalid("missing host"));
    }

    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
        None => default_port,
    };

    Ok(format!("{}:{}", host, port))
}
