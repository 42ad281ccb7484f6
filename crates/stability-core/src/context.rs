//! Harness context
//!
//! One [`HarnessContext`] is built at startup and passed by reference to
//! every component. It owns the logging setup, the panic hook and the
//! [`Spawner`] used for all background work.

use std::future::Future;
use std::io::Write;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::config::LogConfig;
use crate::error::ConfigError;
use crate::panics::{install_panic_hook, SpawnStats, Spawner};

/// Explicit replacement for process-wide logger and spawner globals
#[derive(Debug)]
pub struct HarnessContext {
    label: String,
    spawner: Spawner,
}

impl HarnessContext {
    /// Install the global subscriber and panic hook
    ///
    /// Fails if the log level is invalid or a subscriber is already set.
    pub fn init(label: impl Into<String>, config: &LogConfig) -> Result<Self, ConfigError> {
        let filter = config.env_filter()?;
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| ConfigError::LoggingInit(e.to_string()))?;

        let label = label.into();
        install_panic_hook(label.clone());

        let context = Self::detached(label);
        info!(program = %context.label, "Stability harness started");
        Ok(context)
    }

    /// Build a context without touching global logging state
    ///
    /// For embedding and tests where the subscriber is owned elsewhere.
    pub fn detached(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            spawner: Spawner::new(),
        }
    }

    /// Program label used in log output
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Spawner for panic-isolated background work
    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    /// Run the program body, logging a panic under this context's label
    ///
    /// Returns `None` if the body panicked.
    pub async fn guard<F: Future>(&self, body: F) -> Option<F::Output> {
        self.spawner.run_guarded(&self.label, body).await
    }

    /// Report task statistics and flush output streams
    pub fn close(self) -> SpawnStats {
        let stats = self.spawner.stats();
        if stats.panicked > 0 {
            warn!(
                program = %self.label,
                spawned = stats.spawned,
                panicked = stats.panicked,
                "Stability harness finished with panicked tasks"
            );
        } else {
            info!(program = %self.label, spawned = stats.spawned, "Stability harness finished");
        }
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        stats
    }
}
