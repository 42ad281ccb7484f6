//! Panic-isolated task spawning
//!
//! Every background unit of work in the harness goes through a [`Spawner`].
//! A panic inside a spawned unit is caught at the task boundary, logged with
//! the unit's label and counted; it never reaches the caller. Callers that
//! need a result must pass a channel into the unit.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use tracing::error;

static PANIC_HOOK: Once = Once::new();

/// Counters shared by all clones of a spawner
#[derive(Debug, Default)]
struct Counters {
    spawned: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of spawner activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpawnStats {
    /// Units started
    pub spawned: u64,
    /// Units that panicked
    pub panicked: u64,
}

/// Spawns labelled units of work that cannot take the harness down
#[derive(Debug, Clone, Default)]
pub struct Spawner {
    counters: Arc<Counters>,
}

impl Spawner {
    /// Create a spawner with fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` as an independent tokio task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, label: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        let counters = self.counters.clone();
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            if let Err(payload) = AssertUnwindSafe(future).catch_unwind().await {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(task = %label, panic = %panic_message(payload.as_ref()), "Fatal error in spawned task");
            }
        });
    }

    /// Run a blocking closure on the blocking pool
    pub fn spawn_blocking<F>(&self, label: impl Into<String>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.into();
        let counters = self.counters.clone();
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        tokio::task::spawn_blocking(move || {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(task = %label, panic = %panic_message(payload.as_ref()), "Fatal error in blocking task");
            }
        });
    }

    /// Await `future` in place, turning a panic into `None`
    ///
    /// The panic is logged with `label` and counted like a spawned unit's.
    pub async fn run_guarded<F>(&self, label: &str, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(output) => Some(output),
            Err(payload) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(program = %label, panic = %panic_message(payload.as_ref()), "Fatal error in program");
                None
            }
        }
    }

    /// Current counters
    pub fn stats(&self) -> SpawnStats {
        SpawnStats {
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Route panic reports through `tracing` with program, location and backtrace
///
/// Installed at most once per process; later calls are no-ops.
pub fn install_panic_hook(program: impl Into<String>) {
    let program = program.into();
    PANIC_HOOK.call_once(move || {
        std::panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown".to_string());
            let thread = std::thread::current();
            let backtrace = std::backtrace::Backtrace::force_capture();
            error!(
                program = %program,
                thread = thread.name().unwrap_or("<unnamed>"),
                location = %location,
                panic = %panic_message(info.payload()),
                "Panic\n{}",
                backtrace
            );
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_for_panics(spawner: &Spawner, expected: u64) {
        for _ in 0..200 {
            if spawner.stats().panicked >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} panics, saw {:?}", expected, spawner.stats());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_spawn_delivers_through_channel() {
        let spawner = Spawner::new();
        let (tx, rx) = oneshot::channel();

        spawner.spawn("send-value", async move {
            let _ = tx.send(7u32);
        });

        assert_eq!(rx.await.unwrap(), 7);
        assert_eq!(spawner.stats().spawned, 1);
        assert_eq!(spawner.stats().panicked, 0);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let spawner = Spawner::new();
        let (tx, rx) = oneshot::channel::<()>();

        spawner.spawn("panicking-unit", async move {
            let _keep = tx;
            panic!("unit failed");
        });

        // Sender dropped during unwind; the caller sees closure, not the panic
        assert!(rx.await.is_err());
        wait_for_panics(&spawner, 1).await;

        // Spawner still usable afterwards
        let (tx, rx) = oneshot::channel();
        spawner.spawn("after-panic", async move {
            let _ = tx.send("alive");
        });
        assert_eq!(rx.await.unwrap(), "alive");
        assert_eq!(spawner.stats(), SpawnStats { spawned: 2, panicked: 1 });
    }

    #[tokio::test]
    async fn test_blocking_panic_is_contained() {
        let spawner = Spawner::new();
        spawner.spawn_blocking("blocking-panic", || panic!("blocking unit failed"));
        wait_for_panics(&spawner, 1).await;
    }

    #[tokio::test]
    async fn test_run_guarded_contains_panic() {
        let spawner = Spawner::new();

        let value = spawner.run_guarded("guarded", async { 11u32 }).await;
        assert_eq!(value, Some(11));

        let crashed: Option<u32> = spawner
            .run_guarded("guarded", async { panic!("program body failed") })
            .await;
        assert_eq!(crashed, None);
        assert_eq!(spawner.stats(), SpawnStats { spawned: 0, panicked: 1 });
    }

    #[test]
    fn test_install_panic_hook_is_idempotent() {
        install_panic_hook("first");
        install_panic_hook("second");
        let _ = std::panic::take_hook();
    }
}
