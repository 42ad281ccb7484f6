//! Process supervisor
//!
//! Launches the node once per [`ArgumentSet`], strictly one run at a time,
//! each inside a freshly reset working directory. A run that outlives the
//! timeout window is killed. Runs that finish with an error are collected
//! as [`CommandFailure`]s and returned when the input channel closes.
//!
//! ```text
//!  args_rx ──► reset dir ──► validate ──► spawn ──► select! ─┬─ exited ──► record failure?
//!                                           │                 └─ timeout ─► kill
//!                                           └─ waiter task (panic-isolated) ──oneshot──┘
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use crate::config::{SupervisorConfig, DEFAULT_RUN_TIMEOUT};
use crate::error::{ExecutionError, SupervisorError};
use crate::panics::Spawner;

/// Log target for the node's standard output
pub const STDOUT_TARGET: &str = "node_stdout";

/// Log target for the node's standard error
pub const STDERR_TARGET: &str = "node_stderr";

/// One command-line invocation of the supervised program
pub type ArgumentSet = Vec<String>;

type KillReply = oneshot::Sender<io::Result<()>>;

/// How a single run ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Process exited before the timeout; carries the failure if it had one
    Completed(Option<CommandFailure>),
    /// Timeout elapsed and the process was killed
    Killed,
}

/// A run that finished within the timeout but returned an error
#[derive(Debug)]
pub struct CommandFailure {
    /// Full command line that was run
    pub command: String,
    /// What went wrong
    pub error: ExecutionError,
    /// When the failure was observed
    pub failed_at: DateTime<Utc>,
    /// Time from launch to failure
    pub elapsed: Duration,
}

impl CommandFailure {
    fn new(command: String, error: ExecutionError, elapsed: Duration) -> Self {
        Self {
            command,
            error,
            failed_at: Utc::now(),
            elapsed,
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command `{}` failed: {}", self.command, self.error)
    }
}

/// Working directory owned by one supervisor loop
///
/// Removed when dropped, on every exit path of the loop.
struct WorkingDirectory {
    dir: TempDir,
}

impl WorkingDirectory {
    fn create(prefix: &str) -> Result<Self, SupervisorError> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|source| SupervisorError::WorkingDirectory {
                path: std::env::temp_dir().join(prefix),
                source,
            })?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove everything a previous run left behind and recreate the directory
    async fn reset(&self) -> Result<(), SupervisorError> {
        let path = self.path();
        let wrap = |source| SupervisorError::WorkingDirectory {
            path: path.to_path_buf(),
            source,
        };
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(wrap(e)),
        }
        tokio::fs::create_dir_all(path).await.map_err(wrap)
    }
}

/// Runs the supervised program over a stream of argument sets
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    spawner: Spawner,
    timeout: Duration,
}

impl ProcessSupervisor {
    /// Create a supervisor with the standard timeout window
    pub fn new(config: SupervisorConfig, spawner: Spawner) -> Self {
        Self {
            config,
            spawner,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    /// Override the timeout window for every run of this supervisor
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The timeout window
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run until `args_rx` is closed, returning every recorded failure
    ///
    /// Directory errors, a reserved flag in an argument set and a failed
    /// kill abort the loop immediately.
    pub async fn run(
        &self,
        mut args_rx: mpsc::Receiver<ArgumentSet>,
    ) -> Result<Vec<CommandFailure>, SupervisorError> {
        let mut failures = Vec::new();
        let work_dir = WorkingDirectory::create(&self.config.dir_prefix)?;
        debug!(path = %work_dir.path().display(), "Created working directory");

        while let Some(args) = args_rx.recv().await {
            work_dir.reset().await?;

            let args = inject_dir_arg(&self.config.dir_flag, work_dir.path(), args)?;

            match self.run_once(args).await? {
                RunOutcome::Completed(Some(failure)) => {
                    error!("{}", failure);
                    failures.push(failure);
                }
                RunOutcome::Completed(None) | RunOutcome::Killed => {}
            }
        }

        info!(failures = failures.len(), "Command loop finished");
        Ok(failures)
    }

    async fn run_once(&self, args: ArgumentSet) -> Result<RunOutcome, SupervisorError> {
        let descriptor = self.describe(&args);
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.launcher_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Running `{}`", descriptor);
        let started = Instant::now();

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure =
                    CommandFailure::new(descriptor, ExecutionError::Spawn(e), started.elapsed());
                return Ok(RunOutcome::Completed(Some(failure)));
            }
        };
        // Forwarders stop when this run ends, even if a grandchild keeps the pipes open
        let (stop_tx, stop_rx) = watch::channel(());
        self.forward_output(&mut child, stop_rx);

        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        self.spawner
            .spawn("supervisor-wait", wait_for_exit(child, exit_tx, kill_rx));

        let outcome = tokio::select! {
            exit = exit_rx => {
                let elapsed = started.elapsed();
                match completion_error(exit) {
                    Some(error) => Ok(RunOutcome::Completed(Some(
                        CommandFailure::new(descriptor, error, elapsed),
                    ))),
                    None => {
                        info!("`{}` exited cleanly after {}", descriptor, format_elapsed(elapsed));
                        Ok(RunOutcome::Completed(None))
                    }
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                kill(&descriptor, kill_tx).await.map(|()| {
                    info!("Successfully ran `{}`", descriptor);
                    RunOutcome::Killed
                })
            }
        };
        drop(stop_tx);
        outcome
    }

    fn forward_output(&self, child: &mut Child, stop: watch::Receiver<()>) {
        if let Some(stdout) = child.stdout.take() {
            self.spawner.spawn(
                "supervisor-stdout",
                forward_lines(stdout, OutputStream::Stdout, stop.clone()),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawner.spawn(
                "supervisor-stderr",
                forward_lines(stderr, OutputStream::Stderr, stop),
            );
        }
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = vec![self.config.program.display().to_string()];
        parts.extend(self.config.launcher_args.iter().cloned());
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }
}

/// Prepend the working directory flag, rejecting sets that already carry it
pub fn inject_dir_arg(
    flag: &str,
    dir: &Path,
    args: ArgumentSet,
) -> Result<ArgumentSet, SupervisorError> {
    if let Some(argument) = args.iter().find(|arg| arg.starts_with(flag)) {
        return Err(SupervisorError::InvalidArgument {
            argument: argument.clone(),
            flag: flag.to_string(),
        });
    }

    let mut injected = Vec::with_capacity(args.len() + 2);
    injected.push(flag.to_string());
    injected.push(dir.display().to_string());
    injected.extend(args);
    Ok(injected)
}

async fn wait_for_exit(
    mut child: Child,
    exit_tx: oneshot::Sender<io::Result<ExitStatus>>,
    kill_rx: oneshot::Receiver<KillReply>,
) {
    tokio::select! {
        status = child.wait() => {
            let _ = exit_tx.send(status);
        }
        Ok(reply) = kill_rx => {
            let _ = reply.send(child.kill().await);
        }
    }
}

/// Ask the waiter to kill the child and wait for the verdict
async fn kill(descriptor: &str, kill_tx: oneshot::Sender<KillReply>) -> Result<(), SupervisorError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    if kill_tx.send(reply_tx).is_err() {
        // Waiter already finished; the child has exited or was dropped
        debug!("`{}` exited before it could be killed", descriptor);
        return Ok(());
    }

    match reply_rx.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(SupervisorError::Kill {
            command: descriptor.to_string(),
            source,
        }),
        Err(_) => {
            debug!("`{}` exited while the kill was in flight", descriptor);
            Ok(())
        }
    }
}

fn completion_error(
    exit: Result<io::Result<ExitStatus>, oneshot::error::RecvError>,
) -> Option<ExecutionError> {
    match exit {
        Ok(Ok(status)) if status.success() => None,
        Ok(Ok(status)) => Some(ExecutionError::ExitStatus(status)),
        Ok(Err(e)) => Some(ExecutionError::Wait(e)),
        Err(_) => Some(ExecutionError::WaiterAborted),
    }
}

fn format_elapsed(elapsed: Duration) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Forward node output line by line until end of stream or `stop` closes
///
/// Output already buffered in the pipe is drained before `stop` is honoured.
async fn forward_lines<R>(stream: R, kind: OutputStream, mut stop: watch::Receiver<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            biased;
            next = lines.next_line() => match next {
                Ok(Some(line)) => match kind {
                    OutputStream::Stdout => trace!(target: STDOUT_TARGET, "{}", line),
                    OutputStream::Stderr => warn!(target: STDERR_TARGET, "{}", line),
                },
                Ok(None) => break,
                Err(e) => {
                    debug!(stream = ?kind, "Stopped forwarding node output: {}", e);
                    break;
                }
            },
            _ = stop.changed() => {
                debug!(stream = ?kind, "Run ended with node output still open");
                break;
            }
        }
    }
}
