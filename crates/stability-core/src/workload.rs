//! Workload files and the producer that streams them
//!
//! A workload file is line oriented: one item per line, blank lines and
//! lines starting with `#` are skipped. A [`LineCodec`] turns each line into
//! an item. [`WorkloadReader::spawn`] decodes in a panic-isolated task and
//! hands items over one at a time, in file order, through a channel with a
//! single slot. The channel closes after the last item or right after a
//! terminal error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

use crate::error::WorkloadError;
use crate::panics::{panic_message, Spawner};
use crate::supervisor::ArgumentSet;

/// A decoded item and where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadEntry<T> {
    /// 1-based index among decoded items
    pub position: usize,
    /// 1-based line number in the file
    pub line: usize,
    /// The item itself
    pub item: T,
}

/// What the producer delivers for each step
pub type WorkloadResult<T> = Result<WorkloadEntry<T>, WorkloadError>;

/// Short human-readable identification of an item, used in error reports
pub trait Describe {
    /// Describe the item
    fn describe(&self) -> String;
}

/// Decodes one line of a workload file
pub trait LineCodec: Send + Sync + 'static {
    /// Item produced per line
    type Item: Send + 'static;

    /// Decode a trimmed, non-empty line
    fn decode(&self, line: &str) -> Result<Self::Item, String>;
}

/// One JSON document per line
pub struct JsonLines<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonLines<T> {
    /// Create the codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonLines<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LineCodec for JsonLines<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn decode(&self, line: &str) -> Result<T, String> {
        serde_json::from_str(line).map_err(|e| e.to_string())
    }
}

/// Whitespace separated arguments; double quotes group words
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentLines;

impl LineCodec for ArgumentLines {
    type Item = ArgumentSet;

    fn decode(&self, line: &str) -> Result<ArgumentSet, String> {
        split_arguments(line)
    }
}

fn split_arguments(line: &str) -> Result<ArgumentSet, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// A raw block, kept opaque
///
/// Decoded from a JSON object; the optional `hash` member is only used to
/// identify the block in reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block(Map<String, Value>);

impl Block {
    /// Wrap a JSON object
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// The block's `hash` member, if present
    pub fn hash(&self) -> Option<&str> {
        self.0.get("hash").and_then(Value::as_str)
    }

    /// All members
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl Describe for Block {
    fn describe(&self) -> String {
        match self.hash() {
            Some(hash) => format!("block {}", hash),
            None => "block".to_string(),
        }
    }
}

/// An RPC command descriptor
///
/// Decoded from a JSON object that carries a string `method`; the whole
/// object is what gets sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct RpcCommand {
    method: String,
    body: Value,
}

impl RpcCommand {
    /// The command's method name
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The full request object
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// The request as a single JSON line
    pub fn to_json(&self) -> String {
        self.body.to_string()
    }
}

impl TryFrom<Value> for RpcCommand {
    type Error = String;

    fn try_from(body: Value) -> Result<Self, Self::Error> {
        let method = body
            .as_object()
            .ok_or_else(|| "RPC command must be a JSON object".to_string())?
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| "RPC command is missing a string 'method'".to_string())?
            .to_string();
        Ok(Self { method, body })
    }
}

impl From<RpcCommand> for Value {
    fn from(command: RpcCommand) -> Self {
        command.body
    }
}

impl Describe for RpcCommand {
    fn describe(&self) -> String {
        format!("command {}", self.method)
    }
}

/// An opened, not yet consumed workload file
pub struct WorkloadReader<C: LineCodec> {
    path: PathBuf,
    file: File,
    codec: C,
}

impl<C: LineCodec> WorkloadReader<C> {
    /// Open `path`, failing early if it is missing or not a regular file
    pub async fn open(path: impl AsRef<Path>, codec: C) -> Result<Self, WorkloadError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |reason: String| WorkloadError::Open {
            path: path.clone(),
            reason,
        };

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| open_err(e.to_string()))?;
        if !metadata.is_file() {
            return Err(open_err("not a regular file".to_string()));
        }
        let file = File::open(&path).await.map_err(|e| open_err(e.to_string()))?;

        Ok(Self { path, file, codec })
    }

    /// Path of the workload file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start producing; consumes the reader so the sequence runs only once
    pub fn spawn(self, spawner: &Spawner) -> mpsc::Receiver<WorkloadResult<C::Item>> {
        let (tx, rx) = mpsc::channel(1);
        spawner.spawn("workload-producer", self.produce(tx));
        rx
    }

    /// Decode the whole file eagerly; stops at the first error
    pub async fn read_all(self, spawner: &Spawner) -> Result<Vec<C::Item>, WorkloadError> {
        let mut rx = self.spawn(spawner);
        let mut items = Vec::new();
        while let Some(entry) = rx.recv().await {
            items.push(entry?.item);
        }
        Ok(items)
    }

    async fn produce(self, tx: mpsc::Sender<WorkloadResult<C::Item>>) {
        let mut lines = BufReader::new(self.file).lines();
        let mut line = 0;
        let mut position = 0;

        loop {
            line += 1;
            let text = match lines.next_line().await {
                Ok(Some(text)) => text,
                Ok(None) => break,
                Err(e) => {
                    let _ = tx
                        .send(Err(WorkloadError::Read {
                            line,
                            reason: e.to_string(),
                        }))
                        .await;
                    break;
                }
            };

            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let decoded = std::panic::catch_unwind(AssertUnwindSafe(|| self.codec.decode(trimmed)));
            let step = match decoded {
                Ok(Ok(item)) => {
                    position += 1;
                    Ok(WorkloadEntry {
                        position,
                        line,
                        item,
                    })
                }
                Ok(Err(reason)) => Err(WorkloadError::Decode { line, reason }),
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!(path = %self.path.display(), line, panic = %reason, "Workload decoder panicked");
                    Err(WorkloadError::Aborted { line, reason })
                }
            };
            let terminal = step.is_err();

            if tx.send(step).await.is_err() {
                debug!(path = %self.path.display(), "Workload consumer went away");
                return;
            }
            if terminal {
                break;
            }
        }

        debug!(path = %self.path.display(), items = position, "Workload producer finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn workload_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_split_arguments() {
        assert_eq!(
            split_arguments("  --devnet   --nolisten ").unwrap(),
            vec!["--devnet", "--nolisten"]
        );
        assert_eq!(
            split_arguments(r#"--uacomment "two words" --x="" end"#).unwrap(),
            vec!["--uacomment", "two words", "--x=", "end"]
        );
        assert!(split_arguments(r#"--broken "open"#).is_err());
    }

    #[test]
    fn test_rpc_command_requires_method() {
        assert!(RpcCommand::try_from(json!({"params": {}})).is_err());
        assert!(RpcCommand::try_from(json!(["getInfo"])).is_err());

        let command = RpcCommand::try_from(json!({"method": "getInfo", "params": {}})).unwrap();
        assert_eq!(command.method(), "getInfo");
        assert_eq!(command.describe(), "command getInfo");
    }

    #[test]
    fn test_block_describe() {
        let block: Block = serde_json::from_value(json!({"hash": "00ab", "header": {}})).unwrap();
        assert_eq!(block.hash(), Some("00ab"));
        assert_eq!(block.describe(), "block 00ab");

        let block: Block = serde_json::from_value(json!({"header": {}})).unwrap();
        assert_eq!(block.describe(), "block");

        assert!(serde_json::from_value::<Block>(json!("not an object")).is_err());
    }

    #[tokio::test]
    async fn test_open_rejects_missing_and_directories() {
        let err = WorkloadReader::open("/definitely/not/here.jsonl", JsonLines::<Block>::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WorkloadError::Open { .. }));

        let dir = tempfile::tempdir().unwrap();
        let err = WorkloadReader::open(dir.path(), JsonLines::<Block>::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WorkloadError::Open { .. }));
    }

    #[tokio::test]
    async fn test_producer_preserves_order_and_skips_blank_lines() {
        let file = workload_file(
            "# rpc workload\n\
             {\"method\": \"getInfo\"}\n\
             \n\
             {\"method\": \"getPeers\"}\n\
             {\"method\": \"getTip\"}\n",
        );
        let reader = WorkloadReader::open(file.path(), JsonLines::<RpcCommand>::new())
            .await
            .unwrap();
        let mut rx = reader.spawn(&Spawner::new());

        let mut seen = Vec::new();
        while let Some(entry) = rx.recv().await {
            let entry = entry.unwrap();
            seen.push((entry.position, entry.line, entry.item.method().to_string()));
        }
        assert_eq!(
            seen,
            vec![
                (1, 2, "getInfo".to_string()),
                (2, 4, "getPeers".to_string()),
                (3, 5, "getTip".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_producer_stops_at_malformed_line() {
        let file = workload_file("{\"hash\": \"01\"}\n{not json\n{\"hash\": \"03\"}\n");
        let reader = WorkloadReader::open(file.path(), JsonLines::<Block>::new())
            .await
            .unwrap();
        let mut rx = reader.spawn(&Spawner::new());

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.item.hash(), Some("01"));

        match rx.recv().await.unwrap() {
            Err(WorkloadError::Decode { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected decode error, got {:?}", other),
        }

        // Closed after the terminal error; the third line is never produced
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_read_all_argument_lines() {
        let file = workload_file("--devnet\n# comment\n--testnet --nolisten\n");
        let sets = WorkloadReader::open(file.path(), ArgumentLines)
            .await
            .unwrap()
            .read_all(&Spawner::new())
            .await
            .unwrap();
        assert_eq!(sets, vec![vec!["--devnet"], vec!["--testnet", "--nolisten"]]);
    }

    /// Argument codec that panics on a line containing `--crash`
    struct CrashingArguments;

    impl LineCodec for CrashingArguments {
        type Item = ArgumentSet;

        fn decode(&self, line: &str) -> Result<ArgumentSet, String> {
            if line.contains("--crash") {
                panic!("decoder bug on {}", line);
            }
            ArgumentLines.decode(line)
        }
    }

    #[tokio::test]
    async fn test_decoder_panic_ends_with_aborted() {
        let file = workload_file("--devnet
--crash
--testnet
");
        let spawner = Spawner::new();
        let result = WorkloadReader::open(file.path(), CrashingArguments)
            .await
            .unwrap()
            .read_all(&spawner)
            .await;

        match result {
            Err(WorkloadError::Aborted { line, reason }) => {
                assert_eq!(line, 2);
                assert!(reason.contains("decoder bug"));
            }
            other => panic!("Expected aborted workload, got {:?}", other),
        }
        assert_eq!(spawner.stats().spawned, 1);
        assert_eq!(spawner.stats().panicked, 0);
    }
}
