//! Producer + dispatcher integration tests
//!
//! These tests verify end-to-end workload replay:
//! - Items reach the transport in file order
//! - Dispatch stops at the first transport error
//! - Malformed files end the run with a positioned error
//! - The TCP peer channel and JSON RPC session work against local servers
//!
//! Run: cargo test -p stability-core --test pipeline

use serde_json::{json, Value};
use stability_core::test_utils::RecordingSink;
use stability_core::{
    dispatch, read_frame, Block, DispatchError, JsonLines, JsonRpcClient, LineCodec, PeerSink,
    RpcCommand, RpcSink, Spawner, TcpPeerSubmitter, TransportError, WorkloadError,
    WorkloadReader, MAX_FRAME_SIZE,
};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn workload_file(lines: &[String]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

fn block_lines(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| json!({"hash": format!("{:02}", i), "header": {"height": i}}).to_string())
        .collect()
}

async fn open_blocks(file: &tempfile::NamedTempFile) -> WorkloadReader<JsonLines<Block>> {
    WorkloadReader::open(file.path(), JsonLines::<Block>::new())
        .await
        .unwrap()
}

/// Five blocks, the third submission fails: items 4 and 5 are never sent
#[tokio::test]
async fn test_dispatch_halts_on_third_item() {
    let file = workload_file(&block_lines(5));
    let spawner = Spawner::new();
    let items = open_blocks(&file).await.spawn(&spawner);
    let mut sink = RecordingSink::new().fail_on(3);

    let err = dispatch(items, &mut sink).await.unwrap_err();

    match err {
        DispatchError::Transport {
            position,
            descriptor,
            ..
        } => {
            assert_eq!(position, 3);
            assert_eq!(descriptor, "block 03");
        }
        other => panic!("Expected transport error, got {:?}", other),
    }
    assert_eq!(sink.attempts(), 3);
    assert_eq!(sink.hashes(), vec!["01", "02"]);
    assert_eq!(spawner.stats().panicked, 0);
}

/// Every item is dispatched, in file order
#[tokio::test]
async fn test_dispatch_preserves_file_order() {
    let file = workload_file(&block_lines(25));
    let items = open_blocks(&file).await.spawn(&Spawner::new());
    let mut sink = RecordingSink::new();

    let summary = dispatch(items, &mut sink).await.unwrap();

    assert_eq!(summary.submitted, 25);
    let expected: Vec<String> = (1..=25).map(|i| format!("{:02}", i)).collect();
    assert_eq!(sink.hashes(), expected);
}

/// A malformed line ends dispatch after the items before it
#[tokio::test]
async fn test_malformed_workload_is_terminal() {
    let mut lines = block_lines(2);
    lines.push("{\"hash\": \"03\"".to_string());
    lines.extend(block_lines(1));
    let file = workload_file(&lines);
    let items = open_blocks(&file).await.spawn(&Spawner::new());
    let mut sink = RecordingSink::new();

    let err = dispatch(items, &mut sink).await.unwrap_err();

    assert!(matches!(err, DispatchError::Workload(WorkloadError::Decode { line: 3, .. })));
    assert_eq!(sink.hashes(), vec!["01", "02"]);
}

/// Block codec that panics while decoding the block with hash "03"
struct FaultyBlockCodec;

impl LineCodec for FaultyBlockCodec {
    type Item = Block;

    fn decode(&self, line: &str) -> Result<Block, String> {
        let block: Block = serde_json::from_str(line).map_err(|e| e.to_string())?;
        if block.hash() == Some("03") {
            panic!("cannot decode block 03");
        }
        Ok(block)
    }
}

/// A decoder panic mid-file is a terminal error, not a short success
#[tokio::test]
async fn test_decoder_panic_is_not_a_clean_finish() {
    let file = workload_file(&block_lines(5));
    let spawner = Spawner::new();
    let items = WorkloadReader::open(file.path(), FaultyBlockCodec)
        .await
        .unwrap()
        .spawn(&spawner);
    let mut sink = RecordingSink::new();

    let err = dispatch(items, &mut sink).await.unwrap_err();

    match err {
        DispatchError::Workload(WorkloadError::Aborted { line, reason }) => {
            assert_eq!(line, 3);
            assert!(reason.contains("block 03"));
        }
        other => panic!("Expected aborted workload, got {:?}", other),
    }
    assert_eq!(sink.hashes(), vec!["01", "02"]);
}

/// Blocks travel over the TCP peer channel in order
#[tokio::test]
async fn test_blocks_reach_tcp_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        while let Some(block) = read_frame::<_, Block>(&mut socket, MAX_FRAME_SIZE).await.unwrap() {
            received.push(block);
        }
        received
    });

    let file = workload_file(&block_lines(4));
    let items = open_blocks(&file).await.spawn(&Spawner::new());

    let submitter = TcpPeerSubmitter::new();
    submitter.connect(&peer).await.unwrap();
    let mut sink = PeerSink::new(submitter, peer.clone());
    let summary = dispatch(items, &mut sink).await.unwrap();
    assert_eq!(summary.submitted, 4);
    drop(sink);

    let received = server.await.unwrap();
    let hashes: Vec<&str> = received.iter().filter_map(|b| b.hash()).collect();
    assert_eq!(hashes, vec!["01", "02", "03", "04"]);
    assert_eq!(received[2].fields()["header"]["height"], 3);
}

/// Commands replay against a JSON RPC server until it reports an error
#[tokio::test]
async fn test_rpc_replay_stops_on_error_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let mut methods = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            let request: Value = serde_json::from_str(&line).unwrap();
            let method = request["method"].as_str().unwrap().to_string();
            let response = if method == "submitBlock" {
                json!({"error": {"message": "block rejected"}})
            } else {
                json!({"result": {}, "error": null})
            };
            methods.push(method);
            write_half
                .write_all(format!("{}\n", response).as_bytes())
                .await
                .unwrap();
        }
        methods
    });

    let lines: Vec<String> = ["getInfo", "getPeers", "submitBlock", "getTip"]
        .iter()
        .map(|m| json!({"method": m, "params": {}}).to_string())
        .collect();
    let file = workload_file(&lines);
    let items = WorkloadReader::open(file.path(), JsonLines::<RpcCommand>::new())
        .await
        .unwrap()
        .spawn(&Spawner::new());

    let client = JsonRpcClient::connect(&address).await.unwrap();
    let mut sink = RpcSink::new(client);
    let err = dispatch(items, &mut sink).await.unwrap_err();

    match err {
        DispatchError::Transport {
            position,
            descriptor,
            source: TransportError::Rpc(message),
        } => {
            assert_eq!(position, 3);
            assert_eq!(descriptor, "command submitBlock");
            assert!(message.contains("block rejected"));
        }
        other => panic!("Expected RPC error, got {:?}", other),
    }

    sink.into_session().disconnect().await;
    assert_eq!(server.await.unwrap(), vec!["getInfo", "getPeers", "submitBlock"]);
}

/// Opening a missing workload is reported before any task starts
#[tokio::test]
async fn test_missing_workload_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = WorkloadReader::open(dir.path().join("absent.jsonl"), JsonLines::<Block>::new()).await;
    assert!(matches!(result, Err(WorkloadError::Open { .. })));
}
