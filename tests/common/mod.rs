//! Shared fixtures: a scripted stand-in for the analysis engine and an
//! in-memory LSP client.

use std::path::PathBuf;
use std::time::Duration;

use cryptodetect_lsp::codec::{FrameReader, FrameWriter};
use cryptodetect_lsp::{AnalyzerConfig, EngineAnalyzer, ServerConfig, serve};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

/// Reports `rsa` for every "RSA" and `generic` for every "hash", one hit per
/// line, in the engine's report format.
pub const KEYWORD_ENGINE: &str = r#"
awk 'BEGIN { printf "{\"crypto_evidence\": {\"scan\": {\"hits\": [" }
{
    i = index($0, "RSA")
    if (i > 0) {
        if (n++) printf ","
        printf "{\"evidence_type\": \"rsa\", \"line_number\": %d, \"line_index_begin\": %d, \"line_index_end\": %d}", NR, i - 1, i + 2
    }
    j = index($0, "hash")
    if (j > 0) {
        if (n++) printf ","
        printf "{\"evidence_type\": \"generic\", \"line_number\": %d, \"line_index_begin\": %d, \"line_index_end\": %d}", NR, j - 1, j + 3
    }
}
END { printf "]}}}" }' "$1" > "$1.crypto"
"#;

pub struct FakeEngine {
    pub dir: TempDir,
    pub config: ServerConfig,
}

impl FakeEngine {
    /// Engine that runs `script` under `sh`. The script receives the snapshot
    /// path as `$1` and the output directory as `$5`.
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("scan.sh");
        std::fs::write(&script_path, script).unwrap();
        let output_dir = dir.path().join("out");
        std::fs::create_dir(&output_dir).unwrap();

        let config = ServerConfig {
            analyzer: AnalyzerConfig {
                program: "sh".into(),
                script: script_path,
                config: PathBuf::from("cryptodetector.conf"),
                extra_args: Vec::new(),
                working_dir: Some(dir.path().to_path_buf()),
                output_dir: Some(output_dir),
                timeout_secs: 10,
            },
            ..ServerConfig::default()
        };
        Self { dir, config }
    }

    /// Files left in the output directory.
    pub fn leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path().join("out"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

pub struct TestClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    next_id: u64,
}

impl TestClient {
    pub async fn request(&mut self, method: &str, params: Value) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        let frame = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.writer.write_frame(&frame).await.unwrap();
        id
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        let frame = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.writer.write_frame(&frame).await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(15), self.reader.read_frame())
            .await
            .expect("timed out waiting for server")
            .unwrap()
            .expect("server closed output")
    }

    pub async fn initialize(&mut self) {
        let id = self.request("initialize", json!({"capabilities": {}})).await;
        assert_eq!(self.recv().await["id"], id);
        self.notify("initialized", json!({})).await;
    }

    pub async fn open(&mut self, uri: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "c", "version": version, "text": text}}),
        )
        .await;
    }

    pub async fn replace(&mut self, uri: &str, version: i32, text: &str) {
        self.notify(
            "textDocument/didChange",
            json!({"textDocument": {"uri": uri, "version": version}, "contentChanges": [{"text": text}]}),
        )
        .await;
    }

    pub async fn close(&mut self, uri: &str) {
        self.notify("textDocument/didClose", json!({"textDocument": {"uri": uri}}))
            .await;
    }

    /// Next `publishDiagnostics` params, skipping anything else.
    pub async fn diagnostics(&mut self) -> Value {
        loop {
            let frame = self.recv().await;
            if frame["method"] == "textDocument/publishDiagnostics" {
                return frame["params"].clone();
            }
        }
    }
}

/// Start a server running the real engine invoker with `config`.
pub fn start(config: ServerConfig) -> (TestClient, JoinHandle<anyhow::Result<()>>) {
    let (client, server) = tokio::io::duplex(1 << 16);
    let (server_read, server_write) = tokio::io::split(server);
    let handle = tokio::spawn(serve(server_read, server_write, config, |config| {
        EngineAnalyzer::new(config.analyzer.clone())
    }));
    let (client_read, client_write) = tokio::io::split(client);
    let client = TestClient {
        reader: FrameReader::new(client_read),
        writer: FrameWriter::new(client_write),
        next_id: 0,
    };
    (client, handle)
}
