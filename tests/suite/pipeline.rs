//! Editor to engine to editor, with a scripted engine process.

use std::time::Duration;

use serde_json::{Value, json};

use crate::common::{FakeEngine, KEYWORD_ENGINE, start};

const URI: &str = "file:///work/src/crypto.c";

#[tokio::test]
async fn open_reports_engine_findings() {
    let engine = FakeEngine::new(KEYWORD_ENGINE);
    let (mut client, _server) = start(engine.config.clone());
    client.initialize().await;

    client
        .open(URI, 1, "#include <openssl/rsa.h>\n\n  RSA *key = RSA_new();\nint hash;\n")
        .await;
    let params = client.diagnostics().await;
    assert_eq!(params["uri"], URI);
    assert_eq!(params["version"], 1);

    let diagnostics = params["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 2);
    assert_eq!(diagnostics[0]["severity"], 1);
    assert_eq!(
        diagnostics[0]["range"],
        json!({"start": {"line": 2, "character": 2}, "end": {"line": 2, "character": 5}})
    );
    assert!(
        diagnostics[0]["message"]
            .as_str()
            .unwrap()
            .ends_with("evidence type: rsa")
    );
    assert_eq!(diagnostics[1]["severity"], 2);
    assert_eq!(diagnostics[1]["range"]["start"], json!({"line": 3, "character": 4}));

    assert!(engine.leftovers().is_empty(), "{:?}", engine.leftovers());
}

#[tokio::test]
async fn edit_that_removes_finding_clears_diagnostics() {
    let engine = FakeEngine::new(KEYWORD_ENGINE);
    let (mut client, _server) = start(engine.config.clone());
    client.initialize().await;

    client.open(URI, 1, "RSA_new();\n").await;
    assert_eq!(client.diagnostics().await["diagnostics"].as_array().unwrap().len(), 1);

    client.replace(URI, 2, "aes_init();\n").await;
    let params = client.diagnostics().await;
    assert_eq!(params["version"], 2);
    assert_eq!(params["diagnostics"], json!([]));
}

#[tokio::test]
async fn failing_engine_publishes_nothing_until_close() {
    let engine = FakeEngine::new("echo 'Traceback: boom' >&2\nexit 1\n");
    let (mut client, _server) = start(engine.config.clone());
    client.initialize().await;

    client.open(URI, 1, "RSA_new();\n").await;
    client.close(URI).await;

    let params = client.diagnostics().await;
    assert_eq!(params["uri"], URI);
    assert_eq!(params["diagnostics"], json!([]));
    assert!(params.get("version").is_none());
}

#[tokio::test]
async fn superseded_pass_never_publishes() {
    let script = format!("sleep 1\n{KEYWORD_ENGINE}");
    let engine = FakeEngine::new(&script);
    let (mut client, _server) = start(engine.config.clone());
    client.initialize().await;

    client.open(URI, 1, "RSA_new();\n").await;
    client.replace(URI, 2, "int x;\n").await;

    let params = client.diagnostics().await;
    assert_eq!(params["version"], 2);
    assert_eq!(params["diagnostics"], json!([]));

    // Nothing else is queued: the next frame is the shutdown reply.
    let id = client.request("shutdown", Value::Null).await;
    assert_eq!(client.recv().await["id"], id);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(engine.leftovers().is_empty(), "{:?}", engine.leftovers());
}

#[tokio::test]
async fn shutdown_and_exit() {
    let engine = FakeEngine::new(KEYWORD_ENGINE);
    let (mut client, server) = start(engine.config.clone());
    client.initialize().await;

    let id = client.request("shutdown", Value::Null).await;
    let response = client.recv().await;
    assert_eq!(response["id"], id);
    assert!(response["result"].is_null());

    client.notify("exit", Value::Null).await;
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
