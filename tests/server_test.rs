//! Integration tests for the CognitiveSense HTTP server

use cognitivesense::collector::EyeCollector;
use cognitivesense::config::Config;
use cognitivesense::core::Aggregator;
use cognitivesense::model::ModelServer;
use cognitivesense::server::run;
use cognitivesense::service::{ChannelSubscriber, LiveEngine, SubscriberId};
use futures_util::StreamExt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WINDOW: Duration = Duration::from_millis(50);

/// Logistic model over two columns; class 1 when `b` dominates.
fn write_model() -> NamedTempFile {
    let artifact = serde_json::json!({
        "kind": "tabular",
        "columns": ["a", "b"],
        "classifier": {
            "type": "logistic",
            "classes": [0, 1],
            "coef": [[-1.0, 1.0]],
            "intercept": [0.0]
        }
    });
    let mut file = NamedTempFile::new().expect("temp model");
    write!(file, "{artifact}").expect("write model");
    file
}

fn test_config() -> Config {
    Config {
        port: 0,
        window_duration: WINDOW,
        cycle_pause: WINDOW,
        ..Config::default()
    }
}

fn test_engine(model: &NamedTempFile) -> Arc<LiveEngine> {
    let aggregator = Aggregator::with_collectors(EyeCollector::degraded(), WINDOW);
    let server = ModelServer::load(model.path(), None, aggregator).expect("Failed to load model");
    Arc::new(LiveEngine::new(server, 60, WINDOW))
}

#[tokio::test]
async fn test_health_endpoint() {
    let model = write_model();
    let (addr, shutdown_tx) = run(&test_config(), test_engine(&model))
        .await
        .expect("Failed to start server");

    // Give server time to start
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert!(body["version"].as_str().is_some());
    assert_eq!(body["backend"], "tabular");
    assert_eq!(body["subscribers"], 0);
    assert!(body["stats"]["cycles_completed"].is_u64());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_predict_endpoint() {
    let model = write_model();
    let (addr, shutdown_tx) = run(&test_config(), test_engine(&model))
        .await
        .expect("Failed to start server");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/predict", addr))
        .json(&serde_json::json!({"b": 2.0}))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["pred"], 1);
    let proba = body["proba"].as_array().expect("proba array");
    assert_eq!(proba.len(), 2);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_predict_rejects_bad_features() {
    let model = write_model();
    let (addr, shutdown_tx) = run(&test_config(), test_engine(&model))
        .await
        .expect("Failed to start server");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/predict", addr))
        .json(&serde_json::json!({"a": "high"}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["code"], "INVALID_FEATURES");
    assert!(body["error"].as_str().unwrap_or_default().contains("a"));

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_predict_live_endpoint() {
    let model = write_model();
    let (addr, shutdown_tx) = run(&test_config(), test_engine(&model))
        .await
        .expect("Failed to start server");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/predict_live", addr))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    // Empty window: a = b = 0, logistic score 0, class 0 on the tie.
    assert_eq!(body["label_id"], 0);
    assert_eq!(body["label_name"], "Normal");
    assert!(body["confidence"].is_number());
    assert!(body["features"]["fatigue_score"].is_number());
    assert!(body.get("engine_state").is_none());
    assert!(!body["history"].as_array().expect("history array").is_empty());

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_live_loop_broadcasts_to_subscribers() {
    let model = write_model();
    let engine = test_engine(&model);
    let (_addr, shutdown_tx) = run(&test_config(), Arc::clone(&engine))
        .await
        .expect("Failed to start server");

    let (subscriber, mut rx) = ChannelSubscriber::channel(8);
    engine.hub().connect(SubscriberId::new(), Arc::new(subscriber));

    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no broadcast within timeout")
        .expect("subscriber channel closed");

    let payload: serde_json::Value = serde_json::from_str(&message).expect("payload JSON");
    assert_eq!(payload["engine_state"], "RUNNING");
    assert!(payload["label_id"].is_i64());
    assert!(payload["history"].as_array().expect("history array").len() <= 60);

    let _ = shutdown_tx.send(());
}

#[tokio::test]
async fn test_ws_live_streams_and_disconnects() {
    let model = write_model();
    let engine = test_engine(&model);
    let (addr, shutdown_tx) = run(&test_config(), Arc::clone(&engine))
        .await
        .expect("Failed to start server");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (mut socket, _) = connect_async(format!("ws://{}/ws/live", addr))
        .await
        .expect("Failed to open WebSocket");

    let text = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                other => panic!("stream ended before a payload: {other:?}"),
            }
        }
    })
    .await
    .expect("no payload within timeout");

    let payload: serde_json::Value = serde_json::from_str(&text).expect("payload JSON");
    assert_eq!(payload["engine_state"], "RUNNING");
    assert!(payload["features"].is_object());
    assert_eq!(engine.hub().len(), 1);

    socket.close(None).await.expect("Failed to close WebSocket");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.hub().len() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(engine.hub().len(), 0);

    let _ = shutdown_tx.send(());
}
