//! HTTP and WebSocket surface of the live engine.
//!
//! ```text
//! dashboard ──→ GET  /ws/live       ←── one payload per window
//!           ──→ POST /predict       (explicit feature map)
//!           ──→ POST /predict_live  (one fresh window)
//!           ──→ GET  /health
//! ```

use crate::config::Config;
use crate::core::features::FeatureWindow;
use crate::service::engine::{LiveEngine, LiveSnapshot};
use crate::service::hub::{ChannelSubscriber, SubscriberId};
use crate::service::stats::StatsSnapshot;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

/// Shared server state
pub struct ServerState {
    engine: Arc<LiveEngine>,
    subscriber_buffer: usize,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub subscribers: usize,
    pub stats: StatsSnapshot,
}

/// One-shot prediction response
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub pred: i64,
    pub proba: Option<Vec<f64>>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let engine = &state.engine;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        backend: engine.server().bundle().backend().to_string(),
        subscribers: engine.hub().len(),
        stats: engine.stats().snapshot(),
    })
}

/// POST /predict
///
/// Classifies a caller-supplied feature map without sampling.
async fn predict(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<PredictResponse>, ApiError> {
    let features = FeatureWindow::from_json(&body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_FEATURES", e))?;

    let prediction = state.engine.predict(&features).map_err(|e| {
        warn!(error = %e, "One-shot prediction failed");
        api_error(StatusCode::BAD_REQUEST, "PREDICTION_FAILED", e)
    })?;

    Ok(Json(PredictResponse {
        pred: prediction.label_id,
        proba: prediction.probabilities,
    }))
}

/// POST /predict_live
///
/// Samples one fresh window and classifies it. Responds after the window
/// duration.
async fn predict_live(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<LiveSnapshot>, ApiError> {
    state.engine.predict_live_once().await.map(Json).map_err(|e| {
        error!(error = %e, "Live prediction failed");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "LIVE_PREDICTION_FAILED",
            e,
        )
    })
}

/// GET /ws/live
async fn ws_live(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Register the socket with the hub and forward broadcasts until either
/// side goes away.
async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let id = SubscriberId::new();
    let (subscriber, mut rx) = ChannelSubscriber::channel(state.subscriber_buffer);
    state.engine.hub().connect(id, Arc::new(subscriber));

    loop {
        tokio::select! {
            // Queued payloads from the live loop
            message = rx.recv() => {
                match message {
                    Some(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped this subscriber
                    None => break,
                }
            }

            // Client frames are ignored apart from close
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => debug!(subscriber = %id, "Ignoring client frame"),
                }
            }
        }
    }

    state.engine.hub().disconnect(id);
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the router over `engine`.
pub fn router(config: &Config, engine: Arc<LiveEngine>) -> Router {
    let state = Arc::new(ServerState {
        engine,
        subscriber_buffer: config.subscriber_buffer,
    });

    Router::new()
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/predict_live", post(predict_live))
        .route("/ws/live", get(ws_live))
        .layer(cors_layer(&config.allowed_origins))
        .with_state(state)
}

/// Run the HTTP server and the live loop.
///
/// Sending on (or dropping) the returned channel stops the server and
/// aborts the loop.
pub async fn run(
    config: &Config,
    engine: Arc<LiveEngine>,
) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("CognitiveSense server listening on http://{}", actual_addr);

    let live_loop = engine.spawn();
    let app = router(config, engine);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                info!("Server shutdown signal received");
                live_loop.abort();
            })
            .await
        {
            error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
