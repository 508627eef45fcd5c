//! The live engine: sample, classify, record, broadcast, repeat.

use crate::collector::lock_state;
use crate::core::features::{FeatureWindow, FATIGUE_SCORE};
use crate::model::{LiveResult, ModelError, ModelServer, Prediction};
use crate::service::history::{PredictionHistory, PredictionRecord};
use crate::service::hub::ConnectionHub;
use crate::service::stats::EngineStats;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// State reported to subscribers while the loop is healthy.
pub const ENGINE_RUNNING: &str = "RUNNING";

/// Fixed label map.
pub const LABELS: [(i64, &str); 3] = [(0, "Normal"), (1, "Stressed"), (2, "Fatigued")];

/// Display name of a label id, `"Unknown"` outside the map.
pub fn label_name(label_id: i64) -> &'static str {
    LABELS
        .iter()
        .find(|(id, _)| *id == label_id)
        .map_or("Unknown", |(_, name)| *name)
}

/// One classified window together with the history after it was recorded.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSnapshot {
    pub label_id: i64,
    pub label_name: &'static str,
    pub confidence: Option<f64>,
    pub features: FeatureWindow,
    pub proba: Option<Vec<f64>>,
    pub history: Vec<PredictionRecord>,
}

/// Message pushed to streaming subscribers.
#[derive(Debug, Serialize)]
pub struct LivePayload<'a> {
    pub engine_state: &'static str,
    #[serde(flatten)]
    pub snapshot: &'a LiveSnapshot,
}

/// Owns the subscriber set and prediction history, and drives the model
/// server in a perpetual loop.
pub struct LiveEngine {
    server: Arc<ModelServer>,
    hub: ConnectionHub,
    history: Mutex<PredictionHistory>,
    stats: EngineStats,
    cycle_pause: Duration,
}

impl LiveEngine {
    pub fn new(server: ModelServer, history_capacity: usize, cycle_pause: Duration) -> Self {
        Self {
            server: Arc::new(server),
            hub: ConnectionHub::new(),
            history: Mutex::new(PredictionHistory::new(history_capacity)),
            stats: EngineStats::new(),
            cycle_pause,
        }
    }

    pub fn server(&self) -> &ModelServer {
        &self.server
    }

    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn history(&self) -> Vec<PredictionRecord> {
        lock_state(&self.history).snapshot()
    }

    /// One-shot classification of a caller-supplied feature map. Does not
    /// touch the history.
    pub fn predict(&self, features: &FeatureWindow) -> Result<Prediction, ModelError> {
        let prediction = self.server.predict(features)?;
        self.stats.record_one_shot();
        Ok(prediction)
    }

    /// One aggregation and inference cycle for a non-streaming caller. The
    /// result is recorded in the history like a loop cycle.
    pub async fn predict_live_once(&self) -> Result<LiveSnapshot, ModelError> {
        let snapshot = self.run_cycle().await?;
        self.stats.record_one_shot();
        Ok(snapshot)
    }

    /// Sample one window on the blocking pool, classify it, and append it
    /// to the history.
    pub async fn run_cycle(&self) -> Result<LiveSnapshot, ModelError> {
        let server = Arc::clone(&self.server);
        let result = tokio::task::spawn_blocking(move || server.predict_live())
            .await
            .map_err(|err| ModelError::Inference(format!("live window task failed: {err}")))??;
        Ok(self.record(result))
    }

    fn record(&self, result: LiveResult) -> LiveSnapshot {
        let LiveResult {
            features,
            prediction,
        } = result;
        let history = {
            let mut history = lock_state(&self.history);
            history.push(PredictionRecord::now(prediction.label_id));
            history.snapshot()
        };

        LiveSnapshot {
            label_id: prediction.label_id,
            label_name: label_name(prediction.label_id),
            confidence: prediction.confidence(),
            features,
            proba: prediction.probabilities,
            history,
        }
    }

    /// Run one loop iteration: cycle, then broadcast. Failures are logged
    /// and counted, never propagated.
    pub async fn tick(&self) {
        let snapshot = match self.run_cycle().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(error = %err, "Live cycle failed");
                self.stats.record_failure(err.to_string());
                return;
            }
        };

        let payload = LivePayload {
            engine_state: ENGINE_RUNNING,
            snapshot: &snapshot,
        };
        let message = match serde_json::to_string(&payload) {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "Failed to encode live payload");
                self.stats.record_failure(err.to_string());
                return;
            }
        };

        let dropped = self.hub.broadcast(&message);
        self.stats.record_cycle();
        self.stats.record_broadcast(dropped);
        debug!(
            label = snapshot.label_name,
            fatigue_score = snapshot.features.get_or_zero(FATIGUE_SCORE),
            subscribers = self.hub.len(),
            "Cycle broadcast"
        );
    }

    /// Repeat [`tick`](Self::tick) forever, pausing between cycles.
    pub async fn run(self: Arc<Self>) {
        info!(
            window = ?self.server.aggregator().window(),
            pause = ?self.cycle_pause,
            "Live loop started"
        );
        loop {
            self.tick().await;
            tokio::time::sleep(self.cycle_pause).await;
        }
    }

    /// Start the loop on the runtime. Abort the handle to stop it.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::keyboard::KEY_COUNT;
    use crate::collector::{EyeCollector, RawEvent};
    use crate::core::aggregator::Aggregator;
    use crate::model::sequential::{DenseLayer, LstmLayer};
    use crate::model::{Classifier, ModelBundle, SequentialModel, TabularModel};
    use crate::service::hub::{ChannelSubscriber, SubscriberId};
    use serde_json::Value;

    const WINDOW: Duration = Duration::from_millis(10);

    fn aggregator() -> Aggregator {
        Aggregator::with_collectors(EyeCollector::degraded(), WINDOW)
    }

    /// Classifies on typing activity: any key press means "Stressed".
    fn typing_model() -> ModelBundle {
        ModelBundle::Tabular(
            TabularModel::new(
                vec![KEY_COUNT.to_string()],
                None,
                Classifier::Logistic {
                    classes: vec![0, 1],
                    coef: vec![vec![10.0]],
                    intercept: vec![-5.0],
                },
            )
            .unwrap(),
        )
    }

    /// Overflows to an infinite logit on every window.
    fn overflowing_model() -> ModelBundle {
        let lstm = LstmLayer {
            w_ih: vec![vec![0.0]; 4],
            w_hh: vec![vec![0.0]; 4],
            b_ih: vec![0.0; 4],
            b_hh: vec![0.0; 4],
        };
        let head = vec![
            DenseLayer {
                weight: vec![vec![0.0]],
                bias: vec![f64::MAX],
            },
            DenseLayer {
                weight: vec![vec![2.0], vec![0.0]],
                bias: vec![0.0, 0.0],
            },
        ];
        ModelBundle::Sequential(
            SequentialModel::new(vec![KEY_COUNT.to_string()], 1, 2, vec![lstm], head).unwrap(),
        )
    }

    fn engine(bundle: ModelBundle, capacity: usize) -> Arc<LiveEngine> {
        Arc::new(LiveEngine::new(
            ModelServer::new(bundle, aggregator()),
            capacity,
            Duration::from_millis(5),
        ))
    }

    #[test]
    fn test_label_name() {
        assert_eq!(label_name(0), "Normal");
        assert_eq!(label_name(1), "Stressed");
        assert_eq!(label_name(2), "Fatigued");
        assert_eq!(label_name(7), "Unknown");
        assert_eq!(label_name(-1), "Unknown");
    }

    #[tokio::test]
    async fn test_tick_broadcasts_payload() {
        let engine = engine(typing_model(), 60);
        let (subscriber, mut receiver) = ChannelSubscriber::channel(4);
        engine.hub().connect(SubscriberId::new(), Arc::new(subscriber));
        engine
            .server()
            .aggregator()
            .keyboard()
            .record(&RawEvent::key_down(4));

        engine.tick().await;

        let message = receiver.try_recv().unwrap();
        let payload: Value = serde_json::from_str(&message).unwrap();
        assert_eq!(payload["engine_state"], "RUNNING");
        assert_eq!(payload["label_id"], 1);
        assert_eq!(payload["label_name"], "Stressed");
        assert!(payload["confidence"].as_f64().unwrap() > 0.9);
        assert_eq!(payload["features"][KEY_COUNT], 1.0);
        assert!(payload["features"]["fatigue_score"].is_number());
        assert_eq!(payload["proba"].as_array().unwrap().len(), 2);
        assert_eq!(payload["history"].as_array().unwrap().len(), 1);
        assert_eq!(payload["history"][0]["label"], 1);
        assert_eq!(engine.stats().snapshot().cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded_across_cycles() {
        let engine = engine(typing_model(), 2);
        for _ in 0..3 {
            engine.tick().await;
        }
        let history = engine.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].time <= history[1].time);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_recorded_not_broadcast() {
        let engine = engine(overflowing_model(), 60);
        let (subscriber, mut receiver) = ChannelSubscriber::channel(4);
        engine.hub().connect(SubscriberId::new(), Arc::new(subscriber));

        engine.tick().await;

        assert!(receiver.try_recv().is_err());
        let stats = engine.stats().snapshot();
        assert_eq!(stats.cycle_failures, 1);
        assert!(stats.last_error.is_some());
        assert!(engine.history().is_empty());
        assert_eq!(engine.hub().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_survives_failures() {
        let engine = engine(overflowing_model(), 60);
        let handle = engine.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!handle.is_finished());
        handle.abort();

        assert!(engine.stats().snapshot().cycle_failures >= 2);
    }

    #[tokio::test]
    async fn test_predict_live_once_appends_history() {
        let engine = engine(typing_model(), 60);
        let snapshot = engine.predict_live_once().await.unwrap();
        assert_eq!(snapshot.label_id, 0);
        assert_eq!(snapshot.label_name, "Normal");
        assert_eq!(snapshot.history.len(), 1);
        assert_eq!(engine.stats().snapshot().one_shot_predictions, 1);
    }

    #[test]
    fn test_predict_does_not_touch_history() {
        let engine = engine(typing_model(), 60);
        let prediction = engine
            .predict(&FeatureWindow::new().with(KEY_COUNT, 3.0))
            .unwrap();
        assert_eq!(prediction.label_id, 1);
        assert!(engine.history().is_empty());
    }
}
