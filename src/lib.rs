//! CognitiveSense - real-time behavioral signal aggregation and
//! cognitive-state inference.
//!
//! Keyboard timing, pointer motion and an eye-openness proxy are sampled
//! into fixed windows, merged into one feature map with a heuristic fatigue
//! score, classified by a tabular or recurrent model, and streamed to live
//! subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         CognitiveSense                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐                                                    │
//! │  │ Keyboard │──┐                                                 │
//! │  └──────────┘  │   ┌────────────┐   ┌─────────────┐              │
//! │  ┌──────────┐  ├──▶│ Aggregator │──▶│ ModelServer │              │
//! │  │  Mouse   │──┤   │ (3s window)│   │ tab. / seq. │              │
//! │  └──────────┘  │   └────────────┘   └─────────────┘              │
//! │  ┌──────────┐  │                           │                     │
//! │  │   Eye    │──┘                           ▼                     │
//! │  └──────────┘                    ┌───────────────────┐           │
//! │                                  │    LiveEngine     │──▶ /ws/live
//! │                                  │  history + hub    │           │
//! │                                  └───────────────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use cognitivesense::{Aggregator, EyeCollector, ModelServer};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let aggregator = Aggregator::with_collectors(EyeCollector::degraded(), Duration::from_secs(3));
//! let server = ModelServer::load(Path::new("models/rf_baseline.json"), None, aggregator)
//!     .expect("model artifact");
//!
//! server.aggregator().start();
//! let result = server.predict_live().expect("live window");
//! println!("label {}", result.prediction.label_id);
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod model;
pub mod server;
pub mod service;

// Re-export key types at crate root for convenience
pub use collector::{
    CollectorError, EarStreamProvider, EyeCollector, KeyboardCollector, LandmarkProvider,
    MouseCollector, RawEvent, SignalCollector,
};
pub use config::{Config, ConfigError};
pub use core::{fatigue_score, Aggregator, FeatureError, FeatureWindow};
pub use model::{LiveResult, ModelBundle, ModelError, ModelServer, Prediction};
pub use service::{label_name, ConnectionHub, LiveEngine, LiveSnapshot, LABELS};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
