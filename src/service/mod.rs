//! Connection and history service: subscribers, rolling history, and the
//! perpetual sample, infer, broadcast loop.

pub mod engine;
pub mod history;
pub mod hub;
pub mod stats;

pub use engine::{label_name, LiveEngine, LivePayload, LiveSnapshot, ENGINE_RUNNING, LABELS};
pub use history::{PredictionHistory, PredictionRecord};
pub use hub::{ChannelSubscriber, ConnectionHub, DeliveryError, Subscriber, SubscriberId};
pub use stats::{EngineStats, StatsSnapshot};
