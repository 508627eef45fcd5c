//! Window aggregation and the feature map it produces.

pub mod aggregator;
pub mod features;

pub use aggregator::{fatigue_score, Aggregator, DEFAULT_WINDOW};
pub use features::{FeatureError, FeatureWindow, FATIGUE_SCORE, LABEL};
