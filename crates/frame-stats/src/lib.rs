//! Frame Stream Aggregation
//!
//! Maintains per-identifier statistics from the live CAN frame stream:
//! payload, inter-arrival period, occurrence count and a decaying
//! changed-flag, in first-seen display order.

mod engine;
mod record;

pub use engine::{AggregationEngine, EngineConfig};
pub use record::{FrameRecord, RowEvent, RowKind};
