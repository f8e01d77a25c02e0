//! Aggregation Engine Implementation

use crate::record::{FrameRecord, RowEvent, RowKind};
use serde::{Deserialize, Serialize};
use slcan_bridge::Frame;
use std::collections::HashMap;
use tracing::debug;

/// Configuration for the aggregation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Case-insensitive substring over the hex identifier; rows for
    /// non-matching identifiers are not emitted
    pub filter: Option<String>,
    /// How long a raised changed-flag survives before the decay sweep
    /// clears it, milliseconds
    pub changed_decay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            filter: None,
            changed_decay_ms: 500,
        }
    }
}

/// Folds the live frame stream into per-identifier statistics.
///
/// Single-writer by construction: exactly one task owns the engine and
/// feeds it from the reader channel, so the map needs no locking. Row
/// iteration order is first-seen insertion order, stable across updates.
pub struct AggregationEngine {
    records: HashMap<u32, FrameRecord>,
    order: Vec<u32>,
    filter: Option<String>,
    changed_decay_ms: u64,
}

impl AggregationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut engine = Self {
            records: HashMap::new(),
            order: Vec::new(),
            filter: None,
            changed_decay_ms: config.changed_decay_ms,
        };
        engine.set_filter(config.filter);
        engine
    }

    /// Replace the identifier filter.
    ///
    /// Filtered identifiers keep updating internally so that clearing the
    /// filter later does not lose history; only row emission is suppressed.
    pub fn set_filter(&mut self, filter: Option<String>) {
        self.filter = filter
            .map(|f| f.trim().to_ascii_uppercase())
            .filter(|f| !f.is_empty());
        debug!("identifier filter set to {:?}", self.filter);
    }

    fn passes_filter(&self, id_hex: &str) -> bool {
        match &self.filter {
            Some(f) => id_hex.contains(f.as_str()),
            None => true,
        }
    }

    /// Fold one frame into the map and report the row change, unless the
    /// identifier is filtered from display.
    pub fn ingest(&mut self, frame: &Frame) -> Option<RowEvent> {
        let emit = self.passes_filter(&frame.id_hex());

        let event = match self.records.get_mut(&frame.id) {
            None => {
                let record = FrameRecord {
                    id: frame.id,
                    extended: frame.extended,
                    last_data: frame.data.clone(),
                    last_timestamp_ms: frame.timestamp_ms,
                    period_ms: None,
                    count: 1,
                    changed: false,
                    changed_at_ms: 0,
                };
                self.order.push(frame.id);
                let event = RowEvent::from_record(RowKind::Insert, &record);
                self.records.insert(frame.id, record);
                event
            }
            Some(record) => {
                let changed = frame.data != record.last_data;
                record.period_ms =
                    Some(frame.timestamp_ms.saturating_sub(record.last_timestamp_ms));
                record.changed = changed;
                if changed {
                    record.changed_at_ms = frame.timestamp_ms;
                }
                record.count += 1;
                record.last_data = frame.data.clone();
                record.last_timestamp_ms = frame.timestamp_ms;
                RowEvent::from_record(RowKind::Update, record)
            }
        };

        emit.then_some(event)
    }

    /// Clear changed-flags older than the decay interval, reporting an
    /// update row for each so consumers can drop their highlight.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<RowEvent> {
        let mut events = Vec::new();
        for id in &self.order {
            if let Some(record) = self.records.get_mut(id) {
                if record.changed && now_ms >= record.changed_at_ms + self.changed_decay_ms {
                    record.changed = false;
                    if self
                        .filter
                        .as_ref()
                        .map_or(true, |f| record.id_hex().contains(f.as_str()))
                    {
                        events.push(RowEvent::from_record(RowKind::Update, record));
                    }
                }
            }
        }
        events
    }

    /// Drop every record; the next sighting of any identifier is first-seen
    pub fn reset(&mut self) {
        debug!("clearing {} aggregated identifiers", self.records.len());
        self.records.clear();
        self.order.clear();
    }

    /// Records in first-seen order
    pub fn rows(&self) -> impl Iterator<Item = &FrameRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
