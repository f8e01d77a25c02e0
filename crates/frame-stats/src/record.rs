//! Per-Identifier Record and Row Events

use serde::{Deserialize, Serialize};

/// Statistics tracked for one arbitration identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    /// Arbitration identifier
    pub id: u32,
    /// Whether the identifier is 29-bit extended
    pub extended: bool,
    /// Most recent payload
    pub last_data: Vec<u8>,
    /// Receive timestamp of the most recent frame, epoch milliseconds
    pub last_timestamp_ms: u64,
    /// Last measured inter-arrival period; `None` until a second frame
    /// has been seen
    pub period_ms: Option<u64>,
    /// Total occurrences
    pub count: u64,
    /// Payload differed on the most recent sighting
    pub changed: bool,
    /// When `changed` was last raised, epoch milliseconds
    pub changed_at_ms: u64,
}

impl FrameRecord {
    pub fn id_hex(&self) -> String {
        format!("{:X}", self.id)
    }

    pub fn data_hex(&self) -> String {
        self.last_data.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// Whether a row event introduces a new identifier or updates a known one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowKind {
    Insert,
    Update,
}

/// Consumer-facing row upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowEvent {
    pub kind: RowKind,
    /// Uppercase hex identifier, no leading zeros
    pub id_hex: String,
    /// Uppercase hex payload
    pub data_hex: String,
    /// Inter-arrival period, `None` while unknown
    pub period_ms: Option<u64>,
    pub count: u64,
    pub changed: bool,
}

impl RowEvent {
    pub(crate) fn from_record(kind: RowKind, record: &FrameRecord) -> Self {
        Self {
            kind,
            id_hex: record.id_hex(),
            data_hex: record.data_hex(),
            period_ms: record.period_ms,
            count: record.count,
            changed: record.changed,
        }
    }
}
