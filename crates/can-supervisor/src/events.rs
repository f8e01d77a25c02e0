//! Consumer-Facing Event Types

use crate::controller::InterfaceState;
use bus_health::HealthClass;
use frame_stats::RowEvent;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fault categories surfaced alongside their detail text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// No adapter hardware present
    AdapterAbsent,
    /// Bridge process failed to launch or exited immediately
    BridgeStartFailure,
    /// Interface never reported up with carrier inside the settle window
    ActivationTimeout,
    /// Backend receive error terminated the frame reader
    ReadFault,
    /// Any other failed bridge or link operation
    Bridge,
}

/// Everything the core tells its consumer.
///
/// The consumer renders these on its own timeline; the core never blocks on
/// it (broadcast semantics, slow subscribers lag rather than stall the
/// pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreEvent {
    /// Adapter presence edge
    PresenceChanged {
        present: bool,
        path: Option<PathBuf>,
    },
    /// Lifecycle state machine moved
    LifecycleChanged(InterfaceState),
    /// A statistics row was inserted, updated or had its highlight decay
    FrameRow(RowEvent),
    /// Level-triggered bus health, one per poll
    HealthChanged(HealthClass),
    /// A fault occurred; detail is render-ready
    Fault { kind: FaultKind, detail: String },
}
