//! USB Serial-CAN Bridge Supervisor
//!
//! The lifecycle-and-aggregation core: discovers the adapter, brings the
//! logical CAN interface up and down through the serial bridge, watches bus
//! health, recovers from faults, and folds the live frame stream into
//! per-identifier statistics. Consumers subscribe to [`CoreEvent`]s and
//! drive the core through a [`SupervisorHandle`]; no presentation concerns
//! live here.

mod controller;
mod events;
mod reader;
mod settings;
mod supervisor;

pub use controller::{ControllerError, ControllerTiming, InterfaceController, InterfaceState};
pub use events::{CoreEvent, FaultKind};
pub use reader::{spawn_reader, ReaderHandle, ReaderNotice};
pub use settings::SupervisorSettings;
pub use supervisor::{Supervisor, SupervisorHandle};

// Re-exported so a consumer can drive the handle without depending on the
// member crates directly.
pub use bus_health::HealthClass;
pub use frame_stats::{RowEvent, RowKind};
pub use slcan_bridge::{BitrateChoice, SlcanBridge, SocketCanIo};

use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter, defaulting to `info`
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
