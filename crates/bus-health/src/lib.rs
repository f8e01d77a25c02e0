//! Bus Health Monitoring
//!
//! Classifies interface statistics into coarse bus health on a fixed poll
//! interval. Emission is level-triggered: every poll reports, because "still
//! normal" and "still bus-off" both matter to a display.

use serde::{Deserialize, Serialize};
use slcan_bridge::{BridgeOps, CanBusState, LinkStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Coarse bus health classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthClass {
    /// Bus participating normally (error-active or error-warning)
    #[default]
    Normal,
    /// Controller degraded after repeated errors
    ErrorPassive,
    /// Controller off the bus until reset
    BusOff,
}

impl HealthClass {
    /// Whether the lifecycle controller should hear about this
    pub fn is_degraded(&self) -> bool {
        !matches!(self, HealthClass::Normal)
    }
}

/// Map a link status snapshot onto the health classes this system acts on
pub fn classify(status: &LinkStatus) -> HealthClass {
    match status.can_state {
        CanBusState::BusOff => HealthClass::BusOff,
        CanBusState::ErrorPassive => HealthClass::ErrorPassive,
        _ => HealthClass::Normal,
    }
}

/// One poll's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub class: HealthClass,
    pub status: LinkStatus,
}

/// Periodic health poller.
///
/// Gated by a `watch`ed enable flag the supervisor flips while the interface
/// is up or in an error state; polls never overlap because the loop awaits
/// each status query before the next tick.
pub struct HealthMonitor<B: BridgeOps> {
    bridge: Arc<B>,
    ifname: String,
    poll_interval: Duration,
}

impl<B: BridgeOps + 'static> HealthMonitor<B> {
    pub fn new(bridge: Arc<B>, ifname: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            bridge,
            ifname: ifname.into(),
            poll_interval,
        }
    }

    /// Run the poll loop until the report receiver goes away
    pub async fn run(self, mut enabled: watch::Receiver<bool>, tx: mpsc::Sender<HealthReport>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "monitoring {} health every {}ms",
            self.ifname,
            self.poll_interval.as_millis()
        );
        loop {
            interval.tick().await;
            if !*enabled.borrow() {
                // Park until the supervisor re-enables polling
                if enabled.changed().await.is_err() {
                    return;
                }
                interval.reset();
                continue;
            }
            match self.bridge.query_status(&self.ifname).await {
                Ok(status) => {
                    let report = HealthReport {
                        class: classify(&status),
                        status,
                    };
                    debug!("health poll on {}: {:?}", self.ifname, report.class);
                    if tx.send(report).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("health poll on {} failed: {}", self.ifname, e);
                }
            }
        }
    }
}
