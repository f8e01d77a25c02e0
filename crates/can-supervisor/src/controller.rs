//! Interface Lifecycle Controller
//!
//! Owns the one authoritative state machine for the logical CAN interface.
//! Every bring-up and tear-down runs to completion before the next request
//! is considered; presence and health inputs funnel through the same owner,
//! so two sequences can never interleave.

use crate::events::{CoreEvent, FaultKind};
use crate::reader::{spawn_reader, ReaderHandle, ReaderNotice};
use adapter_watch::{AdapterHandle, PresenceEvent};
use bus_health::HealthClass;
use serde::{Deserialize, Serialize};
use slcan_bridge::{
    parse_send_spec, BridgeError, BridgeOps, Frame, FrameIo, FrameTx, InterfaceConfig,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Lifecycle states of the logical interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceState {
    /// No adapter hardware present
    Absent,
    /// Adapter present, interface not up
    Down,
    /// Bring-up sequence in progress
    BringingUp,
    /// Interface up with carrier, frames flowing
    Up,
    /// Up, but the controller has degraded to error-passive
    ErrorPassive,
    /// Controller dropped off the bus; reset cycle pending
    BusOff,
    /// Tear-down sequence in progress
    TearingDown,
    /// Last bring-up attempt failed
    ActivationFailed,
}

impl InterfaceState {
    /// States in which the bus is (at least nominally) attached
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            InterfaceState::Up | InterfaceState::ErrorPassive | InterfaceState::BusOff
        )
    }
}

impl std::fmt::Display for InterfaceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InterfaceState::Absent => "absent",
            InterfaceState::Down => "down",
            InterfaceState::BringingUp => "bringing-up",
            InterfaceState::Up => "up",
            InterfaceState::ErrorPassive => "error-passive",
            InterfaceState::BusOff => "bus-off",
            InterfaceState::TearingDown => "tearing-down",
            InterfaceState::ActivationFailed => "activation-failed",
        };
        write!(f, "{}", name)
    }
}

/// Errors returned on the control surface
#[derive(Debug, Error)]
pub enum ControllerError {
    /// No adapter hardware; activation waits for a presence event
    #[error("no adapter present")]
    AdapterAbsent,

    /// A lifecycle transition is already in flight
    #[error("another lifecycle transition is in flight")]
    Busy,

    /// Interface is already attached to the bus
    #[error("interface already active")]
    AlreadyActive,

    /// Operation requires the interface to be up
    #[error("interface is not up")]
    NotUp,

    /// Bridge process failed to launch or exited immediately
    #[error("bridge start failed: {0}")]
    BridgeStart(String),

    /// Interface never reported up with carrier inside the window
    #[error("interface did not reach up+carrier within {0}ms")]
    ActivationTimeout(u64),

    /// Manual send spec rejected before transmission
    #[error("validation failed: {0}")]
    Validation(String),

    /// The supervisor behind this handle is gone
    #[error("supervisor is not running")]
    Unavailable,

    /// Underlying bridge or link operation failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Timing knobs for the controller
#[derive(Debug, Clone)]
pub struct ControllerTiming {
    /// Bounded blocking-receive timeout for the frame reader
    pub read_timeout: Duration,
    /// Pause before the bus-off or read-fault recovery cycle
    pub recovery_backoff: Duration,
    /// Interval between status polls during bring-up
    pub status_poll_interval: Duration,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(200),
            recovery_backoff: Duration::from_millis(1000),
            status_poll_interval: Duration::from_millis(100),
        }
    }
}

/// The lifecycle state machine
pub struct InterfaceController<B: BridgeOps, IO: FrameIo> {
    bridge: Arc<B>,
    io: Arc<IO>,
    events: broadcast::Sender<CoreEvent>,
    frame_tx: mpsc::Sender<Frame>,
    notice_tx: mpsc::Sender<ReaderNotice>,
    timing: ControllerTiming,

    state: InterfaceState,
    desired_active: bool,
    adapter: Option<AdapterHandle>,
    config: Option<InterfaceConfig>,
    in_transition: bool,
    reader: Option<ReaderHandle>,
    tx_half: Option<Box<dyn FrameTx>>,
}

impl<B: BridgeOps, IO: FrameIo> InterfaceController<B, IO> {
    pub fn new(
        bridge: Arc<B>,
        io: Arc<IO>,
        events: broadcast::Sender<CoreEvent>,
        frame_tx: mpsc::Sender<Frame>,
        notice_tx: mpsc::Sender<ReaderNotice>,
        timing: ControllerTiming,
    ) -> Self {
        Self {
            bridge,
            io,
            events,
            frame_tx,
            notice_tx,
            timing,
            state: InterfaceState::Absent,
            desired_active: false,
            adapter: None,
            config: None,
            in_transition: false,
            reader: None,
            tx_half: None,
        }
    }

    pub fn state(&self) -> InterfaceState {
        self.state
    }

    pub fn desired_active(&self) -> bool {
        self.desired_active
    }

    fn set_state(&mut self, next: InterfaceState) {
        if self.state != next {
            info!("interface {} -> {}", self.state, next);
            self.state = next;
            let _ = self.events.send(CoreEvent::LifecycleChanged(next));
        }
    }

    fn fault(&self, kind: FaultKind, detail: impl Into<String>) {
        let detail = detail.into();
        warn!("fault {:?}: {}", kind, detail);
        let _ = self.events.send(CoreEvent::Fault { kind, detail });
    }

    /// Run the bring-up sequence and start the reader.
    ///
    /// Rejected while a transition is in flight or when already attached;
    /// without an adapter it fails immediately but keeps the desire to be
    /// active, so the next presence event retries.
    pub async fn activate(&mut self, config: InterfaceConfig) -> Result<(), ControllerError> {
        if self.in_transition {
            return Err(ControllerError::Busy);
        }
        if self.state.is_active() {
            return Err(ControllerError::AlreadyActive);
        }
        self.desired_active = true;
        self.config = Some(config.clone());

        let Some(adapter) = self.adapter.clone() else {
            self.set_state(InterfaceState::ActivationFailed);
            self.fault(FaultKind::AdapterAbsent, "no adapter present");
            return Err(ControllerError::AdapterAbsent);
        };

        self.in_transition = true;
        let result = self.bring_up(&adapter, &config).await;
        self.in_transition = false;

        match result {
            Ok(()) => {
                self.set_state(InterfaceState::Up);
                Ok(())
            }
            Err(e) => {
                // leave nothing half-attached behind a failed attempt
                let _ = self.bridge.link_down(&config.ifname).await;
                let _ = self.bridge.kill_stale(&config.ifname).await;
                self.set_state(InterfaceState::ActivationFailed);
                self.fault(fault_kind_for(&e), e.to_string());
                Err(e)
            }
        }
    }

    async fn bring_up(
        &mut self,
        adapter: &AdapterHandle,
        config: &InterfaceConfig,
    ) -> Result<(), ControllerError> {
        self.set_state(InterfaceState::BringingUp);
        info!(
            "bringing {} up at {} via {:?}",
            config.ifname, config.bitrate, adapter.path
        );

        self.bridge.kill_stale(&config.ifname).await?;

        let device = adapter.path.to_string_lossy();
        match self.bridge.start(&device, config).await {
            Ok(()) => {}
            Err(BridgeError::BridgeStart(detail)) => {
                return Err(ControllerError::BridgeStart(detail))
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(Duration::from_millis(config.settle_delay_ms)).await;
        self.bridge.link_up(config).await?;

        let deadline = Instant::now() + Duration::from_millis(config.activation_timeout_ms);
        loop {
            match self.bridge.query_status(&config.ifname).await {
                Ok(status) if status.is_operational() => break,
                Ok(_) => {}
                Err(e) => warn!("status poll during bring-up failed: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(ControllerError::ActivationTimeout(
                    config.activation_timeout_ms,
                ));
            }
            tokio::time::sleep(self.timing.status_poll_interval).await;
        }

        self.start_reader(&config.ifname)?;
        Ok(())
    }

    fn start_reader(&mut self, ifname: &str) -> Result<(), ControllerError> {
        let (rx, tx) = self.io.open(ifname)?;
        self.tx_half = Some(tx);
        self.reader = Some(spawn_reader(
            rx,
            self.frame_tx.clone(),
            self.notice_tx.clone(),
            self.timing.read_timeout,
        ));
        Ok(())
    }

    async fn stop_reader(&mut self) {
        self.tx_half = None;
        if let Some(reader) = self.reader.take() {
            reader.stop().await;
        }
    }

    /// Deliberate deactivation; clears the desire to be active
    pub async fn deactivate(&mut self) -> Result<(), ControllerError> {
        if self.in_transition {
            return Err(ControllerError::Busy);
        }
        self.desired_active = false;
        let terminal = self.rest_state();
        self.tear_down(terminal).await;
        Ok(())
    }

    /// Where the machine settles when nothing is up
    fn rest_state(&self) -> InterfaceState {
        if self.adapter.is_some() {
            InterfaceState::Down
        } else {
            InterfaceState::Absent
        }
    }

    /// Tear-down shared by deactivation, presence loss, faults and the
    /// reset cycle. Idempotent: an already-down link and an already-dead
    /// bridge are tolerated.
    async fn tear_down(&mut self, terminal: InterfaceState) {
        self.in_transition = true;
        self.set_state(InterfaceState::TearingDown);
        self.stop_reader().await;

        let ifname = self
            .config
            .as_ref()
            .map(|c| c.ifname.clone())
            .unwrap_or_else(|| InterfaceConfig::default().ifname);
        if let Err(e) = self.bridge.link_down(&ifname).await {
            warn!("link down on {} failed during tear-down: {}", ifname, e);
        }
        if let Err(e) = self.bridge.kill_stale(&ifname).await {
            warn!("bridge kill on {} failed during tear-down: {}", ifname, e);
        }

        self.in_transition = false;
        self.set_state(terminal);
    }

    /// Presence edges from the device watcher
    pub async fn handle_presence(&mut self, event: PresenceEvent) {
        match event {
            PresenceEvent::Connected(handle) => {
                self.adapter = Some(handle);
                if self.state == InterfaceState::Absent {
                    self.set_state(InterfaceState::Down);
                }
                if self.desired_active && !self.state.is_active() {
                    if let Some(config) = self.config.clone() {
                        info!("adapter present again, re-running activation");
                        if let Err(e) = self.activate(config).await {
                            warn!("presence-driven activation failed: {}", e);
                        }
                    }
                }
            }
            PresenceEvent::Disconnected => {
                self.adapter = None;
                // hardware is gone; tear down the logical side but keep
                // the intent so a reconnect re-activates
                let desired = self.desired_active;
                if self.state.is_active() || self.reader.is_some() {
                    self.tear_down(InterfaceState::Absent).await;
                } else {
                    self.set_state(InterfaceState::Absent);
                }
                self.desired_active = desired;
            }
        }
    }

    /// Degraded health classifications from the monitor
    pub async fn handle_health(&mut self, class: HealthClass) {
        if self.in_transition || !self.state.is_active() {
            return;
        }
        match class {
            HealthClass::Normal => {}
            HealthClass::ErrorPassive => {
                // reported, not recovered; an error-passive bus can heal
                self.set_state(InterfaceState::ErrorPassive);
            }
            HealthClass::BusOff => {
                self.set_state(InterfaceState::BusOff);
                if self.desired_active {
                    warn!(
                        "bus-off detected, reset cycle in {}ms",
                        self.timing.recovery_backoff.as_millis()
                    );
                    tokio::time::sleep(self.timing.recovery_backoff).await;
                    if let Err(e) = self.reset_cycle().await {
                        warn!("bus-off reset cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// Tear down and re-run activation with the same config
    pub async fn reset_cycle(&mut self) -> Result<(), ControllerError> {
        if self.in_transition {
            return Err(ControllerError::Busy);
        }
        if !self.state.is_active() {
            return Err(ControllerError::NotUp);
        }
        let config = self.config.clone().ok_or(ControllerError::NotUp)?;
        info!("reset cycle on {}", config.ifname);
        let terminal = self.rest_state();
        self.tear_down(terminal).await;
        self.activate(config).await
    }

    /// Backend read error: forced deactivation, then recovery if the
    /// adapter is still present and activity is still desired
    pub async fn handle_read_fault(&mut self, detail: String) {
        self.fault(FaultKind::ReadFault, detail);
        if self.in_transition {
            return;
        }
        let desired = self.desired_active;
        let terminal = self.rest_state();
        self.tear_down(terminal).await;
        self.desired_active = desired;

        if desired && self.adapter.is_some() {
            if let Some(config) = self.config.clone() {
                tokio::time::sleep(self.timing.recovery_backoff).await;
                info!("adapter still present after read fault, re-activating");
                if let Err(e) = self.activate(config).await {
                    warn!("read-fault recovery failed: {}", e);
                }
            }
        }
    }

    /// Validate and transmit a manual frame. Only permitted while Up.
    pub fn send_frame(&mut self, spec: &str) -> Result<(), ControllerError> {
        if self.state != InterfaceState::Up {
            return Err(ControllerError::NotUp);
        }
        let frame = match parse_send_spec(spec) {
            Ok(frame) => frame,
            Err(e) => return Err(ControllerError::Validation(e.to_string())),
        };
        let tx = self.tx_half.as_mut().ok_or(ControllerError::NotUp)?;
        tx.send(&frame)?;
        info!("sent frame {}#{}", frame.id_hex(), frame.data_hex());
        Ok(())
    }
}

fn fault_kind_for(error: &ControllerError) -> FaultKind {
    match error {
        ControllerError::AdapterAbsent => FaultKind::AdapterAbsent,
        ControllerError::BridgeStart(_) => FaultKind::BridgeStartFailure,
        ControllerError::ActivationTimeout(_) => FaultKind::ActivationTimeout,
        _ => FaultKind::Bridge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_watch::AdapterHandle;
    use slcan_bridge::mock::{MockBridge, MockFrameIo};
    use slcan_bridge::BitrateChoice;
    use std::path::PathBuf;

    struct Rig {
        controller: InterfaceController<MockBridge, MockFrameIo>,
        bridge: Arc<MockBridge>,
        io: MockFrameIo,
        _events: broadcast::Receiver<CoreEvent>,
        _frames: mpsc::Receiver<Frame>,
        _notices: mpsc::Receiver<ReaderNotice>,
    }

    fn rig() -> Rig {
        let bridge = Arc::new(MockBridge::new());
        let io = MockFrameIo::new();
        let (events_tx, events_rx) = broadcast::channel(256);
        let (frame_tx, frame_rx) = mpsc::channel(256);
        let (notice_tx, notice_rx) = mpsc::channel(16);
        let timing = ControllerTiming {
            read_timeout: Duration::from_millis(10),
            recovery_backoff: Duration::from_millis(5),
            status_poll_interval: Duration::from_millis(5),
        };
        let controller = InterfaceController::new(
            Arc::clone(&bridge),
            Arc::new(io.clone()),
            events_tx,
            frame_tx,
            notice_tx,
            timing,
        );
        Rig {
            controller,
            bridge,
            io,
            _events: events_rx,
            _frames: frame_rx,
            _notices: notice_rx,
        }
    }

    fn fast_config() -> InterfaceConfig {
        InterfaceConfig {
            settle_delay_ms: 1,
            activation_timeout_ms: 100,
            command_timeout_ms: 50,
            ..InterfaceConfig::new(BitrateChoice::B500k)
        }
    }

    fn adapter() -> AdapterHandle {
        AdapterHandle {
            path: PathBuf::from("/dev/ttyUSB0"),
            usb_id: None,
        }
    }

    async fn connect(rig: &mut Rig) {
        rig.controller
            .handle_presence(PresenceEvent::Connected(adapter()))
            .await;
    }

    #[tokio::test]
    async fn test_activate_without_adapter_fails() {
        let mut rig = rig();
        let err = rig.controller.activate(fast_config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::AdapterAbsent));
        assert_eq!(rig.controller.state(), InterfaceState::ActivationFailed);
        // intent survives, a presence event may retry
        assert!(rig.controller.desired_active());
    }

    #[tokio::test]
    async fn test_activate_runs_full_sequence() {
        let mut rig = rig();
        connect(&mut rig).await;
        assert_eq!(rig.controller.state(), InterfaceState::Down);

        rig.controller.activate(fast_config()).await.unwrap();
        assert_eq!(rig.controller.state(), InterfaceState::Up);
        assert_eq!(
            rig.bridge.lifecycle_ops(),
            vec!["kill_stale", "start /dev/ttyUSB0 S6", "link_up 1000"]
        );
        assert_eq!(rig.io.open_count(), 1);

        rig.controller.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_activate_rejected_while_transition_in_flight() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.in_transition = true;
        let err = rig.controller.activate(fast_config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Busy));
    }

    #[tokio::test]
    async fn test_activate_rejected_when_already_up() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();
        let err = rig.controller.activate(fast_config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyActive));
        rig.controller.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_activation_timeout_without_carrier() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.bridge.suppress_carrier(true);
        let err = rig.controller.activate(fast_config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::ActivationTimeout(_)));
        assert_eq!(rig.controller.state(), InterfaceState::ActivationFailed);
        // no reader was ever started
        assert_eq!(rig.io.open_count(), 0);
    }

    #[tokio::test]
    async fn test_bridge_start_failure() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.bridge.fail_next_start();
        let err = rig.controller.activate(fast_config()).await.unwrap_err();
        assert!(matches!(err, ControllerError::BridgeStart(_)));
        assert_eq!(rig.controller.state(), InterfaceState::ActivationFailed);
    }

    #[tokio::test]
    async fn test_deactivate_is_idempotent() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();

        rig.controller.deactivate().await.unwrap();
        assert_eq!(rig.controller.state(), InterfaceState::Down);
        assert!(!rig.controller.desired_active());

        rig.controller.deactivate().await.unwrap();
        assert_eq!(rig.controller.state(), InterfaceState::Down);
    }

    #[tokio::test]
    async fn test_presence_loss_forces_teardown_and_remembers_intent() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();

        rig.controller
            .handle_presence(PresenceEvent::Disconnected)
            .await;
        assert_eq!(rig.controller.state(), InterfaceState::Absent);
        assert!(rig.controller.desired_active());

        // replug re-activates with the same config
        connect(&mut rig).await;
        assert_eq!(rig.controller.state(), InterfaceState::Up);
        assert_eq!(rig.io.open_count(), 2);

        rig.controller.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_presence_loss_without_desire_stays_absent() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller
            .handle_presence(PresenceEvent::Disconnected)
            .await;
        assert_eq!(rig.controller.state(), InterfaceState::Absent);

        connect(&mut rig).await;
        assert_eq!(rig.controller.state(), InterfaceState::Down);
        assert_eq!(rig.io.open_count(), 0);
    }

    #[tokio::test]
    async fn test_read_fault_recovers_while_present() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();

        rig.controller.handle_read_fault("boom".to_string()).await;
        assert_eq!(rig.controller.state(), InterfaceState::Up);
        assert_eq!(rig.io.open_count(), 2);

        rig.controller.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_busoff_runs_reset_cycle() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();

        rig.controller.handle_health(HealthClass::BusOff).await;
        assert_eq!(rig.controller.state(), InterfaceState::Up);

        // exactly two bring-ups with a tear-down between them
        let ops = rig.bridge.lifecycle_ops();
        let starts: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.starts_with("start"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(ops[starts[0]..starts[1]]
            .iter()
            .any(|op| op == "link_down"));

        rig.controller.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_passive_reported_without_recovery() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();

        rig.controller.handle_health(HealthClass::ErrorPassive).await;
        assert_eq!(rig.controller.state(), InterfaceState::ErrorPassive);
        // no second bring-up happened
        assert_eq!(rig.io.open_count(), 1);

        rig.controller.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_frame_requires_up() {
        let mut rig = rig();
        let err = rig.controller.send_frame("1A0#02").unwrap_err();
        assert!(matches!(err, ControllerError::NotUp));
    }

    #[tokio::test]
    async fn test_send_frame_validates_then_transmits() {
        let mut rig = rig();
        connect(&mut rig).await;
        rig.controller.activate(fast_config()).await.unwrap();

        let err = rig.controller.send_frame("1A0#021").unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
        assert!(rig.io.sent().is_empty());

        rig.controller.send_frame("1A0#0201050000000000").unwrap();
        let sent = rig.io.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x1A0);

        rig.controller.deactivate().await.unwrap();
    }
}
