//! In-Memory Mocks for Lifecycle and I/O Testing
//!
//! No hardware required: `MockBridge` records every operation and keeps a
//! scripted link status, `MockFrameIo` feeds frames from an in-memory queue.
//! Exported from the crate so dependents can drive their own tests with them.

use crate::bridge::BridgeOps;
use crate::config::InterfaceConfig;
use crate::error::BridgeError;
use crate::frame::Frame;
use crate::io::{FrameIo, FrameRx, FrameTx};
use crate::link::{CanBusState, LinkStatus};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Scriptable stand-in for the slcand/ip plumbing.
///
/// `link_up` flips the stored status to operational (unless carrier is
/// suppressed), `link_down` flips it back, so activation sequences behave
/// like real hardware without any processes being spawned.
#[derive(Debug, Default)]
pub struct MockBridge {
    ops: Mutex<Vec<String>>,
    status: Mutex<LinkStatus>,
    fail_start: AtomicBool,
    suppress_carrier: AtomicBool,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation performed, in call order
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Like [`ops`](Self::ops) but without the noisy status polls
    pub fn lifecycle_ops(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter(|op| op != "query_status")
            .collect()
    }

    /// Make the next `start` call fail as an immediate bridge exit
    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Keep carrier absent even after `link_up`, to exercise the
    /// activation timeout path
    pub fn suppress_carrier(&self, suppress: bool) {
        self.suppress_carrier.store(suppress, Ordering::SeqCst);
        if suppress {
            self.status.lock().unwrap().carrier = false;
        }
    }

    /// Override the controller fault-confinement state
    pub fn set_can_state(&self, state: CanBusState) {
        self.status.lock().unwrap().can_state = state;
    }

    fn record(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }
}

#[async_trait]
impl BridgeOps for MockBridge {
    async fn kill_stale(&self, _ifname: &str) -> Result<(), BridgeError> {
        self.record("kill_stale");
        Ok(())
    }

    async fn start(&self, device: &str, config: &InterfaceConfig) -> Result<(), BridgeError> {
        self.record(format!("start {} {}", device, config.bitrate.slcand_code()));
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::BridgeStart("mock slcand exited".into()));
        }
        Ok(())
    }

    async fn link_up(&self, config: &InterfaceConfig) -> Result<(), BridgeError> {
        self.record(format!("link_up {}", config.txqueuelen));
        let mut status = self.status.lock().unwrap();
        status.admin_up = true;
        status.carrier = !self.suppress_carrier.load(Ordering::SeqCst);
        status.can_state = CanBusState::ErrorActive;
        Ok(())
    }

    async fn link_down(&self, _ifname: &str) -> Result<(), BridgeError> {
        self.record("link_down");
        let mut status = self.status.lock().unwrap();
        status.admin_up = false;
        status.carrier = false;
        status.can_state = CanBusState::Stopped;
        Ok(())
    }

    async fn query_status(&self, _ifname: &str) -> Result<LinkStatus, BridgeError> {
        self.record("query_status");
        Ok(*self.status.lock().unwrap())
    }
}

#[derive(Debug, Default)]
struct MockIoState {
    incoming: Mutex<VecDeque<Frame>>,
    sent: Mutex<Vec<Frame>>,
    read_fault: AtomicBool,
    opens: AtomicUsize,
}

/// In-memory frame I/O. Cloned handles share one queue, so a test can keep
/// injecting frames across reader restarts.
#[derive(Debug, Clone, Default)]
pub struct MockFrameIo {
    state: Arc<MockIoState>,
}

impl MockFrameIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame for the receive half
    pub fn inject(&self, frame: Frame) {
        self.state.incoming.lock().unwrap().push_back(frame);
    }

    /// Frames written through the transmit half
    pub fn sent(&self) -> Vec<Frame> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Make the next receive call fail as a backend read error
    pub fn trigger_read_fault(&self) {
        self.state.read_fault.store(true, Ordering::SeqCst);
    }

    /// How many times `open` was called
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }
}

impl FrameIo for MockFrameIo {
    fn open(&self, _ifname: &str) -> Result<(Box<dyn FrameRx>, Box<dyn FrameTx>), BridgeError> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.read_fault.store(false, Ordering::SeqCst);
        let rx = MockRx {
            state: Arc::clone(&self.state),
        };
        let tx = MockTx {
            state: Arc::clone(&self.state),
        };
        Ok((Box::new(rx), Box::new(tx)))
    }
}

struct MockRx {
    state: Arc<MockIoState>,
}

impl FrameRx for MockRx {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>, BridgeError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.state.read_fault.swap(false, Ordering::SeqCst) {
                return Err(BridgeError::Socket("mock read fault".into()));
            }
            if let Some(frame) = self.state.incoming.lock().unwrap().pop_front() {
                return Ok(Some(frame));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

struct MockTx {
    state: Arc<MockIoState>,
}

impl FrameTx for MockTx {
    fn send(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        self.state.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BitrateChoice;

    #[tokio::test]
    async fn test_mock_bridge_records_sequence() {
        let bridge = MockBridge::new();
        let config = InterfaceConfig::new(BitrateChoice::B500k);
        bridge.kill_stale("can0").await.unwrap();
        bridge.start("/dev/ttyUSB0", &config).await.unwrap();
        bridge.link_up(&config).await.unwrap();
        assert!(bridge.query_status("can0").await.unwrap().is_operational());
        bridge.link_down("can0").await.unwrap();
        assert!(!bridge.query_status("can0").await.unwrap().is_operational());
        assert_eq!(
            bridge.lifecycle_ops(),
            vec!["kill_stale", "start /dev/ttyUSB0 S6", "link_up 1000", "link_down"]
        );
    }

    #[test]
    fn test_mock_io_roundtrip() {
        let io = MockFrameIo::new();
        let (mut rx, mut tx) = io.open("can0").unwrap();
        io.inject(Frame::new(0x1A0, false, vec![1, 2], 0).unwrap());
        let got = rx.recv_timeout(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(got.id, 0x1A0);
        assert!(rx.recv_timeout(Duration::from_millis(5)).unwrap().is_none());

        tx.send(&Frame::new(0x200, false, vec![9], 0).unwrap()).unwrap();
        assert_eq!(io.sent().len(), 1);
    }

    #[test]
    fn test_mock_io_read_fault() {
        let io = MockFrameIo::new();
        let (mut rx, _tx) = io.open("can0").unwrap();
        io.trigger_read_fault();
        assert!(rx.recv_timeout(Duration::from_millis(5)).is_err());
    }
}
