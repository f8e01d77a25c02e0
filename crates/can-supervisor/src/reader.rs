//! Frame Reader Loop
//!
//! Runs on the blocking pool while the interface is up. Each receive waits
//! at most one bounded timeout, so the cooperative stop flag is observed
//! within one interval and tear-down never hangs on a quiet bus.

use slcan_bridge::{Frame, FrameRx};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Out-of-band notifications from the reader to the lifecycle controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderNotice {
    /// Backend receive error; the loop has terminated
    ReadFault(String),
}

/// Running reader task plus its stop flag
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ReaderHandle {
    /// Request a cooperative stop and wait for the loop to wind down.
    /// The wait is bounded; a reader stuck past it is abandoned, not joined.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if tokio::time::timeout(Duration::from_secs(2), self.join)
            .await
            .is_err()
        {
            warn!("frame reader did not stop within bound, abandoning");
        }
    }
}

/// Spawn the reader loop over an opened receive half
pub fn spawn_reader(
    mut rx: Box<dyn FrameRx>,
    frames: mpsc::Sender<Frame>,
    notices: mpsc::Sender<ReaderNotice>,
    read_timeout: Duration,
) -> ReaderHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    let join = tokio::task::spawn_blocking(move || {
        debug!("frame reader started");
        loop {
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            match rx.recv_timeout(read_timeout) {
                Ok(Some(frame)) => {
                    if frames.blocking_send(frame).is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("frame read failed: {}", e);
                    let _ = notices.blocking_send(ReaderNotice::ReadFault(e.to_string()));
                    break;
                }
            }
        }
        debug!("frame reader stopped");
    });
    ReaderHandle { stop, join }
}
