//! Frame I/O Traits and SocketCAN Backend
//!
//! Receive and transmit halves are split so the blocking reader task can own
//! the receive side while the controller keeps the transmit side.

use crate::error::BridgeError;
use crate::frame::{now_ms, Frame};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as RawFrame, Id, Socket, StandardId};
use std::time::Duration;

/// Blocking receive half of a frame connection
pub trait FrameRx: Send {
    /// Wait up to `timeout` for one frame. `Ok(None)` means the timeout
    /// elapsed with nothing to read; an error means the backend is gone.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>, BridgeError>;
}

/// Transmit half of a frame connection
pub trait FrameTx: Send {
    fn send(&mut self, frame: &Frame) -> Result<(), BridgeError>;
}

/// Factory opening both halves against a named interface
pub trait FrameIo: Send + Sync {
    fn open(&self, ifname: &str) -> Result<(Box<dyn FrameRx>, Box<dyn FrameTx>), BridgeError>;
}

/// SocketCAN-backed frame I/O
#[derive(Debug, Clone, Default)]
pub struct SocketCanIo;

impl SocketCanIo {
    pub fn new() -> Self {
        Self
    }
}

impl FrameIo for SocketCanIo {
    fn open(&self, ifname: &str) -> Result<(Box<dyn FrameRx>, Box<dyn FrameTx>), BridgeError> {
        let rx = CanSocket::open(ifname)?;
        let tx = CanSocket::open(ifname)?;
        Ok((Box::new(SocketCanRx { socket: rx }), Box::new(SocketCanTx { socket: tx })))
    }
}

struct SocketCanRx {
    socket: CanSocket,
}

impl FrameRx for SocketCanRx {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>, BridgeError> {
        match self.socket.read_frame_timeout(timeout) {
            Ok(CanFrame::Error(_)) => Ok(None),
            Ok(raw) => Ok(Some(Frame {
                id: raw.raw_id(),
                extended: raw.is_extended(),
                data: raw.data().to_vec(),
                timestamp_ms: now_ms(),
            })),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(BridgeError::Socket(e.to_string())),
        }
    }
}

struct SocketCanTx {
    socket: CanSocket,
}

impl FrameTx for SocketCanTx {
    fn send(&mut self, frame: &Frame) -> Result<(), BridgeError> {
        let id: Id = if frame.extended {
            ExtendedId::new(frame.id)
                .map(Id::Extended)
                .ok_or_else(|| BridgeError::InvalidFrame(format!("extended id {:X} out of range", frame.id)))?
        } else {
            StandardId::new(frame.id as u16)
                .map(Id::Standard)
                .ok_or_else(|| BridgeError::InvalidFrame(format!("standard id {:X} out of range", frame.id)))?
        };
        let raw = CanFrame::new(id, &frame.data)
            .ok_or_else(|| BridgeError::InvalidFrame(format!("payload of {} bytes rejected", frame.data.len())))?;
        self.socket.write_frame(&raw)?;
        Ok(())
    }
}
