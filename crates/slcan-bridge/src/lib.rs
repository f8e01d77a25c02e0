//! Serial-CAN Bridge Adapter Layer
//!
//! Everything that touches the wire: launching and terminating the `slcand`
//! bridge process, administrative link up/down, link status parsing, the
//! CAN [`Frame`] type with manual-send validation, and frame I/O behind
//! [`FrameIo`] with SocketCAN and in-memory mock backends.

mod bridge;
mod config;
mod error;
mod frame;
mod io;
mod link;
pub mod mock;

pub use bridge::{BridgeOps, SlcanBridge};
pub use config::{BitrateChoice, InterfaceConfig, SERIAL_BAUD};
pub use error::BridgeError;
pub use frame::{now_ms, parse_send_spec, Frame, MAX_DATA_LEN, MAX_EXTENDED_ID, MAX_STANDARD_ID};
pub use io::{FrameIo, FrameRx, FrameTx, SocketCanIo};
pub use link::{parse_link_status, CanBusState, LinkStatus};
