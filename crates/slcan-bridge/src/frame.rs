//! CAN Frame Type and Manual-Send Parsing

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Highest valid 11-bit arbitration identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Highest valid 29-bit arbitration identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Maximum payload length in bytes (classic CAN)
pub const MAX_DATA_LEN: usize = 8;

/// A received or outgoing CAN frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Arbitration identifier (11 or 29 bits)
    pub id: u32,
    /// Whether the identifier is 29-bit extended
    pub extended: bool,
    /// Payload, 0..=8 bytes
    pub data: Vec<u8>,
    /// Receive (or build) timestamp, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl Frame {
    /// Create a frame, validating identifier range and payload length
    pub fn new(id: u32, extended: bool, data: Vec<u8>, timestamp_ms: u64) -> Result<Self, BridgeError> {
        let max = if extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if id > max {
            return Err(BridgeError::InvalidFrame(format!(
                "identifier {:X} out of range (max {:X})",
                id, max
            )));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(BridgeError::InvalidFrame(format!(
                "payload of {} bytes exceeds {} byte limit",
                data.len(),
                MAX_DATA_LEN
            )));
        }
        Ok(Self {
            id,
            extended,
            data,
            timestamp_ms,
        })
    }

    /// Uppercase hexadecimal form of the identifier, no leading zeros
    pub fn id_hex(&self) -> String {
        format!("{:X}", self.id)
    }

    /// Uppercase hexadecimal form of the payload
    pub fn data_hex(&self) -> String {
        self.data.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parse a manual send spec of the form `<hex-identifier>#<hex-bytes>`.
///
/// The identifier is 1-8 hex digits; more than 3 digits or a value above
/// 0x7FF selects a 29-bit extended frame. The payload is 0-16 hex digits
/// with an even count. Any violation is rejected before anything touches
/// the bus.
pub fn parse_send_spec(spec: &str) -> Result<Frame, BridgeError> {
    let mut parts = spec.splitn(2, '#');
    let id_part = parts.next().unwrap_or("");
    let data_part = parts
        .next()
        .ok_or_else(|| BridgeError::InvalidFrame("missing `#` separator".into()))?;

    if id_part.is_empty() {
        return Err(BridgeError::InvalidFrame("missing identifier".into()));
    }
    if id_part.len() > 8 {
        return Err(BridgeError::InvalidFrame(format!(
            "identifier `{}` longer than 8 hex digits",
            id_part
        )));
    }
    let id = u32::from_str_radix(id_part, 16)
        .map_err(|_| BridgeError::InvalidFrame(format!("identifier `{}` is not hex", id_part)))?;

    if data_part.len() > 2 * MAX_DATA_LEN {
        return Err(BridgeError::InvalidFrame(format!(
            "payload `{}` longer than {} hex digits",
            data_part,
            2 * MAX_DATA_LEN
        )));
    }
    if data_part.len() % 2 != 0 {
        return Err(BridgeError::InvalidFrame(format!(
            "payload `{}` has an odd digit count",
            data_part
        )));
    }
    let mut data = Vec::with_capacity(data_part.len() / 2);
    for chunk in data_part.as_bytes().chunks(2) {
        let pair = std::str::from_utf8(chunk).unwrap_or_default();
        let byte = u8::from_str_radix(pair, 16)
            .map_err(|_| BridgeError::InvalidFrame(format!("payload byte `{}` is not hex", pair)))?;
        data.push(byte);
    }

    let extended = id_part.len() > 3 || id > MAX_STANDARD_ID;
    Frame::new(id, extended, data, now_ms())
}
