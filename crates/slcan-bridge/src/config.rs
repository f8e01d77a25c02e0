//! Bridge and Interface Configuration

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Serial baud the adapter side of the bridge is driven at
pub const SERIAL_BAUD: u32 = 3_000_000;

/// Supported CAN bus bit-rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitrateChoice {
    B100k,
    B125k,
    B250k,
    B500k,
    B1M,
}

impl BitrateChoice {
    /// The adapter's compact speed token handed to the bridge process.
    ///
    /// The table is fixed by the adapter firmware: 100k->S3, 125k->S4,
    /// 250k->S5, 500k->S6, 1M->S8.
    pub fn slcand_code(&self) -> &'static str {
        match self {
            BitrateChoice::B100k => "S3",
            BitrateChoice::B125k => "S4",
            BitrateChoice::B250k => "S5",
            BitrateChoice::B500k => "S6",
            BitrateChoice::B1M => "S8",
        }
    }

    /// Nominal bus speed in bits per second
    pub fn bits_per_sec(&self) -> u32 {
        match self {
            BitrateChoice::B100k => 100_000,
            BitrateChoice::B125k => 125_000,
            BitrateChoice::B250k => 250_000,
            BitrateChoice::B500k => 500_000,
            BitrateChoice::B1M => 1_000_000,
        }
    }
}

impl FromStr for BitrateChoice {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "100k" => Ok(BitrateChoice::B100k),
            "125k" => Ok(BitrateChoice::B125k),
            "250k" => Ok(BitrateChoice::B250k),
            "500k" => Ok(BitrateChoice::B500k),
            "1m" | "1000k" => Ok(BitrateChoice::B1M),
            other => Err(BridgeError::InvalidFrame(format!(
                "unsupported bit-rate `{}`",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BitrateChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BitrateChoice::B1M => write!(f, "1M"),
            other => write!(f, "{}k", other.bits_per_sec() / 1000),
        }
    }
}

/// Parameters of one bring-up sequence.
///
/// Immutable once the sequence starts; a new activation takes a new config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Requested bus bit-rate
    pub bitrate: BitrateChoice,
    /// Serial baud between host and adapter
    pub serial_baud: u32,
    /// Logical network interface name
    pub ifname: String,
    /// Transmit queue length applied on link up
    pub txqueuelen: u32,
    /// Delay after bridge start before touching the link, milliseconds
    pub settle_delay_ms: u64,
    /// Deadline for the interface to report up with carrier, milliseconds
    pub activation_timeout_ms: u64,
    /// Deadline for any single external command, milliseconds
    pub command_timeout_ms: u64,
}

impl InterfaceConfig {
    /// Config for the given bit-rate with stock defaults for everything else
    pub fn new(bitrate: BitrateChoice) -> Self {
        Self {
            bitrate,
            ..Self::default()
        }
    }
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            bitrate: BitrateChoice::B500k,
            serial_baud: SERIAL_BAUD,
            ifname: "can0".to_string(),
            txqueuelen: 1000,
            settle_delay_ms: 500,
            activation_timeout_ms: 5000,
            command_timeout_ms: 2000,
        }
    }
}
