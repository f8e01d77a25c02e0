//! USB Adapter Presence Watcher
//!
//! Periodically scans for the serial-CAN adapter and emits edge-triggered
//! presence events: `Connected` only on absent-to-present, `Disconnected`
//! only on present-to-absent. A scan that observes no transition stays
//! silent.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Watcher error types
#[derive(Debug, Error)]
pub enum WatchError {
    /// USB id spec not of the form `vvvv:pppp`
    #[error("invalid usb id `{0}`, expected `vvvv:pppp` hex")]
    InvalidUsbId(String),
}

/// USB vendor/product identifier pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

impl FromStr for UsbId {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (v, p) = s
            .split_once(':')
            .ok_or_else(|| WatchError::InvalidUsbId(s.to_string()))?;
        let vendor =
            u16::from_str_radix(v, 16).map_err(|_| WatchError::InvalidUsbId(s.to_string()))?;
        let product =
            u16::from_str_radix(p, 16).map_err(|_| WatchError::InvalidUsbId(s.to_string()))?;
        Ok(Self { vendor, product })
    }
}

impl std::fmt::Display for UsbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// A present adapter as one scan saw it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterHandle {
    /// Device node path, e.g. `/dev/ttyUSB0`
    pub path: PathBuf,
    /// Vendor/product pair when sysfs exposed one
    pub usb_id: Option<UsbId>,
}

/// Edge-triggered presence events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Connected(AdapterHandle),
    Disconnected,
}

/// Configuration for the device watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Directory holding device nodes
    pub dev_root: PathBuf,
    /// Per-device sysfs root used for vendor/product probing
    pub sysfs_root: PathBuf,
    /// Device name prefix to consider, e.g. `ttyUSB`
    pub path_prefix: String,
    /// Required vendor/product pair; candidates with a readable,
    /// non-matching id are rejected
    pub usb_id: Option<UsbId>,
    /// Scan period in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            dev_root: PathBuf::from("/dev"),
            sysfs_root: PathBuf::from("/sys/class/tty"),
            path_prefix: "ttyUSB".to_string(),
            // CH341-family USB-serial bridge
            usb_id: Some(UsbId {
                vendor: 0x1a86,
                product: 0x7523,
            }),
            poll_interval_ms: 1000,
        }
    }
}

/// Periodic adapter scanner with edge detection
pub struct DeviceWatcher {
    config: WatcherConfig,
    present: Option<AdapterHandle>,
}

impl DeviceWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            present: None,
        }
    }

    /// One scan pass. Candidates are sorted by name so the pick is
    /// deterministic across scans.
    pub fn scan(&self) -> Option<AdapterHandle> {
        let entries = match std::fs::read_dir(&self.config.dev_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("device scan of {:?} failed: {}", self.config.dev_root, e);
                return None;
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.starts_with(&self.config.path_prefix))
            .collect();
        names.sort();

        for name in names {
            let usb_id = probe_usb_id(&self.config.sysfs_root, &name);
            if let (Some(want), Some(got)) = (self.config.usb_id, usb_id) {
                if want != got {
                    debug!("skipping {}: usb id {} does not match {}", name, got, want);
                    continue;
                }
            }
            return Some(AdapterHandle {
                path: self.config.dev_root.join(name),
                usb_id,
            });
        }
        None
    }

    /// Scan once and report a presence edge, if any
    pub fn poll(&mut self) -> Option<PresenceEvent> {
        let seen = self.scan();
        match (&self.present, seen) {
            (None, Some(handle)) => {
                info!("adapter connected at {:?}", handle.path);
                self.present = Some(handle.clone());
                Some(PresenceEvent::Connected(handle))
            }
            (Some(prev), None) => {
                info!("adapter at {:?} disconnected", prev.path);
                self.present = None;
                Some(PresenceEvent::Disconnected)
            }
            // Still present (possibly renumbered) or still absent
            (Some(_), Some(_)) | (None, None) => None,
        }
    }

    /// Run the poll loop, sending edges until the receiver goes away
    pub async fn run(mut self, tx: mpsc::Sender<PresenceEvent>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "watching {:?} for {}* every {}ms",
            self.config.dev_root, self.config.path_prefix, self.config.poll_interval_ms
        );
        loop {
            interval.tick().await;
            if let Some(event) = self.poll() {
                if tx.send(event).await.is_err() {
                    debug!("presence receiver dropped, watcher exiting");
                    return;
                }
            }
        }
    }
}

/// Read the vendor/product pair for a tty device from sysfs.
///
/// The USB device directory sits a few levels above the tty node; walk up
/// until a directory carries both id files.
fn probe_usb_id(sysfs_root: &Path, dev_name: &str) -> Option<UsbId> {
    let mut dir = sysfs_root.join(dev_name).join("device");
    for _ in 0..5 {
        let vendor = std::fs::read_to_string(dir.join("idVendor"));
        let product = std::fs::read_to_string(dir.join("idProduct"));
        if let (Ok(v), Ok(p)) = (vendor, product) {
            let vendor = u16::from_str_radix(v.trim(), 16).ok()?;
            let product = u16::from_str_radix(p.trim(), 16).ok()?;
            return Some(UsbId { vendor, product });
        }
        dir = dir.parent()?.to_path_buf();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn watcher_for(dev: &TempDir, sysfs: &TempDir, usb_id: Option<UsbId>) -> DeviceWatcher {
        DeviceWatcher::new(WatcherConfig {
            dev_root: dev.path().to_path_buf(),
            sysfs_root: sysfs.path().to_path_buf(),
            path_prefix: "ttyUSB".to_string(),
            usb_id,
            poll_interval_ms: 10,
        })
    }

    fn add_dev(dev: &TempDir, name: &str) {
        fs::write(dev.path().join(name), b"").unwrap();
    }

    fn add_sysfs_id(sysfs: &TempDir, name: &str, vendor: &str, product: &str) {
        let dir = sysfs.path().join(name).join("device");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("idVendor"), vendor).unwrap();
        fs::write(dir.join("idProduct"), product).unwrap();
    }

    #[test]
    fn test_scan_empty() {
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        assert!(watcher_for(&dev, &sysfs, None).scan().is_none());
    }

    #[test]
    fn test_scan_prefers_first_sorted_candidate() {
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        add_dev(&dev, "ttyUSB1");
        add_dev(&dev, "ttyUSB0");
        add_dev(&dev, "ttyS0");
        let handle = watcher_for(&dev, &sysfs, None).scan().unwrap();
        assert_eq!(handle.path, dev.path().join("ttyUSB0"));
    }

    #[test]
    fn test_scan_matches_usb_id() {
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        add_dev(&dev, "ttyUSB0");
        add_dev(&dev, "ttyUSB1");
        add_sysfs_id(&sysfs, "ttyUSB0", "0403", "6001");
        add_sysfs_id(&sysfs, "ttyUSB1", "1a86", "7523");
        let want: UsbId = "1a86:7523".parse().unwrap();
        let handle = watcher_for(&dev, &sysfs, Some(want)).scan().unwrap();
        assert_eq!(handle.path, dev.path().join("ttyUSB1"));
        assert_eq!(handle.usb_id, Some(want));
    }

    #[test]
    fn test_scan_rejects_mismatched_id() {
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        add_dev(&dev, "ttyUSB0");
        add_sysfs_id(&sysfs, "ttyUSB0", "0403", "6001");
        let want: UsbId = "1a86:7523".parse().unwrap();
        assert!(watcher_for(&dev, &sysfs, Some(want)).scan().is_none());
    }

    #[test]
    fn test_scan_falls_back_without_sysfs() {
        // id configured but sysfs silent: prefix heuristic decides
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        add_dev(&dev, "ttyUSB0");
        let want: UsbId = "1a86:7523".parse().unwrap();
        assert!(watcher_for(&dev, &sysfs, Some(want)).scan().is_some());
    }

    #[test]
    fn test_poll_is_edge_triggered() {
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        let mut watcher = watcher_for(&dev, &sysfs, None);

        assert!(watcher.poll().is_none());

        add_dev(&dev, "ttyUSB0");
        assert!(matches!(watcher.poll(), Some(PresenceEvent::Connected(_))));
        assert!(watcher.poll().is_none());

        fs::remove_file(dev.path().join("ttyUSB0")).unwrap();
        assert_eq!(watcher.poll(), Some(PresenceEvent::Disconnected));
        assert!(watcher.poll().is_none());
    }

    #[test]
    fn test_usb_id_parsing() {
        assert!("1a86:7523".parse::<UsbId>().is_ok());
        assert!("1a867523".parse::<UsbId>().is_err());
        assert!("zzzz:7523".parse::<UsbId>().is_err());
    }

    #[tokio::test]
    async fn test_run_emits_edges() {
        let dev = TempDir::new().unwrap();
        let sysfs = TempDir::new().unwrap();
        let watcher = watcher_for(&dev, &sysfs, None);
        let (tx, mut rx) = mpsc::channel(4);
        let handle = tokio::spawn(watcher.run(tx));

        add_dev(&dev, "ttyUSB0");
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, PresenceEvent::Connected(_)));

        handle.abort();
    }
}
