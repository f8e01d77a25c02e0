//! Bridge Process Control and Link Administration
//!
//! Drives the external `slcand` bridge process and the logical network
//! interface through `ip`. Every external command runs with an enforced
//! deadline so lifecycle transitions can never hang on the wire.

use crate::config::InterfaceConfig;
use crate::error::BridgeError;
use crate::link::{parse_link_status, LinkStatus};
use async_trait::async_trait;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Operations the lifecycle controller needs from the adapter plumbing.
///
/// The production implementation shells out to `slcand`/`ip`; tests swap in
/// an in-memory mock.
#[async_trait]
pub trait BridgeOps: Send + Sync {
    /// Terminate any bridge process bound to `ifname`. "Not running" counts
    /// as success.
    async fn kill_stale(&self, ifname: &str) -> Result<(), BridgeError>;

    /// Launch the bridge process for `device` with the mapped bit-rate code
    async fn start(&self, device: &str, config: &InterfaceConfig) -> Result<(), BridgeError>;

    /// Administratively bring the interface up with the configured queue length
    async fn link_up(&self, config: &InterfaceConfig) -> Result<(), BridgeError>;

    /// Administratively bring the interface down. Already-down is fine.
    async fn link_down(&self, ifname: &str) -> Result<(), BridgeError>;

    /// Query the current link status
    async fn query_status(&self, ifname: &str) -> Result<LinkStatus, BridgeError>;
}

/// Production bridge backed by `slcand` and `ip`
#[derive(Debug, Clone)]
pub struct SlcanBridge {
    command_timeout: Duration,
}

impl SlcanBridge {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    /// Argument vector for the bridge process launch
    fn slcand_args(device: &str, config: &InterfaceConfig) -> Vec<String> {
        // slcand -o -s<code> -t hw -S <baud> <device> <ifname>
        let code = config.bitrate.slcand_code();
        vec![
            "-o".to_string(),
            format!("-s{}", &code[1..]),
            "-t".to_string(),
            "hw".to_string(),
            "-S".to_string(),
            config.serial_baud.to_string(),
            device.to_string(),
            config.ifname.clone(),
        ]
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output, BridgeError> {
        let rendered = format!("{} {}", program, args.join(" "));
        debug!("running `{}`", rendered);
        let fut = Command::new(program).args(args).kill_on_drop(true).output();
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(BridgeError::CommandFailed {
                command: rendered,
                detail: e.to_string(),
            }),
            Err(_) => Err(BridgeError::CommandTimeout(
                rendered,
                self.command_timeout.as_millis() as u64,
            )),
        }
    }
}

#[async_trait]
impl BridgeOps for SlcanBridge {
    async fn kill_stale(&self, ifname: &str) -> Result<(), BridgeError> {
        let args = vec!["-f".to_string(), format!("slcand.*{}", ifname)];
        let output = self.run("pkill", &args).await?;
        // pkill exits 1 when no process matched
        match output.status.code() {
            Some(0) | Some(1) => Ok(()),
            _ => Err(BridgeError::CommandFailed {
                command: "pkill".to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    async fn start(&self, device: &str, config: &InterfaceConfig) -> Result<(), BridgeError> {
        let args = Self::slcand_args(device, config);
        let output = self.run("slcand", &args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(BridgeError::BridgeStart(if stderr.is_empty() {
                format!("slcand exited with {}", output.status)
            } else {
                stderr
            }));
        }
        Ok(())
    }

    async fn link_up(&self, config: &InterfaceConfig) -> Result<(), BridgeError> {
        let args = vec![
            "link".to_string(),
            "set".to_string(),
            "dev".to_string(),
            config.ifname.clone(),
            "up".to_string(),
            "txqueuelen".to_string(),
            config.txqueuelen.to_string(),
        ];
        let output = self.run("ip", &args).await?;
        if !output.status.success() {
            return Err(BridgeError::CommandFailed {
                command: format!("ip link set dev {} up", config.ifname),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn link_down(&self, ifname: &str) -> Result<(), BridgeError> {
        let args = vec![
            "link".to_string(),
            "set".to_string(),
            "dev".to_string(),
            ifname.to_string(),
            "down".to_string(),
        ];
        let output = self.run("ip", &args).await?;
        if !output.status.success() {
            // Tolerated by callers during tear-down; still worth surfacing
            warn!(
                "ip link down on {} failed: {}",
                ifname,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn query_status(&self, ifname: &str) -> Result<LinkStatus, BridgeError> {
        let args = vec![
            "-details".to_string(),
            "link".to_string(),
            "show".to_string(),
            "dev".to_string(),
            ifname.to_string(),
        ];
        let output = self.run("ip", &args).await?;
        if !output.status.success() {
            return Err(BridgeError::StatusQuery(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(parse_link_status(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BitrateChoice;

    #[test]
    fn test_slcand_args_shape() {
        let config = InterfaceConfig::new(BitrateChoice::B500k);
        let args = SlcanBridge::slcand_args("/dev/ttyUSB0", &config);
        assert_eq!(
            args,
            vec!["-o", "-s6", "-t", "hw", "-S", "3000000", "/dev/ttyUSB0", "can0"]
        );
    }

    #[test]
    fn test_slcand_args_respect_bitrate() {
        let config = InterfaceConfig::new(BitrateChoice::B100k);
        let args = SlcanBridge::slcand_args("/dev/ttyUSB1", &config);
        assert!(args.contains(&"-s3".to_string()));
        assert!(args.contains(&"/dev/ttyUSB1".to_string()));
    }
}
