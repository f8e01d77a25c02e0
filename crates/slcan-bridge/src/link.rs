//! Link Status Model and `ip -details` Output Parsing

use serde::{Deserialize, Serialize};

/// CAN controller fault-confinement state as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CanBusState {
    /// Controller participates normally
    ErrorActive,
    /// Error counters elevated, still fully participating
    ErrorWarning,
    /// Controller degraded, passive participation only
    ErrorPassive,
    /// Controller off the bus until restarted
    BusOff,
    /// Interface stopped
    Stopped,
    /// Controller sleeping
    Sleeping,
    /// State marker missing or unrecognized
    #[default]
    Unknown,
}

/// Snapshot of the logical interface as one status query saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkStatus {
    /// Administrative UP flag present
    pub admin_up: bool,
    /// Physical carrier present (LOWER_UP without NO-CARRIER)
    pub carrier: bool,
    /// Controller fault-confinement state
    pub can_state: CanBusState,
}

impl LinkStatus {
    /// Up with carrier, the gate for a successful bring-up
    pub fn is_operational(&self) -> bool {
        self.admin_up && self.carrier
    }
}

/// Parse one `ip -details link show <ifname>` output block.
///
/// Only the markers this system acts on are extracted: the flag set on the
/// first line and the `can state <STATE>` token from the details line.
pub fn parse_link_status(output: &str) -> LinkStatus {
    let mut status = LinkStatus::default();

    if let Some(open) = output.find('<') {
        if let Some(close) = output[open..].find('>') {
            let flags: Vec<&str> = output[open + 1..open + close].split(',').collect();
            status.admin_up = flags.iter().any(|f| *f == "UP");
            let lower_up = flags.iter().any(|f| *f == "LOWER_UP");
            let no_carrier = flags.iter().any(|f| *f == "NO-CARRIER");
            status.carrier = lower_up && !no_carrier;
        }
    }

    if let Some(pos) = output.find("can state ") {
        let rest = &output[pos + "can state ".len()..];
        let token = rest.split_whitespace().next().unwrap_or("");
        status.can_state = match token {
            "ERROR-ACTIVE" => CanBusState::ErrorActive,
            "ERROR-WARNING" => CanBusState::ErrorWarning,
            "ERROR-PASSIVE" => CanBusState::ErrorPassive,
            "BUS-OFF" => CanBusState::BusOff,
            "STOPPED" => CanBusState::Stopped,
            "SLEEPING" => CanBusState::Sleeping,
            _ => CanBusState::Unknown,
        };
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    const UP_OUTPUT: &str = "\
3: can0: <NOARP,UP,LOWER_UP,ECHO> mtu 16 qdisc pfifo_fast state UP mode DEFAULT group default qlen 1000
    link/can  promiscuity 0 minmtu 0 maxmtu 0
    can state ERROR-ACTIVE (berr-counter tx 0 rx 0) restart-ms 0";

    const DOWN_OUTPUT: &str = "\
3: can0: <NOARP,ECHO> mtu 16 qdisc noop state DOWN mode DEFAULT group default qlen 10
    link/can  promiscuity 0
    can state STOPPED restart-ms 0";

    const NO_CARRIER_OUTPUT: &str = "\
3: can0: <NO-CARRIER,NOARP,UP,ECHO> mtu 16 qdisc pfifo_fast state DOWN mode DEFAULT group default qlen 1000
    link/can  promiscuity 0
    can state STOPPED restart-ms 0";

    const PASSIVE_OUTPUT: &str = "\
3: can0: <NOARP,UP,LOWER_UP,ECHO> mtu 16 qdisc pfifo_fast state UP mode DEFAULT group default qlen 1000
    link/can  promiscuity 0
    can state ERROR-PASSIVE (berr-counter tx 128 rx 0) restart-ms 0";

    const BUSOFF_OUTPUT: &str = "\
3: can0: <NOARP,UP,ECHO> mtu 16 qdisc pfifo_fast state UP mode DEFAULT group default qlen 1000
    link/can  promiscuity 0
    can state BUS-OFF (berr-counter tx 248 rx 0) restart-ms 0";

    #[test]
    fn test_parse_operational() {
        let status = parse_link_status(UP_OUTPUT);
        assert!(status.admin_up);
        assert!(status.carrier);
        assert!(status.is_operational());
        assert_eq!(status.can_state, CanBusState::ErrorActive);
    }

    #[test]
    fn test_parse_down() {
        let status = parse_link_status(DOWN_OUTPUT);
        assert!(!status.admin_up);
        assert!(!status.carrier);
        assert!(!status.is_operational());
        assert_eq!(status.can_state, CanBusState::Stopped);
    }

    #[test]
    fn test_parse_no_carrier() {
        let status = parse_link_status(NO_CARRIER_OUTPUT);
        assert!(status.admin_up);
        assert!(!status.carrier);
        assert!(!status.is_operational());
    }

    #[test]
    fn test_parse_error_passive() {
        let status = parse_link_status(PASSIVE_OUTPUT);
        assert_eq!(status.can_state, CanBusState::ErrorPassive);
    }

    #[test]
    fn test_parse_bus_off() {
        let status = parse_link_status(BUSOFF_OUTPUT);
        assert_eq!(status.can_state, CanBusState::BusOff);
    }

    #[test]
    fn test_parse_garbage() {
        let status = parse_link_status("Device \"can0\" does not exist.");
        assert!(!status.is_operational());
        assert_eq!(status.can_state, CanBusState::Unknown);
    }
}
