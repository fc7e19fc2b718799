//! Command catalog for Cisco VOS appliances (CUCM, IM&P, Unity Connection).

use std::time::Duration;

use super::ShellCommand;

pub const TOMCAT_SERVICE: &str = "Cisco Tomcat";
/// Service restarts on a loaded publisher routinely take a few minutes.
pub const RESTART_TIMEOUT: Duration = Duration::from_secs(180);

/// Certificate units understood by `show cert own`.
pub const CERT_UNITS: &[&str] = &["tomcat", "tomcat-ECDSA", "ipsec", "CallManager", "CAPF", "TVS"];

pub fn restart_service(service: &str) -> ShellCommand {
    ShellCommand::service_restart(format!("utils service restart {service}")).with_timeout(RESTART_TIMEOUT)
}

/// Restarting Tomcat is how a newly uploaded web certificate is picked up.
pub fn restart_tomcat() -> ShellCommand {
    restart_service(TOMCAT_SERVICE)
}

pub fn show_cert_own(unit: &str) -> ShellCommand {
    ShellCommand::generic(format!("show cert own {unit}"))
}

pub fn show_status() -> ShellCommand {
    ShellCommand::generic("show status")
}

pub fn test_connection() -> ShellCommand {
    ShellCommand::probe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{CommandKind, PROBE_TIMEOUT};

    #[test]
    fn tomcat_restart_uses_service_kind_and_long_budget() {
        let command = restart_tomcat();
        assert_eq!(command.text, "utils service restart Cisco Tomcat");
        assert_eq!(command.kind, CommandKind::ServiceRestart);
        assert_eq!(command.timeout, RESTART_TIMEOUT);
    }

    #[test]
    fn informational_commands_are_generic() {
        let command = show_cert_own("tomcat");
        assert_eq!(command.text, "show cert own tomcat");
        assert_eq!(command.kind, CommandKind::Generic);
        assert_eq!(show_status().kind, CommandKind::Generic);
        assert!(CERT_UNITS.contains(&"tomcat"));
    }

    #[test]
    fn connection_test_sends_nothing() {
        let command = test_connection();
        assert!(command.text.is_empty());
        assert!(!command.kind.sends_command());
        assert_eq!(command.timeout, PROBE_TIMEOUT);
    }
}
