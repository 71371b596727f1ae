//! Daemon control hooks for applying configuration changes.

use std::io;
use std::process::Command;

use tracing::{debug, info};

/// Restart seam for the syslog daemon, kept narrow so command handlers can
/// be exercised without touching the init system.
pub(crate) trait ServiceControl {
    /// Restart the daemon so it re-reads its configuration drop-ins.
    fn reload(&self) -> io::Result<()>;
}

/// Restarts rsyslog through the init system. `systemctl` is tried first;
/// hosts without systemd fall back to the legacy `service` wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RsyslogControl;

impl ServiceControl for RsyslogControl {
    fn reload(&self) -> io::Result<()> {
        match run_restart("systemctl", &["restart", "rsyslog"]) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("systemctl unavailable, trying the service wrapper");
                run_restart("service", &["rsyslog", "restart"])
            }
            other => other,
        }
    }
}

fn run_restart(program: &str, args: &[&str]) -> io::Result<()> {
    let status = Command::new(program).args(args).status()?;
    if status.success() {
        info!(program, "restarted rsyslog");
        Ok(())
    } else {
        Err(io::Error::other(format!(
            "{program} exited with status {status}"
        )))
    }
}
