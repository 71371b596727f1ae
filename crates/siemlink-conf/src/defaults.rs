//! Default locations and forwarding selectors.
//!
//! # Design
//! - Centralize the drop-in path so the CLI and tests agree on the target.
//! - Keep the selector set explicit and ordered for auditability.

/// Default rsyslog drop-in managed by this tool.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/rsyslog.d/30-siemlink.conf";

/// Ordered selector set written when the caller supplies none.
///
/// Covers authorization, kernel, scheduled-task, error-and-above, and
/// general informational traffic (minus facilities already captured above).
pub const DEFAULT_SELECTORS: [&str; 5] = [
    "auth,authpriv.*",
    "kern.*",
    "cron.*",
    "*.err",
    "*.info;mail.none;authpriv.none;cron.none",
];
