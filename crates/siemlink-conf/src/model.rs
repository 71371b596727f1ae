//! Typed endpoint identities, transports, and rule-line rendering.

use std::fmt;
use std::net::Ipv4Addr;
use std::num::NonZeroU16;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use serde::Serialize;

pub(crate) const BEGIN_PREFIX: &str = "# BEGIN SIEM CONFIG FOR ";
pub(crate) const END_PREFIX: &str = "# END SIEM CONFIG FOR ";

/// Remote collector identity: IPv4 address plus destination port.
///
/// Two endpoints sharing an address but not a port are distinct; the pair is
/// the unit the configuration file is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Dotted-quad collector address.
    pub address: Ipv4Addr,
    /// Destination port.
    pub port: NonZeroU16,
}

impl Endpoint {
    /// Build an endpoint identity from its parts.
    #[must_use]
    pub const fn new(address: Ipv4Addr, port: NonZeroU16) -> Self {
        Self { address, port }
    }

    /// Marker line opening this endpoint's block.
    #[must_use]
    pub fn begin_marker(self) -> String {
        format!("{BEGIN_PREFIX}{self}")
    }

    /// Marker line closing this endpoint's block.
    #[must_use]
    pub fn end_marker(self) -> String {
        format!("{END_PREFIX}{self}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, port) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid endpoint '{s}': expected <address>:<port>"))?;
        let address = address
            .parse::<Ipv4Addr>()
            .with_context(|| format!("invalid endpoint address '{address}'"))?;
        let port = port
            .parse::<NonZeroU16>()
            .with_context(|| format!("invalid endpoint port '{port}'"))?;
        Ok(Self { address, port })
    }
}

/// Delivery mode for forwarded messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Datagram delivery, rendered with a single `@` target prefix.
    Udp,
    /// Stream delivery, rendered with a double `@@` target prefix.
    Tcp,
}

impl Transport {
    /// Rule-line target prefix selecting this delivery mode.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Udp => "@",
            Self::Tcp => "@@",
        }
    }

    /// Render the transport as its lowercase string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
        }
    }

    /// Infer the transport from a rule line's target field.
    ///
    /// `@@` must be checked before `@`; a lone `@` prefix is datagram.
    pub(crate) fn from_target(target: &str) -> Option<Self> {
        if target.starts_with("@@") {
            Some(Self::Tcp)
        } else if target.starts_with('@') {
            Some(Self::Udp)
        } else {
            None
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render one forwarding rule line: `<selector> <prefix><address>:<port>`.
pub(crate) fn rule_line(endpoint: Endpoint, transport: Transport, selector: &str) -> String {
    format!("{selector} {}{endpoint}", transport.prefix())
}

/// A forwarding block discovered in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledBlock {
    /// Endpoint the block forwards to.
    pub endpoint: Endpoint,
    /// Delivery mode inferred from the block's first rule line, when any.
    pub transport: Option<Transport>,
    /// Selector expressions, one per rule line, in file order.
    pub selectors: Vec<String>,
}
