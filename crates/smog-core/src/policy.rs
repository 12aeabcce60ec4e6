//! Client address allow-list.
//!
//! Entries are single addresses (`192.168.1.50`, `::1`) or CIDR blocks
//! (`10.0.0.0/8`, `fd00::/8`). An empty list allows every client. Entries
//! that parse as neither are logged and skipped; they never widen the
//! list, so a list made only of bad entries denies everyone.

use std::net::IpAddr;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Exact(IpAddr),
    Network { addr: IpAddr, prefix: u8 },
}

impl Rule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim();

        if let Some((addr, prefix)) = entry.split_once('/') {
            if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let addr: IpAddr = addr.parse().ok()?;
            let prefix: u8 = prefix.parse().ok()?;
            let width = if addr.is_ipv4() { 32 } else { 128 };
            return (prefix <= width).then_some(Self::Network { addr, prefix });
        }

        entry.parse::<IpAddr>().ok().map(|ip| Self::Exact(ip.to_canonical()))
    }

    fn matches(self, ip: IpAddr) -> bool {
        match self {
            Self::Exact(allowed) => allowed == ip,
            Self::Network { addr, prefix } => match (addr, ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    same_prefix(u32::from(net).into(), u32::from(ip).into(), prefix, 32)
                }
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    same_prefix(u128::from(net), u128::from(ip), prefix, 128)
                }
                // Clients arrive canonicalised; IPv6 blocks may still cover
                // the mapped range (`::ffff:10.0.0.0/104`).
                (IpAddr::V6(net), IpAddr::V4(ip)) => same_prefix(
                    u128::from(net),
                    u128::from(ip.to_ipv6_mapped()),
                    prefix,
                    128,
                ),
                (IpAddr::V4(_), IpAddr::V6(_)) => false,
            },
        }
    }
}

fn same_prefix(net: u128, ip: u128, prefix: u8, width: u32) -> bool {
    let shift = width - u32::from(prefix);
    if shift >= 128 {
        return true;
    }
    (net >> shift) == (ip >> shift)
}

/// Parsed allow-list consulted for every new connection.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    rules: Vec<Rule>,
    restricted: bool,
}

impl AccessPolicy {
    /// Parses the configured entries, warning about the ones that are
    /// neither an address nor a CIDR block.
    #[must_use]
    pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
        let rules = entries
            .iter()
            .filter_map(|entry| {
                let entry = entry.as_ref();
                let rule = Rule::parse(entry);
                if rule.is_none() {
                    warn!(entry, "invalid entry in AllowedSubnets list");
                }
                rule
            })
            .collect();

        Self {
            rules,
            restricted: !entries.is_empty(),
        }
    }

    /// Policy that lets every client connect.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns true if an allow-list is configured.
    #[must_use]
    pub const fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Returns true if `ip` may connect.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:10.1.2.3`) are compared as the
    /// IPv4 address they carry.
    #[must_use]
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        if !self.restricted {
            return true;
        }

        let ip = ip.to_canonical();
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches(ip)) {
            debug!(client_ip = %ip, rule = ?rule, "client IP matched allow-list");
            return true;
        }

        debug!(client_ip = %ip, "client IP is not in any allowed subnet");
        false
    }
}

/// One-shot check of `ip` against unparsed allow-list entries.
#[must_use]
pub fn is_allowed<S: AsRef<str>>(ip: IpAddr, entries: &[S]) -> bool {
    AccessPolicy::new(entries).is_allowed(ip)
}
