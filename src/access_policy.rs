//! Address allow-list for outbound web-service calls
//!
//! When an allow-list is configured, every WSI URL is checked before the request is made:
//! the host is resolved and every address it resolves to must fall inside one of the
//! allowed ranges. A host that resolves to nothing usable is rejected as well.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::BootstrapError;

/// An inclusive address range, written as `addr/prefix`, `first-last` or a single address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum AllowListRule {
    V4 { first: u32, last: u32 },
    V6 { first: u128, last: u128 },
}

impl AllowListRule {
    pub fn contains(&self, address: IpAddr) -> bool {
        match (self, address.to_canonical()) {
            (AllowListRule::V4 { first, last }, IpAddr::V4(v4)) => {
                (*first..=*last).contains(&u32::from(v4))
            }
            (AllowListRule::V6 { first, last }, IpAddr::V6(v6)) => {
                (*first..=*last).contains(&u128::from(v6))
            }
            _ => false,
        }
    }

    fn from_cidr(network: IpAddr, prefix: u8) -> Result<Self, String> {
        match network {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(format!("prefix /{} is too long for IPv4", prefix));
                }
                let host_bits = u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
                let first = u32::from(v4) & !host_bits;
                Ok(AllowListRule::V4 {
                    first,
                    last: first | host_bits,
                })
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(format!("prefix /{} is too long for IPv6", prefix));
                }
                let host_bits = u128::MAX.checked_shr(u32::from(prefix)).unwrap_or(0);
                let first = u128::from(v6) & !host_bits;
                Ok(AllowListRule::V6 {
                    first,
                    last: first | host_bits,
                })
            }
        }
    }

    fn from_range(first: IpAddr, last: IpAddr) -> Result<Self, String> {
        match (first, last) {
            (IpAddr::V4(a), IpAddr::V4(b)) if u32::from(a) <= u32::from(b) => {
                Ok(AllowListRule::V4 {
                    first: a.into(),
                    last: b.into(),
                })
            }
            (IpAddr::V6(a), IpAddr::V6(b)) if u128::from(a) <= u128::from(b) => {
                Ok(AllowListRule::V6 {
                    first: a.into(),
                    last: b.into(),
                })
            }
            _ => Err(format!("{} - {} is not an ascending range of one family", first, last)),
        }
    }
}

impl FromStr for AllowListRule {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let parse_addr = |s: &str| {
            s.trim()
                .parse::<IpAddr>()
                .map_err(|_| format!("'{}' is not an IP address", s.trim()))
        };

        if let Some((network, prefix)) = text.split_once('/') {
            let prefix = prefix
                .trim()
                .parse::<u8>()
                .map_err(|_| format!("invalid prefix length in '{}'", text))?;
            Self::from_cidr(parse_addr(network)?, prefix)
        } else if let Some((first, last)) = text.split_once('-') {
            Self::from_range(parse_addr(first)?, parse_addr(last)?)
        } else {
            let address = parse_addr(text)?;
            Self::from_range(address, address)
        }
    }
}

impl TryFrom<String> for AllowListRule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for AllowListRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowListRule::V4 { first, last } => {
                write!(f, "{}-{}", Ipv4Addr::from(*first), Ipv4Addr::from(*last))
            }
            AllowListRule::V6 { first, last } => {
                write!(f, "{}-{}", Ipv6Addr::from(*first), Ipv6Addr::from(*last))
            }
        }
    }
}

/// Host name resolution seam.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolves through the operating system's resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Ok(literal) = host.parse::<IpAddr>() {
            return Ok(vec![literal]);
        }
        Ok((host, 0u16).to_socket_addrs()?.map(|sa| sa.ip()).collect())
    }
}

#[derive(Clone)]
pub struct AccessPolicy {
    rules: Vec<AllowListRule>,
    resolver: Arc<dyn Resolver>,
}

impl AccessPolicy {
    /// A policy that permits every URL.
    pub fn unrestricted() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(rules: Vec<AllowListRule>) -> Self {
        Self {
            rules,
            resolver: Arc::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn is_restricted(&self) -> bool {
        !self.rules.is_empty()
    }

    pub fn rules(&self) -> &[AllowListRule] {
        &self.rules
    }

    /// Verify that `url` targets an allowed server. A no-op without an allow-list.
    pub fn check(&self, url: &str) -> Result<(), BootstrapError> {
        if !self.is_restricted() {
            return Ok(());
        }

        let host = extract_host(url).ok_or_else(|| BootstrapError::InvalidUrl {
            url: url.to_string(),
        })?;

        let addresses = self
            .resolver
            .resolve(host)
            .map_err(|e| BootstrapError::Unresolvable {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        if addresses.is_empty() {
            return Err(BootstrapError::Unresolvable {
                host: host.to_string(),
                reason: "no addresses returned".to_string(),
            });
        }

        for address in addresses {
            if !self.rules.iter().any(|rule| rule.contains(address)) {
                return Err(BootstrapError::AccessDenied {
                    host: host.to_string(),
                    address,
                });
            }
            debug!(host, %address, "WSI address permitted by allow-list");
        }
        Ok(())
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Host portion of `scheme://[user@]host[:port]/...`, without brackets or port.
pub fn extract_host(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);

    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split_once(']')?.0
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    (!host.is_empty()).then_some(host)
}
