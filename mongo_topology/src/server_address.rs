use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::{Host, Url};

pub const DEFAULT_PORT: u16 = 27017;

/// Canonical `host:port` identity of a server. Hosts are lower-cased and the default port is
/// filled in, so two spellings of the same member compare equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_lowercase(),
            port,
        }
    }

    /// Parses `host`, `host:port`, `[v6]` or `[v6]:port`.
    pub fn parse(address: &str) -> anyhow::Result<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(anyhow::anyhow!("Server address is empty"));
        }
        if trimmed.contains('/') || trimmed.contains('@') || trimmed.contains('?') {
            return Err(anyhow::anyhow!(
                "Server address `{}` must be a bare host[:port]",
                trimmed
            ));
        }

        // Lean on the url crate for host validation, including bracketed IPv6 literals.
        let url = Url::parse(format!("mongodb://{}", trimmed).as_str())
            .map_err(|e| anyhow::anyhow!("Invalid server address `{}`. Caused by: {}", trimmed, e))?;

        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_lowercase(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => format!("[{}]", ip),
            None => return Err(anyhow::anyhow!("Server address `{}` has no host", trimmed)),
        };
        if host.is_empty() {
            return Err(anyhow::anyhow!("Server address `{}` has no host", trimmed));
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for ServerAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerAddress::parse(s)
    }
}

impl Serialize for ServerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ServerAddress::parse(raw.as_str()).map_err(serde::de::Error::custom)
    }
}
