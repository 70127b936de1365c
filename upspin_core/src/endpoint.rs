//! Endpoints identify directory, store, and key servers.

use std::fmt;
use std::str::FromStr;

use crate::errors::{Error, Result};

/// How to reach a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum Transport {
    /// No server assigned; every operation fails.
    Unassigned,
    /// An in-memory server inside this process, keyed by netaddr.
    InProcess,
    /// A server reached over the network.
    Remote,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Unassigned => "unassigned",
            Transport::InProcess => "inprocess",
            Transport::Remote => "remote",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unassigned" | "" => Ok(Transport::Unassigned),
            "inprocess" => Ok(Transport::InProcess),
            "remote" => Ok(Transport::Remote),
            other => Err(Error::invalid(format!("unknown transport {other:?}"))),
        }
    }
}

/// The address of one server: a transport plus a transport-specific
/// network address. Written as `transport,netaddr`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub transport: Transport,
    pub net_addr: String,
}

impl Endpoint {
    pub fn unassigned() -> Self {
        Endpoint {
            transport: Transport::Unassigned,
            net_addr: String::new(),
        }
    }

    pub fn inprocess(net_addr: impl Into<String>) -> Self {
        Endpoint {
            transport: Transport::InProcess,
            net_addr: net_addr.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.net_addr.is_empty() {
            write!(f, "{}", self.transport)
        } else {
            write!(f, "{},{}", self.transport, self.net_addr)
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (transport, addr) = match s.find(',') {
            Some(comma) => (&s[..comma], &s[comma + 1..]),
            None => (s, ""),
        };
        let transport: Transport = transport.parse()?;
        if transport == Transport::Remote && addr.is_empty() {
            return Err(Error::invalid("remote endpoint requires a network address"));
        }
        Ok(Endpoint {
            transport,
            net_addr: addr.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for s in ["inprocess,main", "remote,dir.example.com:443", "unassigned"] {
            let ep: Endpoint = s.parse().unwrap();
            assert_eq!(ep.to_string(), s);
        }
    }

    #[test]
    fn remote_requires_addr() {
        assert!("remote".parse::<Endpoint>().is_err());
        assert!("teleport,x".parse::<Endpoint>().is_err());
    }
}
