use std::fmt;
use std::fmt::Formatter;
use std::str::FromStr;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

pub const LOOPBACK_IP: &str = "127.0.0.1";

/// An OpenFlow controller a switch should connect to.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ControllerEndpoint {
    pub ip: String,
    pub port: u16,
}

impl ControllerEndpoint {
    pub fn new(ip: &str, port: u16) -> Self {
        Self { ip: ip.to_string(), port }
    }

    /// A controller on loopback is not reachable from the physical switch, use the local ip instead
    pub fn reachable_from_switch(&self, local_ip: &str) -> Self {
        if self.ip == LOOPBACK_IP {
            Self::new(local_ip, self.port)
        } else {
            self.clone()
        }
    }
}

/// Parses the `tcp:<ip>:<port>` form used by `ovs-vsctl set-controller`
impl FromStr for ControllerEndpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (ip, port) = match parts.as_slice() {
            [_proto, ip, port] => (*ip, *port),
            [ip, port] => (*ip, *port),
            _ => bail!("controller {s} is not in the form tcp:<ip>:<port>"),
        };
        let port = port.parse().with_context(|| format!("parsing port of controller {s}"))?;
        Ok(Self::new(ip, port))
    }
}

impl fmt::Display for ControllerEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "tcp:{}:{}", self.ip, self.port)
    }
}
