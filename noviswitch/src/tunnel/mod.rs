use std::collections::HashMap;
use std::fmt;
use std::fmt::Formatter;
use std::sync::{Mutex, PoisonError};

pub mod verify;
pub mod provision;

/// L2TP udp ports are this plus the tunnel id
pub const L2TP_UDP_PORT_BASE: u32 = 17000;
/// Added to the tunnel id of one side of a link that starts and ends on the same physical switch
pub const LOOPBACK_ID_OFFSET: u32 = 1000;

/// The name of a link between two `device:interface` endpoints. The endpoints are sorted so both
/// ends of a link produce the same name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkIdentity(String);

impl LinkIdentity {
    pub fn new(a: &str, b: &str) -> Self {
        let mut ends = [a, b];
        ends.sort();
        Self(ends.join("<->"))
    }

    pub fn from_endpoints(node: &str, intf: &str, peer_node: &str, peer_intf: &str) -> Self {
        Self::new(&format!("{node}:{intf}"), &format!("{peer_node}:{peer_intf}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LinkIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct RegistryState {
    tunnels: HashMap<LinkIdentity, u32>,
    next_id: u32,
}

/// Hands out one tunnel id per link for the lifetime of the process. Ids are never reused, so
/// provisioning the same link again always yields the same id and two configured tunnels can
/// never collide.
#[derive(Debug)]
pub struct TunnelIdRegistry {
    state: Mutex<RegistryState>,
}

impl Default for TunnelIdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TunnelIdRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                tunnels: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn resolve(&self, link: &LinkIdentity) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.tunnels.get(link) {
            return *id;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.tunnels.insert(link.clone(), id);
        tracing::debug!("assigned l2tp tunnel id {id} to link {link}");
        id
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tunnel and session ids as seen from one end of a tunnel, the session ids mirror the tunnel ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelIds {
    pub local: u32,
    pub remote: u32,
}

impl TunnelIds {
    pub fn symmetric(id: u32) -> Self {
        Self { local: id, remote: id }
    }

    /// Both ends of the link are ports of the same physical switch, the ends must not share ids.
    /// The end with the smaller interface name keeps the registry id.
    pub fn loopback(base: u32, intf: &str, peer_intf: &str) -> Self {
        if intf < peer_intf {
            Self { local: base, remote: base + LOOPBACK_ID_OFFSET }
        } else {
            Self { local: base + LOOPBACK_ID_OFFSET, remote: base }
        }
    }

    pub fn local_udp_port(&self) -> u32 {
        L2TP_UDP_PORT_BASE + self.local
    }

    pub fn remote_udp_port(&self) -> u32 {
        L2TP_UDP_PORT_BASE + self.remote
    }
}
