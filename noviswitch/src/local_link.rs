use std::sync::Arc;
use regex::Regex;
use tokio::sync::Mutex;
use crate::error::DriverError;
use crate::exec::LocalExecutor;
use crate::tunnel::L2TP_UDP_PORT_BASE;
use crate::vec_of_strings;

/// OVS bridge on the emulator host that joins virtual interfaces to their tunnel devices
pub const LOCAL_BRIDGE: &str = "noviswitch";

const TUNNEL_EXISTS: &str = "RTNETLINK answers: File exists";

/// Builds the Linux side of links whose far end is a plain virtual port: an L2TP tunnel device
/// towards the physical switch, bridged to the virtual interface with two static flows.
pub struct LocalLinkWiring {
    executor: Arc<dyn LocalExecutor>,
    bridge: String,
    // true once the bridge is known to exist, held across check-then-create
    bridge_ready: Mutex<bool>,
}

impl LocalLinkWiring {
    pub fn new(executor: Arc<dyn LocalExecutor>) -> Self {
        Self {
            executor,
            bridge: LOCAL_BRIDGE.to_string(),
            bridge_ready: Mutex::new(false),
        }
    }

    pub fn tunnel_device(tunnel_id: u32) -> String {
        format!("tun{tunnel_id}")
    }

    /// Run a configuration command, these print nothing when they succeed
    async fn configure(&self, cmd: Vec<String>) -> anyhow::Result<Option<DriverError>> {
        let output = self.executor.run(cmd.clone()).await?;
        if output.trim().is_empty() {
            return Ok(None);
        }
        let err = DriverError::LocalToolingFailure {
            command: cmd.join(" "),
            output: output.trim().to_string(),
        };
        tracing::error!("--> ERROR: {err}");
        Ok(Some(err))
    }

    /// Only a command that could not be spawned is an `Err`, failing tools are logged and the
    /// remaining steps still run.
    pub async fn wire_local(&self, remote_ip: &str, intf: &str, tunnel_id: u32) -> anyhow::Result<()> {
        let tun = Self::tunnel_device(tunnel_id);
        let udp_port = L2TP_UDP_PORT_BASE + tunnel_id;
        tracing::info!("wiring local interface {intf} to {remote_ip} through {tun}");

        let add_tunnel = vec_of_strings![
            "ip", "l2tp", "add", "tunnel",
            "tunnel_id", tunnel_id, "peer_tunnel_id", tunnel_id,
            "remote", remote_ip, "local", "0.0.0.0",
            "encap", "udp", "udp_dport", udp_port, "udp_sport", udp_port
        ];
        if let Some(DriverError::LocalToolingFailure { output, .. }) = self.configure(add_tunnel.clone()).await? {
            if output.contains(TUNNEL_EXISTS) {
                tracing::error!("--> trying to recover... delete and create again");
                self.executor.run_silent(vec_of_strings!["ip", "l2tp", "del", "tunnel", "tunnel_id", tunnel_id]).await?;
                if let Some(err) = self.configure(add_tunnel).await? {
                    tracing::error!("--> ERROR again: {err}");
                }
            }
        }
        self.configure(vec_of_strings![
            "ip", "l2tp", "add", "session", "name", tun,
            "tunnel_id", tunnel_id, "session_id", tunnel_id, "peer_session_id", tunnel_id
        ]).await?;
        self.configure(vec_of_strings!["ip", "link", "set", "up", tun]).await?;

        self.ensure_bridge().await?;
        self.configure(vec_of_strings!["ovs-vsctl", "add-port", self.bridge, tun]).await?;
        self.configure(vec_of_strings!["ovs-vsctl", "add-port", self.bridge, intf]).await?;
        for (from, to) in [(tun.as_str(), intf), (intf, tun.as_str())] {
            self.configure(vec_of_strings![
                "ovs-ofctl", "add-flow", self.bridge,
                format!("in_port=\"{from}\",actions=output:\"{to}\"")
            ]).await?;
        }
        Ok(())
    }

    /// Create the bridge if it is missing. An existing bridge of that name is used as is.
    async fn ensure_bridge(&self) -> anyhow::Result<()> {
        let mut ready = self.bridge_ready.lock().await;
        if *ready {
            return Ok(());
        }
        let bridges = self.executor.run(vec_of_strings!["ovs-vsctl", "list-br"]).await?;
        if !bridges.lines().any(|b| b.trim() == self.bridge) {
            tracing::info!("creating ovs bridge {}", self.bridge);
            if self.configure(vec_of_strings!["ovs-vsctl", "add-br", self.bridge]).await?.is_some() {
                return Ok(());
            }
        }
        *ready = true;
        Ok(())
    }

    /// Load `l2tp_eth` unless it already is
    pub async fn ensure_kernel_module(&self) -> anyhow::Result<()> {
        let modules = self.executor.run(vec_of_strings!["lsmod"]).await?;
        if !modules.contains("l2tp_eth") {
            tracing::info!("loading kernel module l2tp_eth");
            self.configure(vec_of_strings!["modprobe", "l2tp_eth"]).await?;
        }
        Ok(())
    }

    /// Delete every L2TP tunnel on this host, returns the deleted tunnel ids
    pub async fn remove_all_tunnels(&self) -> anyhow::Result<Vec<u32>> {
        let output = self.executor.run(vec_of_strings!["ip", "l2tp", "show", "tunnel"]).await?;
        let ids = parse_tunnel_ids(&output)?;
        for id in &ids {
            self.executor.run_silent(vec_of_strings!["ip", "l2tp", "del", "tunnel", "tunnel_id", id]).await?;
        }
        Ok(ids)
    }
}

/// Tunnel ids from `ip l2tp show tunnel`, one `Tunnel <id>, encap UDP` header per tunnel
pub fn parse_tunnel_ids(output: &str) -> anyhow::Result<Vec<u32>> {
    let re = Regex::new(r"Tunnel (\d+)")?;
    Ok(re.captures_iter(output)
        .filter_map(|c| c[1].parse().ok())
        .collect())
}
