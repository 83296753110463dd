pub mod admin;

use anyhow::Context;
use noviswitch_schemas::controller::ControllerEndpoint;
use noviswitch_schemas::settings::InventoryEntry;
use noviswitch_schemas::topology::{InterfaceDefinition, LinkEndpoint};
use crate::cleanup::CLEANUP_COMMANDS;
use crate::common::DriverCommon;
use crate::error::DriverError;
use crate::exec::ssh::CommandExecutor;
use crate::is_device_error;
use crate::tunnel::{LinkIdentity, TunnelIds};
use crate::tunnel::provision::{ProvisionOutcome, TunnelProvisioner};

/// Header line of `show status port portno all`, a switch that does not print it is not usable
const PORT_STATUS_HEADER: &str = "port admin link description";
/// Port the switch listens on for `ovs-ofctl`
pub const OFSERVER_PORT: u16 = 6634;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Allocated,
    Started,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchInterface {
    pub name: String,
    pub port: u16,
    pub ip: Option<String>,
    pub link: Option<LinkEndpoint>,
}

impl SwitchInterface {
    /// Interfaces with an ip are management interfaces, not data ports of the switch
    pub fn is_data_port(&self) -> bool {
        self.ip.is_none()
    }
}

/// The port number of an interface is the number its name ends with, `s1-eth3` is port 3
pub fn port_number(node: &str, intf: &str) -> anyhow::Result<u64, DriverError> {
    let digits_start = intf.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    intf[digits_start..].parse().map_err(|_| DriverError::NoPortNumber {
        node: node.to_string(),
        intf: intf.to_string(),
    })
}

/// Datapath id from the first number in the switch name, `s10` is `000000000000000a`
pub fn default_dpid(name: &str) -> anyhow::Result<u64, DriverError> {
    let digits: String = name.chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().map_err(|_| DriverError::Configuration {
        msg: format!("Unable to derive default datapath ID - please either specify a dpid or use a canonical switch name such as s23 ({name})"),
    })
}

/// A logical switch of the emulated topology, backed by the physical switch it was bound to
/// when it was created. The binding is released when this is dropped.
pub struct NoviSwitch {
    name: String,
    novi: InventoryEntry,
    dpid: Option<u64>,
    common: DriverCommon,
    executor: CommandExecutor,
    provisioner: TunnelProvisioner,
    interfaces: Vec<SwitchInterface>,
    controllers: Vec<ControllerEndpoint>,
    state: SwitchState,
}

impl NoviSwitch {
    /// Binds a physical switch, fails with `PoolExhausted` when none is left. The ssh session is
    /// opened by the first command.
    pub fn new(name: &str, verbose: bool, common: DriverCommon) -> anyhow::Result<Self> {
        let physical = common.pool.bind(name)?;
        let novi = common.pool.inventory().get(&physical)
            .cloned()
            .with_context(|| format!("getting inventory entry of {physical}"))?;
        // names without a number need an explicit dpid before start
        let dpid = default_dpid(name).ok();
        let executor = CommandExecutor::new(&novi, common.sessions.session(&novi)).verbose(verbose);
        tracing::debug!("switch {name} bound to novisw={} ip={}", novi.name, novi.ip);
        Ok(Self {
            name: name.to_string(),
            novi,
            dpid,
            common,
            executor,
            provisioner: TunnelProvisioner::default(),
            interfaces: Vec::new(),
            controllers: Vec::new(),
            state: SwitchState::Allocated,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical switch this logical switch is bound to
    pub fn physical(&self) -> &InventoryEntry {
        &self.novi
    }

    pub fn dpid(&self) -> Option<String> {
        self.dpid.map(|dpid| format!("{dpid:016x}"))
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn controllers(&self) -> &[ControllerEndpoint] {
        &self.controllers
    }

    pub fn interfaces(&self) -> &[SwitchInterface] {
        &self.interfaces
    }

    /// Accepts `00:00:..:01` or plain hex
    pub fn set_dpid(&mut self, dpid: &str) -> anyhow::Result<()> {
        let hex = dpid.replace(':', "");
        self.dpid = Some(u64::from_str_radix(&hex, 16)
            .with_context(|| format!("parsing dpid {dpid} of {}", self.name))?);
        Ok(())
    }

    pub fn add_interface(&mut self, intf: InterfaceDefinition) -> anyhow::Result<(), DriverError> {
        let port = port_number(&self.name, &intf.name)?;
        let max = self.common.max_ifaces;
        if port > u64::from(max) {
            return Err(DriverError::InvalidPort {
                node: self.name.clone(),
                intf: intf.name,
                port,
                max,
            });
        }
        self.interfaces.push(SwitchInterface {
            name: intf.name,
            port: port as u16,
            ip: intf.ip,
            link: intf.link,
        });
        Ok(())
    }

    /// Run a command whose answer only matters when the switch reports an error, which is logged
    async fn device_step(&mut self, cmd: &str) -> anyhow::Result<String> {
        let output = self.executor.run(cmd).await?;
        if is_device_error(&output) {
            let err = DriverError::DeviceReportedError {
                switch: self.novi.name.clone(),
                command: cmd.to_string(),
                output: output.trim().to_string(),
            };
            tracing::error!("{err}");
        }
        Ok(output)
    }

    /// Bring the switch to a known state: no tunnels, no controllers, no flows
    async fn prepare(&mut self) -> anyhow::Result<()> {
        self.common.wiring.ensure_kernel_module().await?;
        let cmd = "show status port portno all";
        let status = self.executor.run(cmd).await?;
        if !status.contains(PORT_STATUS_HEADER) {
            return Err(DriverError::DeviceReportedError {
                switch: self.novi.name.clone(),
                command: cmd.to_string(),
                output: status.trim().to_string(),
            }.into());
        }
        for port in 1..=self.common.max_ifaces {
            self.device_step(&format!("del config port portno {port} l2tpaddr")).await?;
        }
        for cmd in CLEANUP_COMMANDS {
            self.device_step(cmd).await?;
        }
        Ok(())
    }

    pub async fn start(&mut self, controllers: &[ControllerEndpoint]) -> anyhow::Result<()> {
        tracing::info!(
            "start switch {} ({} - {}) controllers={:?}",
            self.name, self.novi.name, self.novi.ip,
            controllers.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        let dpid = match self.dpid {
            Some(dpid) => dpid,
            None => default_dpid(&self.name)?,
        };
        if let Err(err) = self.prepare().await {
            tracing::error!("failed to prepare switch {} for {}: {err:#}", self.novi.name, self.name);
            return Err(err);
        }

        for idx in 0..self.interfaces.len() {
            if self.interfaces[idx].link.is_none() {
                continue;
            }
            if let Err(err) = self.setup_interface(idx).await {
                tracing::error!(
                    "failed to set up {} on switch {}: {err:#}",
                    self.interfaces[idx].name, self.novi.name
                );
            }
        }

        self.device_step(&format!("set config switch dpid {dpid:#x}")).await?;
        self.program_controllers(controllers).await?;
        self.device_step("del config ofserver").await?;
        self.device_step(&format!("set config ofserver port {OFSERVER_PORT}")).await?;
        let local_ip = self.common.local_ip.clone();
        self.device_step(&format!("set config ofclient ipaddr {local_ip}")).await?;
        self.state = SwitchState::Started;
        Ok(())
    }

    /// Build the tunnel of one interface towards the far end of its link. A virtual far end
    /// also gets its side of the tunnel wired on this host.
    async fn setup_interface(&mut self, idx: usize) -> anyhow::Result<ProvisionOutcome> {
        let intf = self.interfaces[idx].clone();
        let peer = intf.link.with_context(|| format!("{} has no link", intf.name))?;
        tracing::info!("novi_setup_intf {}", intf.name);
        let link = LinkIdentity::from_endpoints(&self.name, &intf.name, &peer.node, &peer.intf);
        let tunnel_id = self.common.tunnels.resolve(&link);

        let (remote_ip, ids) = match self.common.pool.lookup(&peer.node) {
            Some(peer_switch) if peer_switch.ip == self.novi.ip => {
                (peer_switch.ip, TunnelIds::loopback(tunnel_id, &intf.name, &peer.intf))
            }
            Some(peer_switch) => (peer_switch.ip, TunnelIds::symmetric(tunnel_id)),
            None => {
                self.common.wiring.wire_local(&self.novi.ip, &intf.name, tunnel_id).await?;
                (self.common.local_ip.clone(), TunnelIds::symmetric(tunnel_id))
            }
        };
        self.provisioner.provision(&mut self.executor, intf.port, &remote_ip, ids).await
    }

    /// Replace the controllers of the switch. Controllers on loopback are reached through the
    /// local ip.
    async fn program_controllers(&mut self, controllers: &[ControllerEndpoint]) -> anyhow::Result<()> {
        self.device_step(CLEANUP_COMMANDS[0]).await?;
        self.controllers.clear();
        for (i, controller) in controllers.iter().enumerate() {
            let controller = controller.reachable_from_switch(&self.common.local_ip);
            let cmd = format!(
                "set config controller controllergroup c{} controllerid 1 priority 1 ipaddr {} port {} security none version of13",
                i + 1, controller.ip, controller.port
            );
            self.device_step(&cmd).await?;
            self.controllers.push(controller);
        }
        Ok(())
    }

    /// Remove the tunnels of the data ports, then the controllers and flows. Interfaces stay
    /// attached on the physical switch whatever `delete_intfs` says. Every command is sent even
    /// when an earlier one failed, the first failure is returned at the end.
    pub async fn stop(&mut self, delete_intfs: bool) -> anyhow::Result<()> {
        tracing::info!("stop {} delete_intfs={delete_intfs}", self.novi.name);
        let mut commands: Vec<String> = self.interfaces.iter()
            .filter(|i| i.is_data_port())
            .map(|i| format!("del config port portno {} l2tpaddr", i.port))
            .collect();
        commands.extend(CLEANUP_COMMANDS.iter().map(ToString::to_string));

        let mut first_err = None;
        for cmd in &commands {
            if let Err(err) = self.device_step(cmd).await {
                tracing::error!("failed to send `{cmd}` to {}: {err:#}", self.novi.name);
                first_err.get_or_insert(err);
            }
        }
        self.controllers.clear();
        self.state = SwitchState::Stopped;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Set up the tunnel of a single interface, e.g. after a link was added
    pub async fn attach(&mut self, intf_name: &str) -> anyhow::Result<Option<ProvisionOutcome>> {
        let Some(idx) = self.interfaces.iter().position(|i| i.name == intf_name) else {
            return Err(DriverError::UnknownInterface {
                node: self.name.clone(),
                intf: intf_name.to_string(),
            }.into());
        };
        if self.interfaces[idx].link.is_none() {
            tracing::warn!("attached {intf_name} into {}/{} has no link, nothing to do", self.name, self.novi.ip);
            return Ok(None);
        }
        self.setup_interface(idx).await.map(Some)
    }

    pub fn detach(&self, intf_name: &str) {
        tracing::info!("detach {intf_name} from {} (not-implemented)", self.novi.name);
    }
}

impl Drop for NoviSwitch {
    fn drop(&mut self) {
        self.common.pool.release(&self.name);
    }
}
