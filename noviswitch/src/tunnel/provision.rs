use crate::error::DriverError;
use crate::exec::ssh::CommandExecutor;
use crate::tunnel::TunnelIds;
use crate::tunnel::verify::{ConfigVerifier, ExpectedL2tpConfig, L2tpConfigVerifier};

/// Attempts at applying and verifying a tunnel before giving up on the port
pub const MAX_PROVISION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// the switch reports the tunnel as configured
    Verified { attempts: usize },
    /// the tunnel could not be verified, the operator has to run the command by hand
    Degraded { command: String },
}

/// Configures the L2TP tunnel of one switch port and reads it back until the switch reports
/// what was asked for.
pub struct TunnelProvisioner {
    verifier: Box<dyn ConfigVerifier>,
}

impl Default for TunnelProvisioner {
    fn default() -> Self {
        Self::new(Box::new(L2tpConfigVerifier))
    }
}

impl TunnelProvisioner {
    pub fn new(verifier: Box<dyn ConfigVerifier>) -> Self {
        Self { verifier }
    }

    pub fn l2tp_command(port: u16, remote_ip: &str, ids: TunnelIds) -> String {
        format!(
            "set config port portno {port} l2tpaddr {remote_ip} localtunnelid {} remotetunnelid {} localsessionid {} remotesessionid {} udpsrc {} udpdst {}",
            ids.local, ids.remote, ids.local, ids.remote, ids.local_udp_port(), ids.remote_udp_port(),
        )
    }

    /// Only a lost session is an error, a tunnel that does not verify is a `Degraded` outcome
    /// so the caller can go on with the other ports.
    pub async fn provision(
        &self,
        executor: &mut CommandExecutor,
        port: u16,
        remote_ip: &str,
        ids: TunnelIds,
    ) -> anyhow::Result<ProvisionOutcome> {
        tracing::info!(
            "setup_link_noviflow switch={} port_num={port} l2tp_tun_id={} remote_tun_id={}",
            executor.switch(), ids.local, ids.remote
        );
        executor.run(&format!("del config port portno {port} l2tpaddr")).await?;
        executor.run(&format!("set config port portno {port} portdown off")).await?;

        let cmd = Self::l2tp_command(port, remote_ip, ids);
        let expected = ExpectedL2tpConfig { remote_ip: remote_ip.to_string(), ids };
        let mut warn_sent = false;
        for attempt in 1..=MAX_PROVISION_ATTEMPTS {
            let result = executor.run(&cmd).await?;
            if !result.trim().is_empty() {
                tracing::warn!("--> WARN: cmd=|{}| -- result=|{}|", cmd, result.trim());
                warn_sent = true;
                continue;
            }
            let port_config = executor.run(&format!("show config port portno {port}")).await?;
            if self.verifier.matches(&port_config, &expected) {
                if warn_sent {
                    tracing::warn!("-->> Now ok! port {port} of {} after {attempt} attempts", executor.switch());
                }
                return Ok(ProvisionOutcome::Verified { attempts: attempt });
            }
            warn_sent = true;
            tracing::warn!(
                "-->> WARN: L2tp tunnel configuration not applied on port {port} of {} (attempt {attempt}/{MAX_PROVISION_ATTEMPTS}). Trying again...",
                executor.switch()
            );
        }
        let err = DriverError::ConfigurationMismatch {
            switch: executor.switch().to_string(),
            port,
            command: cmd.clone(),
        };
        tracing::error!("-->> ERROR: {err}");
        Ok(ProvisionOutcome::Degraded { command: cmd })
    }
}

#[cfg(test)]
mod tests {
    use noviswitch_schemas::settings::InventoryEntry;
    use crate::testing::FakeDevice;
    use crate::tunnel::verify::port_config_output;
    use super::*;

    fn executor(device: &FakeDevice) -> CommandExecutor {
        CommandExecutor::new(&InventoryEntry::new("sw1", "10.0.0.1"), device.connection())
    }

    #[tokio::test]
    async fn test_provision_first_attempt() -> anyhow::Result<()> {
        let device = FakeDevice::new();
        let ids = TunnelIds::symmetric(3);
        device.reply("show config port portno 5", &port_config_output("192.168.0.100", ids));
        let outcome = TunnelProvisioner::default()
            .provision(&mut executor(&device), 5, "192.168.0.100", ids).await?;
        assert_eq!(outcome, ProvisionOutcome::Verified { attempts: 1 });
        assert_eq!(device.commands(), vec![
            "del config port portno 5 l2tpaddr",
            "set config port portno 5 portdown off",
            "set config port portno 5 l2tpaddr 192.168.0.100 localtunnelid 3 remotetunnelid 3 localsessionid 3 remotesessionid 3 udpsrc 17003 udpdst 17003",
            "show config port portno 5",
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn test_provision_verifies_on_third_attempt() -> anyhow::Result<()> {
        let device = FakeDevice::new();
        let ids = TunnelIds::symmetric(2);
        device.reply("show config port portno 1", "Port configuration\n");
        device.reply("show config port portno 1", "Port configuration\n");
        device.reply("show config port portno 1", &port_config_output("10.0.0.2", ids));
        let outcome = TunnelProvisioner::default()
            .provision(&mut executor(&device), 1, "10.0.0.2", ids).await?;
        assert_eq!(outcome, ProvisionOutcome::Verified { attempts: 3 });
        let applies = device.commands().iter()
            .filter(|c| c.contains("l2tpaddr 10.0.0.2"))
            .count();
        assert_eq!(applies, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_provision_gives_up_softly() -> anyhow::Result<()> {
        let device = FakeDevice::new();
        let ids = TunnelIds::symmetric(2);
        // the switch keeps reporting another tunnel
        device.reply("show config port portno 1", &port_config_output("10.0.0.9", ids));
        let outcome = TunnelProvisioner::default()
            .provision(&mut executor(&device), 1, "10.0.0.2", ids).await?;
        assert_eq!(outcome, ProvisionOutcome::Degraded {
            command: TunnelProvisioner::l2tp_command(1, "10.0.0.2", ids),
        });
        let checks = device.commands().iter()
            .filter(|c| c.starts_with("show config port"))
            .count();
        assert_eq!(checks, MAX_PROVISION_ATTEMPTS);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_error_is_retried_without_check() -> anyhow::Result<()> {
        let device = FakeDevice::new();
        let ids = TunnelIds::symmetric(8);
        device.reply("set config port portno 2 l2tpaddr", "System error: write failure");
        device.reply("set config port portno 2 l2tpaddr", "");
        device.reply("show config port portno 2", &port_config_output("10.0.0.3", ids));
        let outcome = TunnelProvisioner::default()
            .provision(&mut executor(&device), 2, "10.0.0.3", ids).await?;
        assert_eq!(outcome, ProvisionOutcome::Verified { attempts: 2 });
        let checks = device.commands().iter()
            .filter(|c| c.starts_with("show config port"))
            .count();
        assert_eq!(checks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_provision_twice_resets_first() -> anyhow::Result<()> {
        let device = FakeDevice::new();
        let ids = TunnelIds::loopback(6, "s1-eth2", "s1-eth1");
        device.reply("show config port portno 4", &port_config_output("10.0.0.1", ids));
        let provisioner = TunnelProvisioner::default();
        let mut executor = executor(&device);
        let first = provisioner.provision(&mut executor, 4, "10.0.0.1", ids).await?;
        let first_commands = device.commands();
        device.clear_commands();
        let second = provisioner.provision(&mut executor, 4, "10.0.0.1", ids).await?;
        assert_eq!(first, ProvisionOutcome::Verified { attempts: 1 });
        assert_eq!(second, first);
        // the same reset and apply sequence every time
        assert_eq!(device.commands(), first_commands);
        assert_eq!(first_commands[0], "del config port portno 4 l2tpaddr");
        Ok(())
    }

    #[tokio::test]
    async fn test_lost_session_is_an_error() {
        let device = FakeDevice::new();
        device.set_alive(false);
        device.refuse_connections(true);
        let res = TunnelProvisioner::default()
            .provision(&mut executor(&device), 1, "10.0.0.2", TunnelIds::symmetric(1)).await;
        assert!(matches!(
            res.unwrap_err().downcast_ref::<DriverError>(),
            Some(DriverError::ConnectionFailure { .. })
        ));
    }
}
