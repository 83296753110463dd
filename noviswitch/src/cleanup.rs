use anyhow::bail;
use noviswitch_schemas::settings::InventoryEntry;
use crate::common::DriverCommon;
use crate::error::DriverError;
use crate::exec::ssh::CommandExecutor;
use crate::is_device_error;
use crate::switch::NoviSwitch;

/// Leaves a physical switch without controllers and flows
pub const CLEANUP_COMMANDS: [&str; 2] = [
    "del config controller controllergroup all controllerid all",
    "del config flow tableid all",
];

/// Checks and resets the whole inventory, outside of the lifecycle of any one switch. Every
/// switch is attempted, failures are logged per switch.
pub struct CleanupCoordinator {
    common: DriverCommon,
}

impl CleanupCoordinator {
    pub fn new(common: DriverCommon) -> Self {
        Self { common }
    }

    fn executor(&self, entry: &InventoryEntry) -> CommandExecutor {
        CommandExecutor::new(entry, self.common.sessions.session(entry))
    }

    /// Make sure every physical switch accepts commands before anything is bound
    pub async fn setup(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();
        for entry in self.common.pool.inventory().entries() {
            tracing::info!("checking switch {}", entry.name);
            // any harmless command shows a switch stuck with `System error: write failure`
            let cmd = CLEANUP_COMMANDS[0];
            match self.executor(entry).run(cmd).await {
                Ok(output) if is_device_error(&output) => {
                    let err = DriverError::DeviceReportedError {
                        switch: entry.name.clone(),
                        command: cmd.to_string(),
                        output: output.trim().to_string(),
                    };
                    tracing::error!("ERROR: Failed to check switch {}: {err}", entry.name);
                    errors.push(err.to_string());
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!("ERROR: Failed to check switch {}: {err:#}", entry.name);
                    errors.push(format!("{err:#}"));
                }
            }
        }
        if !errors.is_empty() {
            bail!("Found errors when checking for Noviflow switches:\n{}", errors.join("\n"));
        }
        Ok(())
    }

    /// Send the reset commands to one switch over a fresh session
    pub async fn reset_switch(&self, entry: &InventoryEntry) -> anyhow::Result<()> {
        let mut executor = self.executor(entry);
        for cmd in CLEANUP_COMMANDS {
            let output = executor.run(cmd).await?;
            if is_device_error(&output) {
                tracing::error!("ERROR: Failed to cleanup switch {}: {}", entry.name, output.trim());
            }
        }
        Ok(())
    }

    /// Delete every local L2TP tunnel, then reset every switch of the inventory
    pub async fn cleanup(&self) -> anyhow::Result<()> {
        tracing::info!("*** Cleaning up L2TP tunnels");
        match self.common.wiring.remove_all_tunnels().await {
            Ok(ids) => tracing::debug!("removed l2tp tunnels {ids:?}"),
            Err(err) => tracing::error!("failed to remove l2tp tunnels: {err:#}"),
        }
        for entry in self.common.pool.inventory().entries() {
            tracing::info!("cleanup switch - {} ({})", entry.name, entry.ip);
            if let Err(err) = self.reset_switch(entry).await {
                tracing::error!("failed to cleanup switch {}: {err:#}", entry.name);
            }
        }
        Ok(())
    }

    /// Reset the physical switches of the given switches, each over its own fresh session
    pub async fn batch_shutdown(&self, switches: Vec<NoviSwitch>) -> Vec<NoviSwitch> {
        for switch in &switches {
            tracing::info!("batch shutdown switches - {} ({})", switch.name(), switch.physical().name);
            if let Err(err) = self.reset_switch(switch.physical()).await {
                tracing::error!("failed to shut down switch {}: {err:#}", switch.physical().name);
            }
        }
        switches
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{test_common, FakeSessions, FakeShell};
    use super::*;

    #[tokio::test]
    async fn test_setup_checks_every_switch() -> anyhow::Result<()> {
        let sessions = FakeSessions::default();
        let coordinator = CleanupCoordinator::new(test_common(3, &sessions, &FakeShell::default()));
        coordinator.setup().await?;
        for name in ["sw1", "sw2", "sw3"] {
            assert_eq!(sessions.device(name).commands(), vec![CLEANUP_COMMANDS[0]]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_setup_collects_all_errors() {
        let sessions = FakeSessions::default();
        let coordinator = CleanupCoordinator::new(test_common(3, &sessions, &FakeShell::default()));
        sessions.device("sw1").reply("del config controller", "System error: write failure");
        let sw2 = sessions.device("sw2");
        sw2.set_alive(false);
        sw2.refuse_connections(true);
        let err = coordinator.setup().await.unwrap_err().to_string();
        assert!(err.contains("sw1"));
        assert!(err.contains("could not reach switch sw2"));
        // the failures did not stop the check of the last switch
        assert_eq!(sessions.device("sw3").commands().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_tunnels_and_resets_all() -> anyhow::Result<()> {
        let sessions = FakeSessions::default();
        let shell = FakeShell::default();
        let coordinator = CleanupCoordinator::new(test_common(2, &sessions, &shell));
        shell.reply("ip l2tp show tunnel", "Tunnel 4, encap UDP\n  Peer tunnel 4\n");
        let sw1 = sessions.device("sw1");
        sw1.set_alive(false);
        sw1.refuse_connections(true);
        coordinator.cleanup().await?;
        assert_eq!(shell.commands(), vec!["ip l2tp show tunnel", "ip l2tp del tunnel tunnel_id 4"]);
        assert!(sw1.commands().is_empty());
        assert_eq!(sessions.device("sw2").commands(), CLEANUP_COMMANDS.to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_shutdown() -> anyhow::Result<()> {
        let sessions = FakeSessions::default();
        let common = test_common(3, &sessions, &FakeShell::default());
        let coordinator = CleanupCoordinator::new(common.clone());
        let switches = vec![
            NoviSwitch::new("s1", false, common.clone())?,
            NoviSwitch::new("s2", false, common.clone())?,
        ];
        let switches = coordinator.batch_shutdown(switches).await;
        assert_eq!(switches.len(), 2);
        assert_eq!(sessions.device("sw1").commands(), CLEANUP_COMMANDS.to_vec());
        assert_eq!(sessions.device("sw2").commands(), CLEANUP_COMMANDS.to_vec());
        assert!(sessions.device("sw3").commands().is_empty());
        Ok(())
    }
}
