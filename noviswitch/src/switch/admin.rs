use std::time::Duration;
use anyhow::{bail, Context};
use regex::Regex;
use noviswitch_schemas::controller::ControllerEndpoint;
use crate::cleanup::CLEANUP_COMMANDS;
use crate::switch::{port_number, NoviSwitch, OFSERVER_PORT};
use crate::vec_of_strings;

/// Header lines of `ovs-ofctl dump-flows`, not flows
const FLOW_STATS_HEADER: &str = "OFPST_FLOW";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Up,
    Down,
}

/// A single argument holds the whole command line, split it on spaces
fn command_words(args: &[String]) -> Vec<String> {
    match args {
        [single] => single.split_whitespace().map(str::to_string).collect(),
        _ => args.to_vec(),
    }
}

/// The commands the emulator uses to administer its own switches, translated for the physical
/// switch.
impl NoviSwitch {
    /// True when any of the programmed controllers is marked active (`*`) by the switch
    pub async fn connected(&mut self) -> anyhow::Result<bool> {
        let status = self.executor.run("show status controller controllergroup all").await?;
        for controller in &self.controllers {
            let re = Regex::new(&format!(r"\*{}\s+{}\s+", regex::escape(&controller.ip), controller.port))?;
            if re.is_match(&status) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn reset_controller(&mut self) -> anyhow::Result<()> {
        self.device_step("set status controller controllergroup all controllerid all reset").await?;
        Ok(())
    }

    pub async fn config_link_status(&mut self, intfs: &[String], status: LinkStatus) -> anyhow::Result<()> {
        let portdown = match status {
            LinkStatus::Up => "off",
            LinkStatus::Down => "on",
        };
        for intf in intfs {
            let port = port_number(&self.name, intf)?;
            self.device_step(&format!("set config port portno {port} portdown {portdown}")).await?;
        }
        Ok(())
    }

    fn ofserver_target(&self) -> String {
        format!("tcp:{}:{OFSERVER_PORT}", self.novi.ip)
    }

    /// `ovs-ofctl` against the switch's OpenFlow server. A `del-flows` only returns once the
    /// switch reports no flows left, or after the max wait. A single argument is split on spaces.
    pub async fn dpctl(&self, args: &[String]) -> anyhow::Result<String> {
        let args = command_words(args);
        let (cmd, rest) = args.split_first().context("dpctl needs a command")?;
        let target = self.ofserver_target();
        let mut ofctl = vec_of_strings!["ovs-ofctl", cmd, "-O", "OpenFlow13", target];
        ofctl.extend(rest.iter().cloned());
        let result = self.common.local.run(ofctl).await?;
        if cmd != "del-flows" {
            return Ok(result);
        }

        let mut dump = vec_of_strings!["ovs-ofctl", "dump-flows", "-O", "OpenFlow13", target];
        dump.extend(rest.iter().cloned());
        let begin = tokio::time::Instant::now();
        while begin.elapsed() <= self.common.max_wait {
            let flows = self.common.local.run(dump.clone()).await?;
            let remaining: Vec<&str> = flows.lines()
                .filter(|l| !l.contains(FLOW_STATS_HEADER) && !l.trim().is_empty())
                .collect();
            if remaining.is_empty() {
                break;
            }
            tracing::info!("remaining flows for del-flows on {}: {:?}", self.novi.name, remaining);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(result)
    }

    /// Supports `del-controller` and `set-controller <bridge> <tcp:ip:port>...`, a single argument
    /// is split on spaces.
    pub async fn vsctl(&mut self, args: &[String]) -> anyhow::Result<()> {
        let args = command_words(args);
        match args.first().map(String::as_str) {
            Some("del-controller") => {
                self.device_step(CLEANUP_COMMANDS[0]).await?;
                self.controllers.clear();
            }
            Some("set-controller") => {
                let controllers = args.iter().skip(2)
                    .map(|c| c.parse::<ControllerEndpoint>())
                    .collect::<anyhow::Result<Vec<_>>>()?;
                self.program_controllers(&controllers).await?;
            }
            Some(_) => tracing::error!("vsctl command not implemented: {args:?}"),
            None => bail!("vsctl needs a command"),
        }
        Ok(())
    }
}
