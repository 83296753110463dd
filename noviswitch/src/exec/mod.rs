pub mod ssh;

use std::process::Stdio;
use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;

/// Runs short lived commands (`ip l2tp`, `ovs-vsctl`, `ovs-ofctl`) on the host running the
/// emulator. Callers treat any output from a configuration command as a failure, like the tools
/// themselves do, so the output of stdout and stderr is returned together.
#[async_trait]
pub trait LocalExecutor: Send + Sync {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String>;

    /// Run a command whose output is of no interest, stderr included
    async fn run_silent(&self, cmd: Vec<String>) -> anyhow::Result<()> {
        self.run(cmd).await.map(|_| ())
    }
}

/// `LocalExecutor` backed by sub processes
#[derive(Debug, Clone, Default)]
pub struct SubprocessExecutor {
    pub sudo: bool,
}

impl SubprocessExecutor {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }

    fn command(&self, cmd: &[String]) -> anyhow::Result<Command> {
        let (program, args) = if self.sudo {
            ("sudo", cmd)
        } else {
            let (first, rest) = cmd.split_first().context("running an empty local command")?;
            (first.as_str(), rest)
        };
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        Ok(command)
    }
}

#[async_trait]
impl LocalExecutor for SubprocessExecutor {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        if cmd.is_empty() {
            bail!("running an empty local command");
        }
        tracing::debug!("running local command: {}", cmd.join(" "));
        let sub_process = self.command(&cmd)?
            .output()
            .await
            .with_context(|| format!("spawning {}", cmd.join(" ")))?;
        let mut output = String::from_utf8_lossy(&sub_process.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&sub_process.stderr));
        Ok(output)
    }

    async fn run_silent(&self, cmd: Vec<String>) -> anyhow::Result<()> {
        tracing::debug!("running local command: {}", cmd.join(" "));
        self.command(&cmd)?
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("spawning {}", cmd.join(" ")))?;
        Ok(())
    }
}
