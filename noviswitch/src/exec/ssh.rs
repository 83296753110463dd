use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use anyhow::bail;
use async_trait::async_trait;
use tokio::process::Command;
use noviswitch_schemas::settings::InventoryEntry;
use crate::error::DriverError;
use crate::vec_of_strings;

/// A command session to one physical switch.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn is_alive(&self) -> bool;
    async fn reconnect(&mut self) -> anyhow::Result<()>;
    /// Send one command to the switch CLI and return its text output
    async fn exec(&mut self, cmd: &str) -> anyhow::Result<String>;
}

/// Creates unconnected sessions, `CommandExecutor` connects them on first use.
pub trait SessionFactory: Send + Sync {
    fn session(&self, entry: &InventoryEntry) -> Box<dyn Connection>;
}

#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub username: String,
    pub password: String,
}

static SESSION_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The switches only accept password logins, so this keeps an OpenSSH master connection open per
/// session (logged in once through `sshpass`) and sends every command over its control socket.
/// Every session has its own socket, the master is closed when the session is dropped.
pub struct OpenSshConnection {
    target: String,
    port: u16,
    password: String,
    control_path: PathBuf,
    master_started: bool,
}

impl OpenSshConnection {
    pub fn new(entry: &InventoryEntry, credentials: &SshCredentials) -> Self {
        let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        let control_path = std::env::temp_dir()
            .join(format!("noviswitch-{}-{}-{session}.ctl", entry.name, std::process::id()));
        Self {
            target: format!("{}@{}", credentials.username, entry.ip),
            port: entry.ssh_port,
            password: credentials.password.clone(),
            control_path,
            master_started: false,
        }
    }

    fn exit_master_args(&self) -> Vec<String> {
        let mut args = self.ssh_opts();
        args.extend(vec_of_strings!["-O", "exit", self.target]);
        args
    }

    fn ssh_opts(&self) -> Vec<String> {
        // TODO - the switches get re-imaged between test runs so host keys are not pinned yet
        vec_of_strings![
            "-o", format!("ControlPath={}", self.control_path.display()),
            "-o", "StrictHostKeyChecking=no",
            "-o", "UserKnownHostsFile=/dev/null",
            "-o", "LogLevel=ERROR",
            "-p", self.port
        ]
    }

    fn master_opts(&self) -> Vec<String> {
        vec_of_strings![
            "-o", "ControlMaster=yes",
            "-o", "ControlPersist=10m",
            "-o", "NumberOfPasswordPrompts=1",
            "-f", "-N"
        ]
    }
}

#[async_trait]
impl Connection for OpenSshConnection {
    async fn is_alive(&self) -> bool {
        Command::new("ssh")
            .args(self.ssh_opts())
            .args(["-O", "check", self.target.as_str()])
            .output()
            .await
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    async fn reconnect(&mut self) -> anyhow::Result<()> {
        // a stale master may still hold the socket
        let _ = Command::new("ssh")
            .args(self.exit_master_args())
            .output()
            .await;
        let sub_process = Command::new("sshpass")
            .arg("-e")
            .env("SSHPASS", &self.password)
            .arg("ssh")
            .args(self.ssh_opts())
            .args(self.master_opts())
            .arg(&self.target)
            .output()
            .await?;
        if !sub_process.status.success() {
            let std_err = std::str::from_utf8(&sub_process.stderr)?;
            bail!("{}", std_err.trim());
        }
        self.master_started = true;
        Ok(())
    }

    async fn exec(&mut self, cmd: &str) -> anyhow::Result<String> {
        let sub_process = Command::new("ssh")
            .args(self.ssh_opts())
            .arg(&self.target)
            .arg(cmd)
            .output()
            .await?;
        // 255 is ssh itself failing, anything else is the switch CLI answering
        if sub_process.status.code() == Some(255) {
            let std_err = std::str::from_utf8(&sub_process.stderr)?;
            bail!("{}", std_err.trim());
        }
        Ok(String::from_utf8_lossy(&sub_process.stdout).into_owned())
    }
}

impl Drop for OpenSshConnection {
    fn drop(&mut self) {
        if !self.master_started {
            return;
        }
        // blocking, `-O exit` returns as soon as the master got the request
        let res = std::process::Command::new("ssh")
            .args(self.exit_master_args())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
        if let Err(err) = res {
            tracing::warn!("failed to close ssh master {}: {err}", self.control_path.display());
        }
    }
}

pub struct OpenSshSessionFactory {
    credentials: SshCredentials,
}

impl OpenSshSessionFactory {
    pub fn new(credentials: SshCredentials) -> Self {
        Self { credentials }
    }
}

impl SessionFactory for OpenSshSessionFactory {
    fn session(&self, entry: &InventoryEntry) -> Box<dyn Connection> {
        Box::new(OpenSshConnection::new(entry, &self.credentials))
    }
}

/// Sends commands to one physical switch, checking the session before every command and
/// replacing it when it died. A failed reconnect is returned to the caller, the next command
/// tries again.
pub struct CommandExecutor {
    switch: String,
    ip: String,
    verbose: bool,
    connection: Box<dyn Connection>,
}

impl CommandExecutor {
    pub fn new(entry: &InventoryEntry, connection: Box<dyn Connection>) -> Self {
        Self {
            switch: entry.name.clone(),
            ip: entry.ip.clone(),
            verbose: false,
            connection,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn switch(&self) -> &str {
        &self.switch
    }

    fn connection_failure(&self, err: anyhow::Error) -> DriverError {
        DriverError::ConnectionFailure {
            switch: self.switch.clone(),
            ip: self.ip.clone(),
            reason: format!("{err:#}"),
        }
    }

    pub async fn run(&mut self, cmd: &str) -> anyhow::Result<String> {
        if !self.connection.is_alive().await {
            if let Err(err) = self.connection.reconnect().await {
                return Err(self.connection_failure(err).into());
            }
            tracing::debug!("ssh client connected novisw={} ip={}", self.switch, self.ip);
        }
        tracing::debug!("running cmd in {}: {}", self.ip, cmd);
        let output = match self.connection.exec(cmd).await {
            Ok(output) => output,
            Err(err) => return Err(self.connection_failure(err).into()),
        };
        if self.verbose {
            tracing::info!("{} answered `{}`: {}", self.switch, cmd, output.trim());
        }
        Ok(output)
    }
}
