//! Scripted stand-ins for the physical switches and the local shell. They record every command
//! they receive so tests can assert on the exact command strings, and answer from a list of
//! replies matched by command prefix.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use noviswitch_schemas::settings::{InventoryEntry, SwitchInventory};
use crate::common::DriverCommon;
use crate::exec::LocalExecutor;
use crate::exec::ssh::{Connection, SessionFactory};

/// Replies keyed by command prefix. The replies of a prefix are consumed in order, the last one
/// is repeated forever.
#[derive(Default)]
struct Replies(Vec<(String, VecDeque<String>)>);

impl Replies {
    fn push(&mut self, prefix: &str, reply: &str) {
        match self.0.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, replies)) => replies.push_back(reply.to_string()),
            None => self.0.push((prefix.to_string(), VecDeque::from([reply.to_string()]))),
        }
    }

    fn answer(&mut self, cmd: &str) -> String {
        let Some((_, replies)) = self.0.iter_mut().find(|(p, _)| cmd.starts_with(p.as_str())) else {
            return String::new();
        };
        if replies.len() > 1 {
            replies.pop_front().unwrap_or_default()
        } else {
            replies.front().cloned().unwrap_or_default()
        }
    }
}

#[derive(Default)]
struct DeviceState {
    commands: Vec<String>,
    replies: Replies,
    alive: bool,
    refuse: bool,
    reconnects: usize,
    // commands whose next send drops the session
    drops: Vec<String>,
}

/// A physical switch CLI
#[derive(Clone, Default)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.set_alive(true);
        device
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn connection(&self) -> Box<dyn Connection> {
        Box::new(FakeConnection { device: self.clone() })
    }

    pub fn reply(&self, prefix: &str, reply: &str) {
        self.state().replies.push(prefix, reply);
    }

    pub fn set_alive(&self, alive: bool) {
        self.state().alive = alive;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse = refuse;
    }

    /// The next command starting with `prefix` breaks the session instead of reaching the switch
    pub fn drop_session_on(&self, prefix: &str) {
        self.state().drops.push(prefix.to_string());
    }

    pub fn reconnects(&self) -> usize {
        self.state().reconnects
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }
}

struct FakeConnection {
    device: FakeDevice,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn is_alive(&self) -> bool {
        self.device.state().alive
    }

    async fn reconnect(&mut self) -> anyhow::Result<()> {
        let mut state = self.device.state();
        if state.refuse {
            bail!("Connection refused");
        }
        state.alive = true;
        state.reconnects += 1;
        Ok(())
    }

    async fn exec(&mut self, cmd: &str) -> anyhow::Result<String> {
        let mut state = self.device.state();
        if let Some(pos) = state.drops.iter().position(|p| cmd.starts_with(p.as_str())) {
            state.drops.remove(pos);
            state.alive = false;
            bail!("Broken pipe");
        }
        state.commands.push(cmd.to_string());
        Ok(state.replies.answer(cmd))
    }
}

/// Hands out sessions to one `FakeDevice` per physical switch name
#[derive(Clone, Default)]
pub struct FakeSessions {
    devices: Arc<Mutex<HashMap<String, FakeDevice>>>,
}

impl FakeSessions {
    pub fn device(&self, name: &str) -> FakeDevice {
        self.devices.lock().unwrap()
            .entry(name.to_string())
            .or_insert_with(FakeDevice::new)
            .clone()
    }
}

impl SessionFactory for FakeSessions {
    fn session(&self, entry: &InventoryEntry) -> Box<dyn Connection> {
        self.device(&entry.name).connection()
    }
}

/// The emulator host shell
#[derive(Clone, Default)]
pub struct FakeShell {
    commands: Arc<Mutex<Vec<String>>>,
    replies: Arc<Mutex<Replies>>,
}

impl FakeShell {
    pub fn reply(&self, prefix: &str, reply: &str) {
        self.replies.lock().unwrap().push(prefix, reply);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl LocalExecutor for FakeShell {
    async fn run(&self, cmd: Vec<String>) -> anyhow::Result<String> {
        let cmd = cmd.join(" ");
        self.commands.lock().unwrap().push(cmd.clone());
        // give concurrent callers a chance to interleave
        tokio::task::yield_now().await;
        Ok(self.replies.lock().unwrap().answer(&cmd))
    }
}

pub const LOCAL_IP: &str = "192.168.0.100";

/// Driver state over `sw1`=10.0.0.1 .. `swN`
pub fn test_common(switches: usize, sessions: &FakeSessions, shell: &FakeShell) -> DriverCommon {
    let inventory = SwitchInventory::new(
        (1..=switches).map(|i| InventoryEntry::new(&format!("sw{i}"), &format!("10.0.0.{i}"))).collect()
    );
    DriverCommon::new(
        inventory,
        LOCAL_IP.to_string(),
        Arc::new(sessions.clone()),
        Arc::new(shell.clone()),
        Duration::from_secs(30),
        16,
    )
}
