use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Formatter;
use std::path::Path;
use std::time::Duration;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use crate::AUTO_SWITCH_PREFIX;

pub const ENV_SETTINGS: &str = "NOVISETTINGS";
pub const ENV_SWITCHES: &str = "NOVISWITCHES";
pub const ENV_USER: &str = "NOVIUSER";
pub const ENV_PASS: &str = "NOVIPASS";
pub const ENV_LOCAL_IP: &str = "NOVILOCALIP";
pub const ENV_MAX_WAIT: &str = "NOVIMAXWAIT";
pub const ENV_MAX_IFACES: &str = "NOVIMAXIFACES";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_MAX_WAIT_SECS: u64 = 30;
/// Noviflow virtual switches support up to 16 interfaces
pub const DEFAULT_MAX_IFACES: u16 = 16;

/// A physical switch that can be bound to a logical switch of the emulated topology.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct InventoryEntry {
    /// filled from the key of the inventory map
    #[serde(default, skip_serializing)]
    pub name: String,
    /// management ip, used for ssh and as the l2tp endpoint
    pub ip: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    /// optional local tunnel port offset, carried as configured
    #[serde(default)]
    pub tun_port: Option<u16>,
}

fn default_ssh_port() -> u16 {DEFAULT_SSH_PORT}

impl InventoryEntry {
    pub fn new(name: &str, ip: &str) -> Self {
        Self {
            name: name.to_string(),
            ip: ip.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            tun_port: None,
        }
    }
}

/// The fixed pool of physical switches, keyed and ordered by name.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct SwitchInventory(BTreeMap<String, InventoryEntry>);

impl SwitchInventory {
    pub fn new(entries: Vec<InventoryEntry>) -> Self {
        Self(entries.into_iter().map(|e| (e.name.clone(), e)).collect())
    }

    /// Parse the structured form `{"name": {"ip": .., "ssh_port": .., "tun_port": ..}}`
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let mut inventory: SwitchInventory = serde_json::from_str(text)
            .context("parsing switch inventory json")?;
        for (name, entry) in inventory.0.iter_mut() {
            entry.name = name.clone();
        }
        if inventory.is_empty() {
            bail!("switch inventory is empty");
        }
        Ok(inventory)
    }

    /// Parse a space separated list of management IPs, the switches are named `vnovi1..N`
    pub fn from_ip_list(list: &str) -> anyhow::Result<Self> {
        let ips: Vec<&str> = list.split_whitespace().collect();
        if ips.len() < 2 {
            bail!("Invalid {ENV_SWITCHES} environment variable: must be a space-separated list of at least two IPs");
        }
        let entries = ips.iter()
            .enumerate()
            .map(|(i, ip)| InventoryEntry::new(&format!("{AUTO_SWITCH_PREFIX}{}", i + 1), ip))
            .collect();
        Ok(Self::new(entries))
    }

    pub fn get(&self, name: &str) -> Option<&InventoryEntry> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &InventoryEntry> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything the driver needs from its environment. The local ip may still be unknown here, it
/// is discovered from the routing table by the driver when not configured.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct DriverSettings {
    pub inventory: SwitchInventory,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub local_ip: Option<String>,
    pub max_wait_secs: u64,
    pub max_ifaces: u16,
}

impl fmt::Display for DriverSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string_pretty(&self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl DriverSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the settings from a key lookup, normally the process environment
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let inventory = if let Some(settings) = non_empty(ENV_SETTINGS) {
            read_inventory_setting(&settings)?
        } else if let Some(switches) = non_empty(ENV_SWITCHES) {
            SwitchInventory::from_ip_list(&switches)?
        } else {
            bail!("Neither {ENV_SWITCHES} nor {ENV_SETTINGS} environment variables found. You must define one of them");
        };

        let (username, password) = match (non_empty(ENV_USER), non_empty(ENV_PASS)) {
            (Some(user), Some(pass)) => (user, pass),
            _ => bail!("Missing env vars for username/password for Noviflow switches: {ENV_USER} and {ENV_PASS}"),
        };

        let max_wait_secs = match non_empty(ENV_MAX_WAIT) {
            Some(v) => v.trim().parse().with_context(|| format!("parsing {ENV_MAX_WAIT}={v}"))?,
            None => DEFAULT_MAX_WAIT_SECS,
        };
        let max_ifaces = match non_empty(ENV_MAX_IFACES) {
            Some(v) => v.trim().parse().with_context(|| format!("parsing {ENV_MAX_IFACES}={v}"))?,
            None => DEFAULT_MAX_IFACES,
        };

        Ok(Self {
            inventory,
            username,
            password,
            local_ip: non_empty(ENV_LOCAL_IP).map(|ip| ip.trim().to_string()),
            max_wait_secs,
            max_ifaces,
        })
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// `NOVISETTINGS` is either a path to a json file or the json itself
fn read_inventory_setting(setting: &str) -> anyhow::Result<SwitchInventory> {
    let path = Path::new(setting.trim());
    if path.is_file() {
        tracing::trace!("reading switch inventory from {:?}", path);
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {ENV_SETTINGS} file {}", path.display()))?;
        return SwitchInventory::from_json(&text);
    }
    SwitchInventory::from_json(setting)
        .context(format!("Invalid {ENV_SETTINGS} environment variable: must be a JSON encoded string or file"))
}
