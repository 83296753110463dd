use std::path::Path;
use anyhow::Context;
use serde::{Deserialize, Serialize};

/// The switches of an emulated topology that should be backed by physical switches, with their
/// interfaces and the far end of each interface's link.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TopologyConfig {
    pub switches: Vec<SwitchDefinition>,
    /// `tcp:<ip>:<port>` controllers, used when none are given on the command line
    #[serde(default)]
    pub controllers: Vec<String>,
}

impl TopologyConfig {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.with_context(|| "Reading topology file")?;
        let value: Self = serde_json::from_str(&text).with_context(|| "Parsing topology JSON")?;
        Ok(value)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SwitchDefinition {
    pub name: String,
    /// hex datapath id, derived from the name when absent
    #[serde(default)]
    pub dpid: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceDefinition>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct InterfaceDefinition {
    pub name: String,
    /// interfaces with an ip are not data ports
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub link: Option<LinkEndpoint>,
}

/// The other end of a link, `node:intf`
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkEndpoint {
    pub node: String,
    pub intf: String,
}

impl LinkEndpoint {
    pub fn new(node: &str, intf: &str) -> Self {
        Self { node: node.to_string(), intf: intf.to_string() }
    }
}
