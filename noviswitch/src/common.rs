use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use serde_json::Value;
use noviswitch_schemas::settings::{DriverSettings, SwitchInventory};
use crate::error::DriverError;
use crate::exec::LocalExecutor;
use crate::exec::ssh::SessionFactory;
use crate::local_link::LocalLinkWiring;
use crate::pool::SwitchPool;
use crate::tunnel::TunnelIdRegistry;
use crate::vec_of_strings;

/// The process wide state every `NoviSwitch` is constructed with. The pool and the tunnel
/// registry are shared between all switches, so this is cheap to clone.
#[derive(Clone)]
pub struct DriverCommon {
    pub pool: Arc<SwitchPool>,
    pub tunnels: Arc<TunnelIdRegistry>,
    pub wiring: Arc<LocalLinkWiring>,
    pub sessions: Arc<dyn SessionFactory>,
    pub local: Arc<dyn LocalExecutor>,
    /// local tunnel endpoint and the address controllers on loopback are reached at
    pub local_ip: String,
    pub max_wait: Duration,
    pub max_ifaces: u16,
}

impl DriverCommon {
    pub fn new(
        inventory: SwitchInventory,
        local_ip: String,
        sessions: Arc<dyn SessionFactory>,
        local: Arc<dyn LocalExecutor>,
        max_wait: Duration,
        max_ifaces: u16,
    ) -> Self {
        Self {
            pool: Arc::new(SwitchPool::new(inventory)),
            tunnels: Arc::new(TunnelIdRegistry::new()),
            wiring: Arc::new(LocalLinkWiring::new(local.clone())),
            sessions,
            local,
            local_ip,
            max_wait,
            max_ifaces,
        }
    }

    /// Build the driver state from the settings, discovering the local ip if it was not set
    pub async fn from_settings(
        settings: &DriverSettings,
        sessions: Arc<dyn SessionFactory>,
        local: Arc<dyn LocalExecutor>,
    ) -> anyhow::Result<Self> {
        let local_ip = resolve_local_ip(settings, local.as_ref()).await?;
        tracing::info!("using {local_ip} as local ip for l2tp tunnels");
        Ok(Self::new(
            settings.inventory.clone(),
            local_ip,
            sessions,
            local,
            settings.max_wait(),
            settings.max_ifaces,
        ))
    }
}

/// The configured local ip, or the preferred source address of the route to the first switch
pub async fn resolve_local_ip(settings: &DriverSettings, local: &dyn LocalExecutor) -> anyhow::Result<String> {
    if let Some(ip) = &settings.local_ip {
        return Ok(ip.clone());
    }
    let first = settings.inventory.entries().next()
        .context("getting the first switch to find the local ip")?;
    let output = local.run(vec_of_strings!["ip", "-j", "route", "get", first.ip]).await?;
    parse_route_source(&output).ok_or_else(|| DriverError::Configuration {
        msg: "Could not identify the Local IP for L2TP tunnels. Please define NOVILOCALIP env var or check pref ip source for switches".to_string(),
    }.into())
}

fn parse_route_source(output: &str) -> Option<String> {
    let routes: Value = serde_json::from_str(output).ok()?;
    routes.get(0)?
        .get("prefsrc")?
        .as_str()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}
