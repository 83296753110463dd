use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::task::JoinSet;
use noviswitch_lib::cleanup::CleanupCoordinator;
use noviswitch_lib::exec::SubprocessExecutor;
use noviswitch_lib::exec::ssh::{OpenSshSessionFactory, SshCredentials};
use noviswitch_lib::pool::SwitchPool;
use noviswitch_lib::{DriverCommon, NoviSwitch};
use noviswitch_schemas::cli_models::{AllocateCmd, Opts, UpCmd};
use noviswitch_schemas::controller::ControllerEndpoint;
use noviswitch_schemas::settings::DriverSettings;
use noviswitch_schemas::topology::TopologyConfig;

async fn driver_common(opts: &Opts) -> anyhow::Result<DriverCommon> {
    let settings = DriverSettings::from_env().context("loading driver settings")?;
    tracing::debug!("driver settings:\n{settings}");
    let credentials = SshCredentials {
        username: settings.username.clone(),
        password: settings.password.clone(),
    };
    DriverCommon::from_settings(
        &settings,
        Arc::new(OpenSshSessionFactory::new(credentials)),
        Arc::new(SubprocessExecutor::new(opts.sudo)),
    ).await
}

pub async fn check(opts: &Opts) -> anyhow::Result<()> {
    let common = driver_common(opts).await?;
    CleanupCoordinator::new(common).setup().await?;
    tracing::info!("all physical switches are usable");
    Ok(())
}

pub async fn cleanup(opts: &Opts) -> anyhow::Result<()> {
    let common = driver_common(opts).await?;
    CleanupCoordinator::new(common).cleanup().await
}

/// Dry run of the pool, no switch is contacted
pub fn allocate(cmd: &AllocateCmd) -> anyhow::Result<()> {
    let settings = DriverSettings::from_env().context("loading driver settings")?;
    let pool = SwitchPool::new(settings.inventory);
    for name in &cmd.names {
        let physical = pool.bind(name)?;
        let ip = pool.lookup(name).map(|entry| entry.ip).unwrap_or_default();
        println!("{name} -> {physical} ({ip})");
    }
    Ok(())
}

pub async fn up(opts: &Opts, cmd: &UpCmd) -> anyhow::Result<()> {
    let topology = TopologyConfig::load_from_file(&cmd.topology).await?;
    let controller_args = if cmd.controllers.is_empty() { &topology.controllers } else { &cmd.controllers };
    let controllers = controller_args.iter()
        .map(|c| c.parse::<ControllerEndpoint>())
        .collect::<anyhow::Result<Vec<_>>>()?;

    let common = driver_common(opts).await?;
    let coordinator = CleanupCoordinator::new(common.clone());
    coordinator.setup().await?;

    // every switch is bound before any starts, so links between two of them are seen as physical
    let mut switches = Vec::new();
    for definition in topology.switches {
        let mut switch = NoviSwitch::new(&definition.name, cmd.verbose, common.clone())?;
        if let Some(dpid) = &definition.dpid {
            switch.set_dpid(dpid)?;
        }
        for intf in definition.interfaces {
            switch.add_interface(intf)?;
        }
        switches.push(switch);
    }

    let switches = start_all(switches, &controllers).await?;
    let mut switches = if controllers.is_empty() {
        switches
    } else {
        wait_connected(switches, common.max_wait).await
    };

    tracing::info!("{} switches up, press ctrl-c to tear down", switches.len());
    let signal = tokio::signal::ctrl_c().await.context("waiting for ctrl-c");

    for switch in switches.iter_mut() {
        if let Err(err) = switch.stop(true).await {
            tracing::error!("failed to stop {}: {err:#}", switch.name());
        }
    }
    drop(switches);
    coordinator.cleanup().await?;
    signal
}

/// Start every switch on its own task, a switch that fails to start is logged and kept so it
/// still gets torn down
async fn start_all(switches: Vec<NoviSwitch>, controllers: &[ControllerEndpoint]) -> anyhow::Result<Vec<NoviSwitch>> {
    let mut set = JoinSet::new();
    for mut switch in switches {
        let controllers = controllers.to_vec();
        set.spawn(async move {
            let res = switch.start(&controllers).await;
            (switch, res)
        });
    }
    let mut started = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (switch, res) = joined.context("joining switch start task")?;
        if let Err(err) = res {
            tracing::error!("failed to start {}: {err:#}", switch.name());
        }
        started.push(switch);
    }
    Ok(started)
}

async fn wait_connected(mut switches: Vec<NoviSwitch>, max_wait: Duration) -> Vec<NoviSwitch> {
    let begin = tokio::time::Instant::now();
    loop {
        let mut waiting = Vec::new();
        for switch in switches.iter_mut() {
            match switch.connected().await {
                Ok(true) => {}
                Ok(false) => waiting.push(switch.name().to_string()),
                Err(err) => {
                    tracing::debug!("checking controller status of {}: {err:#}", switch.name());
                    waiting.push(switch.name().to_string());
                }
            }
        }
        if waiting.is_empty() {
            tracing::info!("all switches connected to a controller");
            break;
        }
        if begin.elapsed() > max_wait {
            tracing::warn!("switches not connected after {}s: {waiting:?}", max_wait.as_secs());
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    switches
}
