mod commands;
mod logging;

use anyhow::{anyhow, bail};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use noviswitch_schemas::cli_models::{Opts, SubCommand};
use crate::logging::configure_logging;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    std::process::exit(match run_app().await {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!("{:#}", err);
            1
        }
    });
}

fn log_level(s: &str) -> anyhow::Result<LevelFilter> {
    match s.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::ERROR),
        "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        _ => Err(anyhow!("Unknown Log LevelFilter {}", s)),
    }
}

/// Parses the CLI options, sets up logging and runs the sub command. Any error is logged with
/// its causes and turned into exit status 1.
pub async fn run_app() -> Result<(), anyhow::Error> {
    let opts: Opts = Opts::parse();
    let mut e = None;
    let level = match &opts.verbosity {
        None => LevelFilter::INFO,
        Some(x) => match log_level(x) {
            Ok(l) => l,
            Err(err) => {
                e = Some(err);
                LevelFilter::INFO
            }
        },
    };
    let _guard = configure_logging(level, opts.log_dir.as_deref())?;
    if let Some(e) = e {
        tracing::warn!("{}", e);
    }

    let name = opts.sub_command.name();
    match parse_command(opts).await {
        Ok(_) => Ok(()),
        Err(err) => {
            tracing::error!("ERROR: {}", err);
            err.chain().skip(1).for_each(|cause| tracing::error!("because: {}", cause));
            bail!("{name} failed");
        }
    }
}

/// This is the entrypoint for all commands
pub async fn parse_command(opts: Opts) -> anyhow::Result<()> {
    let needs_local_tools = matches!(opts.sub_command, SubCommand::Up(_) | SubCommand::Cleanup);
    if needs_local_tools && !opts.sudo && !nix::unistd::Uid::effective().is_root() {
        tracing::warn!("not running as root, the local ip l2tp and ovs commands will fail unless --sudo is given");
    }
    match &opts.sub_command {
        SubCommand::Check => commands::check(&opts).await,
        SubCommand::Cleanup => commands::cleanup(&opts).await,
        SubCommand::Up(up_cmd) => commands::up(&opts, up_cmd).await,
        SubCommand::Allocate(allocate_cmd) => commands::allocate(allocate_cmd),
    }
}
