use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version = "0.1", about = "Bind emulated switches to physical Noviflow switches")]
pub struct Opts {
    #[arg(short, long)]
    pub verbosity: Option<String>,
    #[arg(long, help = "Also write logs to a daily rolling file in this folder")]
    pub log_dir: Option<PathBuf>,
    #[arg(long, action, help = "Prefix local ip/ovs commands with sudo")]
    pub sudo: bool,
    #[command(subcommand)]
    pub sub_command: SubCommand,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    #[command(about = "Check every physical switch in the inventory is reachable and usable")]
    Check,
    #[command(about = "Remove local L2TP tunnels and reset controllers and flows on every physical switch")]
    Cleanup,
    #[command(about = "Bind and start the switches of a topology file, tear down on ctrl-c")]
    Up(UpCmd),
    #[command(about = "Show which physical switch each logical switch would be bound to")]
    Allocate(AllocateCmd),
}

impl SubCommand {
    pub fn name(&self) -> String {
        match &self {
            SubCommand::Check => "check".into(),
            SubCommand::Cleanup => "cleanup".into(),
            SubCommand::Up(_) => "up".into(),
            SubCommand::Allocate(_) => "allocate".into(),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct UpCmd {
    #[arg(help = "Topology JSON file")]
    pub topology: PathBuf,
    #[arg(long = "controller", help = "Controller as tcp:<ip>:<port>, can be repeated")]
    pub controllers: Vec<String>,
    #[arg(long, action, help = "Log every switch response")]
    pub verbose: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct AllocateCmd {
    #[arg(required = true, help = "Logical switch names")]
    pub names: Vec<String>,
}
