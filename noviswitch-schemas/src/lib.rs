pub mod cli_models;
pub mod controller;
pub mod settings;
pub mod topology;

/// Name given to physical switches that are only known by a list of management IPs
pub const AUTO_SWITCH_PREFIX: &str = "vnovi";
