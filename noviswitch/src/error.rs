use thiserror::Error;

/// The kinds of failure the driver distinguishes. Only `PoolExhausted` and a failed pre-flight are
/// fatal, everything else is logged and the caller carries on with the next port or command.
#[derive(Error, PartialEq, Eq, Debug, Clone)]
pub enum DriverError {
    #[error("No more Noviflow switches available for {logical}: known_switches={known:?} current_used={in_use:?}")]
    PoolExhausted {
        logical: String,
        known: Vec<String>,
        in_use: Vec<String>,
    },
    #[error("could not reach switch {switch} ({ip}): {reason}")]
    ConnectionFailure {
        switch: String,
        ip: String,
        reason: String,
    },
    #[error("L2tp tunnel config failed on port {port} of {switch}. You will have to apply manually: {command}")]
    ConfigurationMismatch {
        switch: String,
        port: u16,
        command: String,
    },
    #[error("switch {switch} answered `{command}` with an error: {output}")]
    DeviceReportedError {
        switch: String,
        command: String,
        output: String,
    },
    #[error("cmd=|{command}| -- result=|{output}|")]
    LocalToolingFailure {
        command: String,
        output: String,
    },
    #[error("Invalid port number {port} intf={intf} node={node}. Max port number: {max}")]
    InvalidPort {
        node: String,
        intf: String,
        port: u64,
        max: u16,
    },
    #[error("interface {intf} of {node} does not end with a port number")]
    NoPortNumber {
        node: String,
        intf: String,
    },
    #[error("unknown interface {intf} on {node}")]
    UnknownInterface {
        node: String,
        intf: String,
    },
    #[error("{msg}")]
    Configuration {
        msg: String,
    },
}
