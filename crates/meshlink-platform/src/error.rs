use thiserror::Error;

/// Errors from the Linux collaborators.
///
/// Variants carry the interface or object involved so the operator can tell
/// which platform call failed without reading a backtrace.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Interface '{name}' not found")]
    InterfaceNotFound { name: String },

    #[error("Connection profile '{name}' not found in NetworkManager")]
    ProfileNotFound { name: String },

    #[error("D-Bus call {operation} failed: {reason}")]
    DBus { operation: String, reason: String },

    #[error("Failed to add address {address}/{prefix} to '{interface}': {reason}")]
    AddAddress {
        address: String,
        prefix: u8,
        interface: String,
        reason: String,
    },

    #[error("Failed to delete address {address} from '{interface}': {reason}")]
    DeleteAddress {
        address: String,
        interface: String,
        reason: String,
    },

    #[error("Failed to update default route via {gateway} on '{interface}': {reason}")]
    Route {
        gateway: String,
        interface: String,
        reason: String,
    },

    #[error("Netlink request failed during {operation}: {reason}")]
    Netlink { operation: String, reason: String },

    #[error("Invalid argument: {parameter} = '{value}': {reason}")]
    InvalidArgument {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("Keyfile line {line}: {reason}")]
    Keyfile { line: usize, reason: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read /proc: {0}")]
    ProcRead(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

impl PlatformError {
    pub fn dbus(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DBus {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    pub fn netlink(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Netlink {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn empty_interface() -> Self {
        Self::InvalidArgument {
            parameter: "interface name".to_string(),
            value: String::new(),
            reason: "Interface name cannot be empty".to_string(),
        }
    }
}
