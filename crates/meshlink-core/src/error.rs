use std::path::PathBuf;

use thiserror::Error;

use crate::orchestrator::SwitchState;

/// Failures of the acquisition and rollback engine.
///
/// "Nothing to restore" and "no matching network" are ordinary values, not
/// errors; see [`crate::orchestrator::RestoreOutcome`] and
/// [`crate::inventory::InventorySnapshot::find_matching`].
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("interface '{interface}' is listed by the wireless service but has no adapter configuration")]
    InventoryMismatch { interface: String },

    #[error("no {field} mapping for platform value '{value}'")]
    UnmappedSecurity { field: &'static str, value: String },

    #[error("{step} failed")]
    Platform {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("interface {id} from the rollback record is no longer present")]
    InterfaceVanished { id: String },

    #[error("wireless interface '{name}' not found")]
    InterfaceNotFound { name: String },

    #[error("network '{ssid}' ({bssid}) on '{interface}' is not in the inventory")]
    NetworkNotInInventory {
        interface: String,
        ssid: String,
        bssid: String,
    },

    #[error("no wireless interfaces available")]
    NoInterfaces,

    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: SwitchState, to: SwitchState },

    #[error("invalid mesh profile '{name}': {reason}")]
    InvalidProfile { name: String, reason: String },

    #[error("template error: {reason}")]
    Template { reason: String },

    #[error("rollback record {} is unreadable: {reason}", path.display())]
    RollbackCorrupt { path: PathBuf, reason: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MeshError>;

impl MeshError {
    pub fn platform(step: &'static str, source: anyhow::Error) -> Self {
        Self::Platform { step, source }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_error_keeps_cause_chain() {
        let err = MeshError::platform("install_profile", anyhow::anyhow!("AddConnection refused"));
        assert_eq!(err.to_string(), "install_profile failed");
        let chained = anyhow::Error::new(err);
        let causes: Vec<String> = chained.chain().map(|c| c.to_string()).collect();
        assert_eq!(causes, vec!["install_profile failed", "AddConnection refused"]);
    }

    #[test]
    fn test_unmapped_security_names_field_and_value() {
        let err = MeshError::UnmappedSecurity {
            field: "cipher",
            value: "DOT11_CIPHER_ALGO_GCMP".to_string(),
        };
        assert!(err.to_string().contains("cipher"));
        assert!(err.to_string().contains("DOT11_CIPHER_ALGO_GCMP"));
    }
}
