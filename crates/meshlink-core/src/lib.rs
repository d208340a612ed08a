pub mod addressing;
pub mod cli;
pub mod config;
pub mod error;
pub mod inventory;
pub mod model;
pub mod operations;
pub mod orchestrator;
pub mod persist;
pub mod plan;
pub mod platform;
pub mod profiles;
pub mod rollback;
pub mod runtime;
pub mod selection;
pub mod template;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::{resolve_root, MeshConfig};
pub use error::{MeshError, Result};
pub use inventory::{InventorySnapshot, Network, NetworkKey};
pub use model::{Addressing, ConnectionInfo, ConnectionMode, Interface};
pub use operations::{dispatch_command, HandlerResult};
pub use orchestrator::{Orchestrator, RestoreOutcome, SwitchState, UpOutcome, UpRequest};
pub use plan::{make_plan, ConnectionPlan, PlanRequest, PlanTarget};
pub use profiles::{MeshProfile, ProfileStore};
pub use rollback::{RollbackRecord, RollbackStore};
