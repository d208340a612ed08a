//! The acquisition and rollback state machine.
//!
//! Forward: `Idle -> Inventoried -> Planned -> Snapshotted -> Applying ->
//! Connected`, any of them may drop to `Failed`. Restore: `Idle ->
//! Restoring -> Reconnected -> Settled -> Restored`, or `Restoring ->
//! RestoreSkipped`, any of them may drop to `RestoreFailed`. Every step goes
//! through [`Orchestrator::advance`], so the rollback record is always on disk
//! before the first mutation and addressing is only restored after the settle
//! delay.

use serde::Serialize;
use std::cmp::Reverse;
use std::path::PathBuf;
use std::time::Duration;

use crate::addressing::network_address;
use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::inventory::{collect_interfaces, InventorySnapshot};
use crate::model::{ConnectionMode, Interface};
use crate::plan::{make_plan, ConnectionPlan, PlanRequest, PlanTarget};
use crate::platform::{Collaborators, ConnectRequest, DaemonHandle};
use crate::profiles::MeshProfile;
use crate::rollback::{RollbackRecord, RollbackStore};
use crate::selection::choose_interface;
use crate::template::{
    render, write_generated, TemplateVars, Templates, OLSRD_CONF_EXTENSION, PROFILE_EXTENSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SwitchState {
    Idle,
    Inventoried,
    Planned,
    Snapshotted,
    Applying,
    Connected,
    Failed,
    Restoring,
    Reconnected,
    Settled,
    Restored,
    RestoreSkipped,
    RestoreFailed,
}

impl SwitchState {
    pub fn allows(self, to: SwitchState) -> bool {
        use SwitchState::*;
        matches!(
            (self, to),
            (Idle, Inventoried)
                | (Inventoried, Planned)
                | (Planned, Snapshotted)
                | (Snapshotted, Applying)
                | (Applying, Connected)
                | (Idle | Inventoried | Planned | Snapshotted | Applying, Failed)
                | (Idle, Restoring)
                | (Restoring, Reconnected)
                | (Reconnected, Settled)
                | (Settled | Restoring, Restored)
                | (Restoring, RestoreSkipped)
                | (Restoring | Reconnected | Settled, RestoreFailed)
        )
    }
}

/// What the operator asked `up` to do.
#[derive(Debug, Clone)]
pub struct UpRequest {
    pub profile: MeshProfile,
    /// Restrict to this interface; the first one otherwise.
    pub interface: Option<String>,
    /// Create a new mesh even when a matching cell is visible.
    pub create: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Applied {
    pub profile_path: PathBuf,
    pub daemon_config_path: PathBuf,
    pub daemon: DaemonHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpOutcome {
    pub created: bool,
    pub plan: ConnectionPlan,
    pub rollback: RollbackRecord,
    pub applied: Applied,
}

/// Result of deleting the displacing mesh profile after a restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub profile: String,
    pub deleted: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RestoreOutcome {
    NothingToRestore,
    Skipped {
        interface: String,
        cleanup: Option<CleanupReport>,
    },
    Restored {
        interface: String,
        profile: String,
        dhcp: bool,
        already_current: bool,
        cleanup: Option<CleanupReport>,
    },
}

enum ConnectionRestore {
    NotRequested,
    Done { profile: String, already_current: bool },
}

pub struct Orchestrator<'a> {
    ops: Collaborators<'a>,
    store: RollbackStore,
    generated_dir: PathBuf,
    templates: Templates,
    settle: Duration,
    state: SwitchState,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        ops: Collaborators<'a>,
        store: RollbackStore,
        generated_dir: PathBuf,
        templates: Templates,
        settle: Duration,
    ) -> Self {
        Self {
            ops,
            store,
            generated_dir,
            templates,
            settle,
            state: SwitchState::Idle,
        }
    }

    pub fn from_config(ops: Collaborators<'a>, config: &MeshConfig) -> Result<Self> {
        Ok(Self::new(
            ops,
            RollbackStore::new(config.rollback_path()),
            config.generated_dir(),
            Templates::load(&config.templates_dir())?,
            config.settle,
        ))
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    fn advance(&mut self, to: SwitchState) -> Result<()> {
        if !self.state.allows(to) {
            return Err(MeshError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(target: "mesh", from = ?self.state, to = ?to, "state_transition");
        self.state = to;
        Ok(())
    }

    /// Drops to `terminal` unless `err` is a rejected transition, which
    /// leaves the machine where it was.
    fn fail(&mut self, terminal: SwitchState, err: MeshError) -> MeshError {
        if !matches!(err, MeshError::InvalidTransition { .. }) && self.state.allows(terminal) {
            self.state = terminal;
        }
        err
    }

    fn run_step<T>(
        step: &'static str,
        iface: &str,
        f: impl FnOnce() -> anyhow::Result<T>,
    ) -> Result<T> {
        tracing::info!(target: "mesh", step, iface = %iface, "step_started");
        match f() {
            Ok(value) => {
                tracing::info!(target: "mesh", step, iface = %iface, "step_completed");
                Ok(value)
            }
            Err(err) => {
                tracing::error!(target: "mesh", step, iface = %iface, error = %format!("{err:#}"), "step_failed");
                Err(MeshError::platform(step, err))
            }
        }
    }

    pub fn inventory(&mut self) -> Result<InventorySnapshot> {
        self.advance(SwitchState::Inventoried)
            .and_then(|_| InventorySnapshot::refresh(self.ops.wifi, self.ops.addr))
            .map_err(|e| self.fail(SwitchState::Failed, e))
    }

    pub fn plan(&mut self, snapshot: &InventorySnapshot, request: &PlanRequest) -> Result<ConnectionPlan> {
        if !self.state.allows(SwitchState::Planned) {
            return Err(MeshError::InvalidTransition {
                from: self.state,
                to: SwitchState::Planned,
            });
        }
        let plan = make_plan(snapshot, request, &self.templates).map_err(|e| self.fail(SwitchState::Failed, e))?;
        self.advance(SwitchState::Planned)?;
        Ok(plan)
    }

    /// Persists the rollback record. Must run before anything is mutated.
    pub fn snapshot(&mut self, snapshot: &InventorySnapshot, plan: &ConnectionPlan) -> Result<RollbackRecord> {
        if !self.state.allows(SwitchState::Snapshotted) {
            return Err(MeshError::InvalidTransition {
                from: self.state,
                to: SwitchState::Snapshotted,
            });
        }
        let iface = snapshot
            .interface(&plan.interface_id)
            .ok_or_else(|| MeshError::InterfaceNotFound {
                name: plan.interface_name.clone(),
            })
            .map_err(|e| self.fail(SwitchState::Failed, e))?;
        let record = self
            .store
            .save(iface, &plan.ssid)
            .map_err(|e| self.fail(SwitchState::Failed, e))?;
        self.advance(SwitchState::Snapshotted)?;
        Ok(record)
    }

    /// Installs the profile, addresses the interface, joins the cell and
    /// starts the routing daemon.
    pub fn apply(&mut self, plan: &ConnectionPlan) -> Result<Applied> {
        self.advance(SwitchState::Applying)?;
        let applied = self
            .apply_steps(plan)
            .map_err(|e| self.fail(SwitchState::Failed, e))?;
        self.advance(SwitchState::Connected)?;
        tracing::info!(
            target: "mesh",
            iface = %plan.interface_name,
            ssid = %plan.ssid,
            pid = applied.daemon.pid,
            "mesh_connected"
        );
        Ok(applied)
    }

    fn apply_steps(&self, plan: &ConnectionPlan) -> Result<Applied> {
        let iface = plan.interface_name.as_str();
        let wifi = self.ops.wifi;
        let addr = self.ops.addr;
        let daemon = self.ops.daemon;

        let document = plan.render_profile(&self.templates)?;
        let profile_path = write_generated(&self.generated_dir, &plan.ssid, PROFILE_EXTENSION, &document)?;
        Self::run_step("install_profile", iface, || wifi.install_profile(iface, &profile_path))?;

        Self::run_step("set_static", iface, || {
            addr.set_static(iface, &[plan.ip], &[plan.netmask])
        })?;

        let mut vars = TemplateVars::new();
        vars.insert("masked_ip", network_address(plan.ip, plan.netmask).to_string());
        vars.insert("netmask", plan.netmask.to_string());
        vars.insert("interface_name", iface.to_string());
        let conf = render(&self.templates.olsrd, &vars)?;
        let daemon_config_path = write_generated(&self.generated_dir, &plan.ssid, OLSRD_CONF_EXTENSION, &conf)?;

        let request = ConnectRequest {
            mode: ConnectionMode::Profile,
            profile_name: plan.profile_name.clone(),
            ssid: plan.ssid.clone(),
            bssid_list: vec![plan.bssid.clone()],
            dot11_bss_type: plan.dot11_bss_type.clone(),
        };
        Self::run_step("connect", iface, || wifi.connect(iface, &request))?;

        let handle = Self::run_step("launch_daemon", iface, || daemon.launch(iface, &daemon_config_path))?;

        Ok(Applied {
            profile_path,
            daemon_config_path,
            daemon: handle,
        })
    }

    /// Joins the profile's mesh, or creates it when no cell is visible or
    /// `create` is set.
    pub fn up(&mut self, request: &UpRequest) -> Result<UpOutcome> {
        let snapshot = self.inventory()?;

        let mut matches = request.profile.available_networks(&snapshot);
        if let Some(name) = &request.interface {
            matches.retain(|k| &k.interface == name);
        }
        matches.sort_by_key(|k| Reverse(snapshot.detail(k).map(|d| d.quality).unwrap_or(0)));
        let target = match matches.into_iter().next() {
            Some(key) if !request.create => PlanTarget::Existing(key),
            _ => {
                let iface = choose_interface(&snapshot, request.interface.as_deref())
                    .map_err(|e| self.fail(SwitchState::Failed, e))?;
                PlanTarget::NewMesh {
                    interface_id: iface.id.clone(),
                    ssid: request.profile.ssid.clone(),
                    bssid: request.profile.bssid.clone(),
                }
            }
        };
        let created = matches!(target, PlanTarget::NewMesh { .. });
        tracing::info!(
            target: "mesh",
            ssid = %request.profile.ssid,
            created,
            "mesh_target_chosen"
        );

        let plan_request = PlanRequest {
            target,
            key_material: request.profile.psk.clone(),
            ip: request.profile.ip,
            netmask: request.profile.netmask,
        };
        let plan = self.plan(&snapshot, &plan_request)?;
        let rollback = self.snapshot(&snapshot, &plan)?;
        let applied = self.apply(&plan)?;

        Ok(UpOutcome {
            created,
            plan,
            rollback,
            applied,
        })
    }

    /// Puts the interface back the way the rollback record describes.
    pub fn restore(&mut self) -> Result<RestoreOutcome> {
        self.advance(SwitchState::Restoring)?;

        let record = match self.store.load() {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::info!(target: "mesh", path = %self.store.path().display(), "nothing_to_restore");
                self.advance(SwitchState::RestoreSkipped)?;
                return Ok(RestoreOutcome::NothingToRestore);
            }
            Err(e) => return Err(self.fail(SwitchState::RestoreFailed, e)),
        };

        let iface = self
            .resolve_interface(&record)
            .map_err(|e| self.fail(SwitchState::RestoreFailed, e))?;

        let result = self.restore_connection(&record, &iface);

        let cleanup = if record.delete_mesh_after_restore {
            Some(self.cleanup(&record.mesh_ssid, &iface.name))
        } else {
            None
        };

        match result {
            Ok(ConnectionRestore::NotRequested) => {
                self.advance(SwitchState::RestoreSkipped)?;
                Ok(RestoreOutcome::Skipped {
                    interface: iface.name,
                    cleanup,
                })
            }
            Ok(ConnectionRestore::Done {
                profile,
                already_current,
            }) => {
                self.advance(SwitchState::Restored)?;
                tracing::info!(target: "mesh", iface = %iface.name, profile = %profile, already_current, "restore_completed");
                Ok(RestoreOutcome::Restored {
                    interface: iface.name,
                    profile,
                    dhcp: record.interface.addressing.dhcp_enabled,
                    already_current,
                    cleanup,
                })
            }
            Err(e) => Err(self.fail(SwitchState::RestoreFailed, e)),
        }
    }

    fn resolve_interface(&self, record: &RollbackRecord) -> Result<Interface> {
        let interfaces = collect_interfaces(self.ops.wifi, self.ops.addr)?;
        interfaces
            .into_iter()
            .find(|i| i.id.eq_ignore_ascii_case(&record.interface.id))
            .ok_or_else(|| MeshError::InterfaceVanished {
                id: record.interface.id.clone(),
            })
    }

    fn restore_connection(&mut self, record: &RollbackRecord, iface: &Interface) -> Result<ConnectionRestore> {
        if !record.restore {
            tracing::info!(
                target: "mesh",
                iface = %iface.name,
                mode = record.mode.map(|m| m.as_str()).unwrap_or("none"),
                "restore_not_requested"
            );
            return Ok(ConnectionRestore::NotRequested);
        }

        let profile = record
            .profile_name
            .clone()
            .ok_or_else(|| MeshError::RollbackCorrupt {
                path: self.store.path().to_path_buf(),
                reason: "restore requested without a profile name".to_string(),
            })?;

        let on_profile = iface
            .initial_connection
            .as_ref()
            .is_some_and(|c| c.profile_name == profile);
        if on_profile && record.interface.addressing.matches(&iface.addressing) {
            tracing::info!(target: "mesh", iface = %iface.name, profile = %profile, "restore_already_current");
            return Ok(ConnectionRestore::Done {
                profile,
                already_current: true,
            });
        }

        let request = ConnectRequest {
            mode: record.restore_mode().unwrap_or(ConnectionMode::Profile),
            profile_name: profile.clone(),
            ssid: record.ssid.clone().unwrap_or_default(),
            bssid_list: record.bssid.iter().filter(|b| !b.is_empty()).cloned().collect(),
            dot11_bss_type: record.dot11_bss_type.clone().unwrap_or_default(),
        };
        let wifi = self.ops.wifi;
        Self::run_step("reconnect", &iface.name, || wifi.connect(&iface.name, &request))?;
        self.advance(SwitchState::Reconnected)?;

        // Association completes asynchronously; addressing issued too early is dropped.
        tracing::debug!(target: "mesh", iface = %iface.name, settle_ms = self.settle.as_millis() as u64, "settle_wait");
        std::thread::sleep(self.settle);
        self.advance(SwitchState::Settled)?;

        let saved = &record.interface.addressing;
        let addr = self.ops.addr;
        if saved.dhcp_enabled {
            Self::run_step("enable_dhcp", &iface.name, || addr.enable_dhcp(&iface.name))?;
        } else {
            Self::run_step("set_static", &iface.name, || {
                addr.set_static(&iface.name, &saved.ips, &saved.subnet_masks)
            })?;
            if !saved.gateways.is_empty() {
                Self::run_step("set_gateways", &iface.name, || {
                    addr.set_gateways(&iface.name, &saved.gateways)
                })?;
            }
        }

        Ok(ConnectionRestore::Done {
            profile,
            already_current: false,
        })
    }

    fn cleanup(&self, mesh_ssid: &str, iface: &str) -> CleanupReport {
        let wifi = self.ops.wifi;
        match Self::run_step("delete_profile", iface, || wifi.delete_profile(mesh_ssid, iface)) {
            Ok(()) => CleanupReport {
                profile: mesh_ssid.to_string(),
                deleted: true,
                error: None,
            },
            Err(err) => {
                let message = match &err {
                    MeshError::Platform { source, .. } => format!("{source:#}"),
                    other => other.to_string(),
                };
                tracing::warn!(target: "mesh", iface = %iface, profile = %mesh_ssid, error = %message, "mesh_profile_cleanup_failed");
                CleanupReport {
                    profile: mesh_ssid.to_string(),
                    deleted: false,
                    error: Some(message),
                }
            }
        }
    }
}
