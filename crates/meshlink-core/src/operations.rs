use anyhow::{Context, Result};
use serde_json::{json, Value};

use crate::cli::{Commands, ProfileNameArgs, ProfileSaveArgs, ProfilesCommand, UpArgs};
use crate::config::MeshConfig;
use crate::inventory::{collect_interfaces, InventorySnapshot};
use crate::orchestrator::{Orchestrator, RestoreOutcome, UpRequest};
use crate::platform::Collaborators;
use crate::profiles::{MeshProfile, ProfileStore};
use crate::rollback::RollbackStore;
use crate::selection::network_rows;

pub type HandlerResult = (String, Value);

/// Runs `command` against the system NetworkManager, rtnetlink and routing
/// daemon. Profile management never touches the platform.
pub fn dispatch_command(config: &MeshConfig, command: Commands) -> Result<HandlerResult> {
    match command {
        Commands::Profiles(sub) => handle_profiles(config, sub),
        other => with_system_platform(config, |ops| dispatch_with(config, other, ops)),
    }
}

pub fn dispatch_with(config: &MeshConfig, command: Commands, ops: Collaborators<'_>) -> Result<HandlerResult> {
    match command {
        Commands::Interfaces => handle_interfaces(ops),
        Commands::Networks => handle_networks(ops),
        Commands::Up(args) => handle_up(config, ops, args),
        Commands::Restore => handle_restore(config, ops),
        Commands::Status => handle_status(config, ops),
        Commands::Profiles(sub) => handle_profiles(config, sub),
    }
}

#[cfg(target_os = "linux")]
fn with_system_platform<T>(config: &MeshConfig, f: impl FnOnce(Collaborators<'_>) -> Result<T>) -> Result<T> {
    use crate::platform::linux::{NetlinkAddressOps, NmWifiOps, OlsrdLauncher};

    let wifi = NmWifiOps;
    let addr = NetlinkAddressOps;
    let daemon = OlsrdLauncher::new(config.daemon_path.clone());
    f(Collaborators {
        wifi: &wifi,
        addr: &addr,
        daemon: &daemon,
    })
}

#[cfg(not(target_os = "linux"))]
fn with_system_platform<T>(_config: &MeshConfig, _f: impl FnOnce(Collaborators<'_>) -> Result<T>) -> Result<T> {
    anyhow::bail!("meshlink drives NetworkManager and rtnetlink; only Linux is supported")
}

fn handle_interfaces(ops: Collaborators<'_>) -> Result<HandlerResult> {
    let interfaces = collect_interfaces(ops.wifi, ops.addr)?;
    tracing::info!(target: "wifi", count = interfaces.len(), "interfaces_listed");
    let data = json!({
        "interfaces": interfaces,
        "count": interfaces.len(),
    });
    Ok(("Wireless interfaces listed".to_string(), data))
}

fn handle_networks(ops: Collaborators<'_>) -> Result<HandlerResult> {
    let snapshot = InventorySnapshot::refresh(ops.wifi, ops.addr)?;
    let rows = network_rows(&snapshot);
    let meshes = rows.iter().filter(|r| r.mesh).count();
    let data = json!({
        "networks": rows,
        "count": rows.len(),
        "mesh_count": meshes,
    });
    Ok((format!("{} network(s) visible, {} mesh", rows.len(), meshes), data))
}

fn handle_up(config: &MeshConfig, ops: Collaborators<'_>, args: UpArgs) -> Result<HandlerResult> {
    let profile = ProfileStore::new(config.profiles_dir()).load(&args.profile)?;
    let mut orchestrator = Orchestrator::from_config(ops, config)?;
    let outcome = orchestrator.up(&UpRequest {
        profile,
        interface: args.interface,
        create: args.create,
    })?;

    let verb = if outcome.created { "Created" } else { "Joined" };
    let message = format!(
        "{verb} mesh {} on {} (routing daemon pid {})",
        outcome.plan.ssid, outcome.plan.interface_name, outcome.applied.daemon.pid
    );
    let data = serde_json::to_value(&outcome).context("serializing up outcome")?;
    Ok((message, data))
}

fn handle_restore(config: &MeshConfig, ops: Collaborators<'_>) -> Result<HandlerResult> {
    let mut orchestrator = Orchestrator::from_config(ops, config)?;
    let outcome = orchestrator.restore()?;

    let message = match &outcome {
        RestoreOutcome::NothingToRestore => "Nothing to restore".to_string(),
        RestoreOutcome::Skipped { interface, .. } => {
            format!("{interface} had no restorable connection; mesh profile cleaned up")
        }
        RestoreOutcome::Restored {
            interface,
            profile,
            already_current: true,
            ..
        } => format!("{interface} already on {profile}"),
        RestoreOutcome::Restored {
            interface, profile, ..
        } => format!("{interface} restored to {profile}"),
    };
    let data = serde_json::to_value(&outcome).context("serializing restore outcome")?;
    Ok((message, data))
}

fn handle_status(config: &MeshConfig, ops: Collaborators<'_>) -> Result<HandlerResult> {
    let store = RollbackStore::new(config.rollback_path());
    let record = store.load()?;
    let daemons = ops.daemon.running().context("listing routing daemons")?;

    let message = match &record {
        Some(r) => format!(
            "Rollback pending for {} (displaced by {})",
            r.interface.name, r.mesh_ssid
        ),
        None => "No rollback pending".to_string(),
    };
    let data = json!({
        "root": config.root,
        "rollback_path": store.path(),
        "rollback": record,
        "daemons": daemons,
        "logs_dir": config.logs_dir(),
    });
    Ok((message, data))
}

fn handle_profiles(config: &MeshConfig, command: ProfilesCommand) -> Result<HandlerResult> {
    let store = ProfileStore::new(config.profiles_dir());
    match command {
        ProfilesCommand::List => {
            let names = store.list()?;
            let data = json!({
                "profiles": names,
                "count": names.len(),
            });
            Ok(("Mesh profiles loaded".to_string(), data))
        }
        ProfilesCommand::Show(ProfileNameArgs { name }) => {
            let profile = store.load(&name)?;
            let data = json!({
                "name": name,
                "ssid": profile.ssid,
                "bssid": profile.bssid,
                "has_psk": profile.psk.is_some(),
                "ip": profile.ip,
                "netmask": profile.netmask,
                "notes": profile.notes,
            });
            Ok(("Mesh profile loaded".to_string(), data))
        }
        ProfilesCommand::Save(args) => {
            let ProfileSaveArgs {
                name,
                ssid,
                bssid,
                psk,
                ip,
                netmask,
                notes,
            } = args;
            let profile = MeshProfile {
                ssid,
                bssid: bssid.unwrap_or_else(|| config.mesh_bssid.clone()),
                psk,
                ip,
                netmask,
                notes,
            };
            let path = store.save(&name, &profile)?;
            Ok((
                format!("Mesh profile {name} saved"),
                json!({ "name": name, "path": path }),
            ))
        }
        ProfilesCommand::Delete(ProfileNameArgs { name }) => {
            let deleted = store.delete(&name)?;
            let message = if deleted {
                format!("Mesh profile {name} deleted")
            } else {
                format!("Mesh profile {name} not found")
            };
            Ok((message, json!({ "name": name, "deleted": deleted })))
        }
    }
}
