use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use meshlink_core::platform::{
    AdapterConfig, AddressOps, Collaborators, ConnectRequest, DaemonHandle, DaemonLauncher,
    RunningDaemon, VisibleBss, WifiOps, WirelessInterface,
};
use meshlink_core::plan::{AuthAlgorithm, BssType, CipherAlgorithm, KeyType};
use meshlink_core::template::{render, TemplateVars, Templates};
use meshlink_core::{
    make_plan, Addressing, ConnectionInfo, ConnectionMode, InventorySnapshot, MeshError,
    MeshProfile, Orchestrator, PlanRequest, PlanTarget, ProfileStore, RestoreOutcome,
    RollbackStore,
};
use tempfile::TempDir;

/// A single adapter on a static address, associated to an infrastructure
/// network, with two cells in range.
struct Bench {
    log: Mutex<Vec<String>>,
}

impl Bench {
    fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
        }
    }

    fn ops(&self) -> Collaborators<'_> {
        Collaborators {
            wifi: self,
            addr: self,
            daemon: self,
        }
    }

    fn note(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl WifiOps for Bench {
    fn list_interfaces(&self) -> Result<Vec<WirelessInterface>> {
        Ok(vec![WirelessInterface {
            id: "00:11:22:33:44:55".to_string(),
            name: "wlp2s0".to_string(),
            description: "iwlwifi".to_string(),
        }])
    }

    fn list_visible_networks(&self, _iface: &str) -> Result<Vec<VisibleBss>> {
        Ok(vec![
            VisibleBss {
                ssid: "office".to_string(),
                bssid: "66:55:44:33:22:11".to_string(),
                quality: 60,
                auth: "DOT11_AUTH_ALGO_WPA_PSK".to_string(),
                cipher: "DOT11_CIPHER_ALGO_TKIP".to_string(),
                dot11_bss_type: "dot11_BSS_type_infrastructure".to_string(),
            },
            VisibleBss {
                ssid: "legacy".to_string(),
                bssid: "66:55:44:33:22:99".to_string(),
                quality: 20,
                auth: "DOT11_AUTH_ALGO_80211_OPEN".to_string(),
                cipher: "DOT11_CIPHER_ALGO_WEP104".to_string(),
                dot11_bss_type: "dot11_BSS_type_infrastructure".to_string(),
            },
        ])
    }

    fn current_connection(&self, _iface: &str) -> Result<Option<ConnectionInfo>> {
        Ok(Some(ConnectionInfo {
            profile_name: "office".to_string(),
            ssid: "office".to_string(),
            bssid: "66:55:44:33:22:11".to_string(),
            mode: ConnectionMode::Profile,
            dot11_bss_type: "dot11_BSS_type_infrastructure".to_string(),
        }))
    }

    fn install_profile(&self, iface: &str, _profile_path: &Path) -> Result<()> {
        self.note(format!("install_profile:{iface}"));
        Ok(())
    }

    fn connect(&self, iface: &str, request: &ConnectRequest) -> Result<()> {
        self.note(format!("connect:{iface}:{}", request.profile_name));
        Ok(())
    }

    fn delete_profile(&self, name: &str, iface: &str) -> Result<()> {
        self.note(format!("delete_profile:{name}:{iface}"));
        Ok(())
    }
}

impl AddressOps for Bench {
    fn list_adapters(&self) -> Result<Vec<AdapterConfig>> {
        Ok(vec![AdapterConfig {
            id: "00:11:22:33:44:55".to_string(),
            name: "wlp2s0".to_string(),
            mac: "00:11:22:33:44:55".to_string(),
            addressing: Addressing {
                dhcp_enabled: false,
                ips: vec![Ipv4Addr::new(10, 20, 0, 7)],
                subnet_masks: vec![Ipv4Addr::new(255, 255, 0, 0)],
                gateways: vec![Ipv4Addr::new(10, 20, 0, 1)],
            },
        }])
    }

    fn enable_dhcp(&self, iface: &str) -> Result<()> {
        self.note(format!("enable_dhcp:{iface}"));
        Ok(())
    }

    fn set_static(&self, iface: &str, ips: &[Ipv4Addr], _masks: &[Ipv4Addr]) -> Result<()> {
        self.note(format!("set_static:{iface}:{}", ips.len()));
        Ok(())
    }

    fn set_gateways(&self, iface: &str, gateways: &[Ipv4Addr]) -> Result<()> {
        self.note(format!("set_gateways:{iface}:{}", gateways.len()));
        Ok(())
    }
}

impl DaemonLauncher for Bench {
    fn launch(&self, iface: &str, config_path: &Path) -> Result<DaemonHandle> {
        self.note(format!("launch:{iface}"));
        Ok(DaemonHandle {
            pid: 1,
            interface: iface.to_string(),
            config_path: config_path.to_path_buf(),
        })
    }

    fn running(&self) -> Result<Vec<RunningDaemon>> {
        Ok(Vec::new())
    }
}

fn existing(
    snapshot: &InventorySnapshot,
    ssid: &str,
    psk: Option<&str>,
) -> meshlink_core::Result<meshlink_core::ConnectionPlan> {
    let key = snapshot
        .index
        .keys()
        .find(|k| k.ssid == ssid)
        .cloned()
        .expect("network in index");
    make_plan(
        snapshot,
        &PlanRequest {
            target: PlanTarget::Existing(key),
            key_material: psk.map(str::to_string),
            ip: Ipv4Addr::new(5, 9, 8, 7),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
        },
        &Templates::default(),
    )
}

#[test]
fn test_inventory_joins_interfaces_with_adapters_and_scans() {
    let bench = Bench::new();
    let snapshot = InventorySnapshot::refresh(&bench, &bench).unwrap();

    assert_eq!(snapshot.interfaces.len(), 1);
    let iface = &snapshot.interfaces[0];
    assert_eq!(iface.name, "wlp2s0");
    assert!(!iface.addressing.dhcp_enabled);
    assert_eq!(iface.initial_bssid(), Some("66:55:44:33:22:11"));
    assert_eq!(snapshot.networks.len(), 2);
    assert!(snapshot.networks.iter().all(|n| !n.is_mesh));
    assert!(bench.log.lock().unwrap().is_empty());
}

#[test]
fn test_plans_translate_platform_security_identifiers() {
    let bench = Bench::new();
    let snapshot = InventorySnapshot::refresh(&bench, &bench).unwrap();

    let office = existing(&snapshot, "office", Some("hunter22")).unwrap();
    assert_eq!(office.auth, AuthAlgorithm::WpaPsk);
    assert_eq!(office.cipher, CipherAlgorithm::Tkip);
    assert_eq!(office.bss_type, BssType::Infrastructure);
    assert_eq!(office.key_type, KeyType::Passphrase);
    assert_eq!(office.prefix_len, 8);

    let legacy = existing(&snapshot, "legacy", Some("0123456789")).unwrap();
    assert_eq!(legacy.cipher, CipherAlgorithm::Wep);
    assert_eq!(legacy.key_type, KeyType::WepKey);
    assert!(legacy.shared_key.contains("wep-key0=0123456789"));
}

#[test]
fn test_new_mesh_plan_renders_adhoc_profile() {
    let bench = Bench::new();
    let snapshot = InventorySnapshot::refresh(&bench, &bench).unwrap();
    let plan = make_plan(
        &snapshot,
        &PlanRequest {
            target: PlanTarget::NewMesh {
                interface_id: "00:11:22:33:44:55".to_string(),
                ssid: "testmesh".to_string(),
                bssid: "02:CA:FF:EE:BA:BE".to_string(),
            },
            key_material: Some("p@ss".to_string()),
            ip: Ipv4Addr::new(5, 1, 2, 3),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
        },
        &Templates::default(),
    )
    .unwrap();

    assert_eq!(plan.bss_type, BssType::Independent);
    assert_eq!(plan.cipher, CipherAlgorithm::Aes);
    let document = plan.render_profile(&Templates::default()).unwrap();
    assert!(document.contains("mode=adhoc"));
    assert!(document.contains("ssid=testmesh"));
    assert!(document.contains("address1=5.1.2.3/8"));
    assert!(document.contains("psk=p@ss"));
}

#[test]
fn test_rollback_store_round_trips_captured_interface() {
    let dir = TempDir::new().unwrap();
    let bench = Bench::new();
    let snapshot = InventorySnapshot::refresh(&bench, &bench).unwrap();
    let store = RollbackStore::new(dir.path().join("state").join("rollback.json"));

    assert!(store.load().unwrap().is_none());
    let saved = store.save(&snapshot.interfaces[0], "testmesh").unwrap();
    let loaded = store.load().unwrap().unwrap();
    assert_eq!(saved, loaded);
    assert!(loaded.restore);
    assert_eq!(loaded.profile_name.as_deref(), Some("office"));
    assert_eq!(loaded.interface.addressing.gateways, vec![Ipv4Addr::new(10, 20, 0, 1)]);
}

#[test]
fn test_corrupt_rollback_record_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rollback.json");
    std::fs::write(&path, "{\"version\": 1").unwrap();

    let err = RollbackStore::new(&path).load().unwrap_err();
    assert!(matches!(err, MeshError::RollbackCorrupt { .. }));
}

#[test]
fn test_template_escapes_and_rejects_unknown_placeholders() {
    let mut vars = TemplateVars::new();
    vars.insert("iface", "wlan0".to_string());
    assert_eq!(render("Interface \"{iface}\" {{ }}", &vars).unwrap(), "Interface \"wlan0\" { }");
    assert!(matches!(render("{nope}", &vars), Err(MeshError::Template { .. })));
}

#[test]
fn test_profile_store_rejects_invalid_profiles() {
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::new(dir.path());
    let mut profile = MeshProfile {
        ssid: "commotionwireless.net".to_string(),
        bssid: "02:CA:FF:EE:BA:BE".to_string(),
        psk: None,
        ip: Ipv4Addr::new(5, 1, 2, 3),
        netmask: Ipv4Addr::new(255, 0, 255, 0),
        notes: None,
    };
    assert!(matches!(
        store.save("mesh", &profile),
        Err(MeshError::InvalidProfile { .. })
    ));

    profile.netmask = Ipv4Addr::new(255, 0, 0, 0);
    store.save("mesh", &profile).unwrap();
    assert_eq!(store.load("mesh").unwrap(), profile);
    assert!(store.save("../escape", &profile).is_err());
}

#[test]
fn test_restore_without_record_reports_nothing_to_restore() {
    let dir = TempDir::new().unwrap();
    let bench = Bench::new();
    let mut orchestrator = Orchestrator::new(
        bench.ops(),
        RollbackStore::new(dir.path().join("rollback.json")),
        dir.path().join("generated"),
        Templates::default(),
        Duration::ZERO,
    );

    assert_eq!(orchestrator.restore().unwrap(), RestoreOutcome::NothingToRestore);
    assert!(bench.log.lock().unwrap().is_empty());
}

#[test]
fn test_restore_reapplies_static_addressing_and_gateways() {
    let dir = TempDir::new().unwrap();
    let bench = Bench::new();
    let snapshot = InventorySnapshot::refresh(&bench, &bench).unwrap();
    let store = RollbackStore::new(dir.path().join("rollback.json"));
    let mut record_iface = snapshot.interfaces[0].clone();
    record_iface.addressing.ips = vec![Ipv4Addr::new(10, 20, 0, 8)];
    store.save(&record_iface, "testmesh").unwrap();

    let mut orchestrator = Orchestrator::new(
        bench.ops(),
        store,
        dir.path().join("generated"),
        Templates::default(),
        Duration::ZERO,
    );
    let outcome = orchestrator.restore().unwrap();
    assert!(matches!(outcome, RestoreOutcome::Restored { dhcp: false, already_current: false, .. }));
    assert_eq!(
        *bench.log.lock().unwrap(),
        vec![
            "connect:wlp2s0:office",
            "set_static:wlp2s0:1",
            "set_gateways:wlp2s0:1",
            "delete_profile:testmesh:wlp2s0",
        ]
    );
}
