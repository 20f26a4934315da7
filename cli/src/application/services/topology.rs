//! Session persistence: save, load, list and restore fleet topologies.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::StreamExt as _;
use futures_util::stream;

use crate::application::ports::{CloudClient, ProgressSink, Provisioner, VmSpec};
use crate::application::services::directory::VmDirectory;
use crate::domain::error::TopologyError;
use crate::domain::topology::{
    LoadResult, MultiplexerSession, SessionMeta, StoredTopology, TopologyVm, is_valid_topology_name,
};
use crate::domain::vm::VmRecord;
use crate::infra::fs::{atomic_write, ensure_dir};

/// Restore provisions at most this many VMs in parallel.
const MAX_PROVISION_WORKERS: usize = 5;

/// Save/load manager for named topology files under a sessions directory.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store under `~/.flotilla/sessions/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_dir(home.join(".flotilla").join("sessions")))
    }

    /// Store under an explicit directory (used in tests).
    #[must_use]
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn file_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.toml"))
    }

    fn validate_name(name: &str) -> Result<(), TopologyError> {
        if name.is_empty() {
            return Err(TopologyError::EmptyName);
        }
        if !is_valid_topology_name(name) {
            return Err(TopologyError::InvalidName(name.to_string()));
        }
        Ok(())
    }

    /// Save a topology snapshot. Only allowlisted fields are serialised;
    /// the file is written atomically with mode 0600 under a 0700
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error on an invalid name or a write failure.
    pub fn save(
        &self,
        name: &str,
        pairs: &[(VmRecord, Vec<MultiplexerSession>)],
        resource_group: &str,
        saved_at: DateTime<Utc>,
    ) -> Result<PathBuf> {
        Self::validate_name(name)?;
        ensure_dir(&self.dir, 0o700)?;

        let vms: Vec<TopologyVm> = pairs
            .iter()
            .map(|(vm, sessions)| TopologyVm {
                name: vm.name.clone(),
                resource_group: vm.resource_group.clone(),
                location: vm.location.clone(),
                vm_size: if vm.vm_size.is_empty() {
                    crate::domain::topology::DEFAULT_VM_SIZE.to_string()
                } else {
                    vm.vm_size.clone()
                },
                session_name: vm.tags.get("session_name").cloned(),
                tmux_sessions: sessions.clone(),
            })
            .collect();

        let topology = StoredTopology {
            session: SessionMeta {
                name: name.to_string(),
                saved_at: saved_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                resource_group: resource_group.to_string(),
            },
            vms,
        };

        let body = toml::to_string_pretty(&topology).context("serializing session topology")?;
        let path = self.file_for(name);
        atomic_write(&path, body.as_bytes(), 0o600)?;
        Ok(path)
    }

    /// Load a named topology.
    ///
    /// # Errors
    ///
    /// Returns [`TopologyError`] for an invalid name, a missing file (the
    /// message lists available sessions), malformed TOML, or zero VMs.
    pub fn load(&self, name: &str) -> Result<StoredTopology> {
        Self::validate_name(name)?;
        let path = self.file_for(name);
        if !path.exists() {
            let available = self.list();
            if available.is_empty() {
                return Err(TopologyError::NotFoundNoSessions(name.to_string()).into());
            }
            return Err(TopologyError::NotFound {
                name: name.to_string(),
                available: available.join(", "),
            }
            .into());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading session file {}", path.display()))?;
        let topology: StoredTopology =
            toml::from_str(&text).map_err(|e| TopologyError::InvalidToml(e.to_string()))?;
        if topology.vms.is_empty() {
            return Err(TopologyError::NoVms.into());
        }
        Ok(topology)
    }

    /// Names of all saved sessions, sorted.
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }

    /// Restore a topology: running VMs are recorded as existing, stopped
    /// ones are started, missing ones are provisioned in parallel
    /// (bounded at `min(5, missing)`).
    pub async fn restore<C: CloudClient, P: Provisioner>(
        &self,
        topology: &StoredTopology,
        cloud: &C,
        provisioner: &P,
        progress: &dyn ProgressSink,
    ) -> LoadResult {
        let mut result = LoadResult::default();
        let directory = VmDirectory::new(cloud);
        let mut to_create: Vec<VmSpec> = Vec::new();

        for entry in &topology.vms {
            match directory.get(&entry.name, &entry.resource_group).await {
                Ok(Some(existing)) => {
                    if existing.is_running() {
                        progress.success(&format!("{} already running", entry.name));
                        result.existing.push(entry.name.clone());
                    } else {
                        progress.step(&format!("{} exists but is stopped, starting...", entry.name));
                        match cloud.start_vm(&entry.name, &entry.resource_group).await {
                            Ok(()) => result.existing.push(entry.name.clone()),
                            Err(e) => result
                                .failed
                                .push((entry.name.clone(), format!("Failed to start VM: {e}"))),
                        }
                    }
                }
                Ok(None) => to_create.push(VmSpec {
                    name: entry.name.clone(),
                    resource_group: entry.resource_group.clone(),
                    location: entry.location.clone(),
                    size: entry.vm_size.clone(),
                    session_name: entry.session_name.clone(),
                }),
                Err(e) => result
                    .failed
                    .push((entry.name.clone(), format!("Failed to check VM status: {e}"))),
            }
        }

        if !to_create.is_empty() {
            progress.step(&format!("Provisioning {} VMs...", to_create.len()));
            let workers = MAX_PROVISION_WORKERS.min(to_create.len());
            let outcomes: Vec<(String, Result<VmRecord>)> = stream::iter(to_create.into_iter())
                .map(|spec| async move {
                    let name = spec.name.clone();
                    (name, provisioner.provision(&spec).await)
                })
                .buffer_unordered(workers)
                .collect()
                .await;

            for (name, outcome) in outcomes {
                match outcome {
                    Ok(record) => {
                        progress.success(&format!("provisioned {}", record.name));
                        result.created.push(record.name);
                    }
                    Err(e) => {
                        progress.warn(&format!("failed to provision {name}: {e}"));
                        result.failed.push((name, e.to_string()));
                    }
                }
            }
        }

        result
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::TimeZone as _;

    use super::*;
    use crate::application::ports::NullSink;
    use crate::application::services::test_support::{
        cloud_client_stub, impl_cloud_client_stubs, running_vm,
    };
    use crate::domain::vm::PowerState;
    use crate::infra::fs::read_mode;

    fn store(dir: &tempfile::TempDir) -> SessionStore {
        SessionStore::with_dir(dir.path().join("sessions"))
    }

    fn sample_pairs() -> Vec<(VmRecord, Vec<MultiplexerSession>)> {
        let mut vm = running_vm("vm-1", "1.2.3.4");
        vm.vm_size = "std_a".to_string();
        vec![(
            vm,
            vec![MultiplexerSession {
                session_name: "work".to_string(),
                windows: 3,
                attached: true,
            }],
        )]
    }

    fn saved_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save("dev", &sample_pairs(), "rg", saved_at()).expect("save");

        let loaded = s.load("dev").expect("load");
        assert_eq!(loaded.session.name, "dev");
        assert_eq!(loaded.session.resource_group, "rg");
        assert_eq!(loaded.vms.len(), 1);
        assert_eq!(loaded.vms[0].name, "vm-1");
        assert_eq!(loaded.vms[0].vm_size, "std_a");
        assert_eq!(loaded.vms[0].tmux_sessions.len(), 1);
        assert_eq!(loaded.vms[0].tmux_sessions[0].session_name, "work");
        assert_eq!(loaded.vms[0].tmux_sessions[0].windows, 3);
        assert!(loaded.vms[0].tmux_sessions[0].attached);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_0600_under_0700_dir() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        let path = s.save("dev", &sample_pairs(), "rg", saved_at()).expect("save");
        assert_eq!(read_mode(&path), Some(0o600));
        assert_eq!(read_mode(&dir.path().join("sessions")), Some(0o700));
    }

    #[test]
    fn save_rejects_invalid_names() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        assert!(s.save("", &sample_pairs(), "rg", saved_at()).is_err());
        assert!(s.save("../evil", &sample_pairs(), "rg", saved_at()).is_err());
        assert!(s.save("has space", &sample_pairs(), "rg", saved_at()).is_err());
    }

    #[test]
    fn load_missing_lists_available_sessions() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save("alpha", &sample_pairs(), "rg", saved_at()).expect("save");
        let err = s.load("beta").expect_err("missing");
        assert!(err.to_string().contains("alpha"), "got: {err}");
    }

    #[test]
    fn load_rejects_topology_without_vms() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        std::fs::create_dir_all(s.dir()).expect("dir");
        std::fs::write(
            s.dir().join("empty.toml"),
            "[session]\nname = \"empty\"\nsaved_at = \"2026-08-01T12:00:00Z\"\nresource_group = \"rg\"\n",
        )
        .expect("write");
        let err = s.load("empty").expect_err("no vms");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::NoVms)
        ));
    }

    #[test]
    fn load_rejects_missing_session_section() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        std::fs::create_dir_all(s.dir()).expect("dir");
        std::fs::write(s.dir().join("broken.toml"), "[[vms]]\nname = \"v\"\n").expect("write");
        let err = s.load("broken").expect_err("broken");
        assert!(matches!(
            err.downcast_ref::<TopologyError>(),
            Some(TopologyError::InvalidToml(_))
        ));
    }

    #[test]
    fn list_returns_sorted_names() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        s.save("zeta", &sample_pairs(), "rg", saved_at()).expect("save");
        s.save("alpha", &sample_pairs(), "rg", saved_at()).expect("save");
        assert_eq!(s.list(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    // ── restore ──────────────────────────────────────────────────────────

    struct RestoreCloud {
        /// VMs visible in the directory, by (name, power state string).
        visible: Vec<(&'static str, PowerState)>,
        start_fails: bool,
    }

    impl crate::application::ports::CloudClient for RestoreCloud {
        async fn list_vms(&self, _: &str, _: bool) -> Result<serde_json::Value> {
            let rows: Vec<serde_json::Value> = self
                .visible
                .iter()
                .map(|(name, state)| {
                    let power = match state {
                        PowerState::Running => "VM running",
                        _ => "VM deallocated",
                    };
                    serde_json::json!({
                        "name": name,
                        "resourceGroup": "rg",
                        "location": "eastus",
                        "powerState": power,
                    })
                })
                .collect();
            Ok(serde_json::Value::Array(rows))
        }
        async fn start_vm(&self, _: &str, _: &str) -> Result<()> {
            if self.start_fails {
                anyhow::bail!("quota exhausted")
            }
            Ok(())
        }
        impl_cloud_client_stubs!(
            stop_vm,
            activity_log,
            metric_average,
            update_vm_key,
            monthly_spend
        );
    }

    struct ScriptedProvisioner {
        fail: Vec<&'static str>,
    }

    impl Provisioner for ScriptedProvisioner {
        async fn provision(&self, spec: &VmSpec) -> Result<VmRecord> {
            if self.fail.iter().any(|f| *f == spec.name) {
                anyhow::bail!("Resource group creation failed: denied")
            }
            Ok(running_vm(&spec.name, "9.9.9.9"))
        }
    }

    fn topology(names: &[&str]) -> StoredTopology {
        StoredTopology {
            session: SessionMeta {
                name: "dev".to_string(),
                saved_at: "2026-08-01T12:00:00Z".to_string(),
                resource_group: "rg".to_string(),
            },
            vms: names
                .iter()
                .map(|name| TopologyVm {
                    name: (*name).to_string(),
                    resource_group: "rg".to_string(),
                    location: "eastus".to_string(),
                    vm_size: "std_a".to_string(),
                    session_name: None,
                    tmux_sessions: Vec::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn restore_classifies_existing_started_and_created() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        let cloud = RestoreCloud {
            visible: vec![("vm-run", PowerState::Running), ("vm-stop", PowerState::Stopped)],
            start_fails: false,
        };
        let provisioner = ScriptedProvisioner { fail: vec![] };
        let result = s
            .restore(&topology(&["vm-run", "vm-stop", "vm-new"]), &cloud, &provisioner, &NullSink)
            .await;

        assert_eq!(result.existing.len(), 2, "running + started");
        assert_eq!(result.created, vec!["vm-new".to_string()]);
        assert!(result.failed.is_empty());
        assert_eq!(result.success_count(), 3);
        assert_eq!(result.total(), 3);
    }

    #[tokio::test]
    async fn restore_records_start_failures() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        let cloud = RestoreCloud {
            visible: vec![("vm-stop", PowerState::Stopped)],
            start_fails: true,
        };
        let provisioner = ScriptedProvisioner { fail: vec![] };
        let result = s
            .restore(&topology(&["vm-stop"]), &cloud, &provisioner, &NullSink)
            .await;
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].1.contains("Failed to start VM"));
    }

    #[tokio::test]
    async fn restore_records_provisioning_failures() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let s = store(&dir);
        let cloud = RestoreCloud {
            visible: vec![],
            start_fails: false,
        };
        let provisioner = ScriptedProvisioner { fail: vec!["vm-bad"] };
        let result = s
            .restore(&topology(&["vm-good", "vm-bad"]), &cloud, &provisioner, &NullSink)
            .await;
        assert_eq!(result.created, vec!["vm-good".to_string()]);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].1.contains("Resource group creation failed"));
        assert_eq!(result.total(), 2);
    }
}
