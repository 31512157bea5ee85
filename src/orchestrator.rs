//! Lifecycle Orchestrator
//!
//! The only component that touches every other one. Owns the six public verbs
//! (`create`, `list`, `delete`, `cleanup_all`, `recover_state`, `show_network`),
//! serializes concurrent calls against the same container name, and guards IP
//! allocation with a single global lock since the pool is process-wide state.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::cgroup::CgroupManager;
use crate::error::RuntimeError;
use crate::model::{ContainerRecord, ContainerState};
use crate::network::{self, NetworkManager};
use crate::paths::PathStore;
use crate::planner::NamespacePlanner;
use crate::rootfs::{LocalBusyboxProvider, RootFsBuilder};
use crate::state::StateStore;
use crate::supervisor::{self, SpawnPlan};
use crate::validate;

/// Deadline for the entire `create` sequence, from validation through the post-setup
/// connectivity check.
pub const CREATE_DEADLINE: Duration = Duration::from_secs(90);

/// Everything a caller supplies to start a new container.
pub struct CreateRequest {
    pub name: String,
    pub memory_mb: u32,
    pub cpu_percent: u32,
    pub hostname: Option<String>,
    pub host_uid: u32,
    pub host_gid: u32,
    /// Path to the multi-call utility binary this container's rootfs is built from.
    pub busybox_path: PathBuf,
}

/// What `show_network` reports back.
#[derive(Debug, Clone)]
pub struct NetworkReport {
    pub ip_address: String,
    pub veth_host: String,
    pub veth_peer: String,
    pub netns: String,
}

/// Coordinates the other components through a container's full lifecycle.
pub struct Orchestrator {
    paths: PathStore,
    state: StateStore,
    locks: DashMap<String, Arc<Mutex<()>>>,
    ip_lock: Mutex<()>,
}

impl Orchestrator {
    /// Build an orchestrator rooted at `paths`.
    pub fn new(paths: PathStore) -> Self {
        let state = StateStore::new(paths.clone());
        Self {
            paths,
            state,
            locks: DashMap::new(),
            ip_lock: Mutex::new(()),
        }
    }

    /// The underlying path resolver.
    pub fn paths(&self) -> &PathStore {
        &self.paths
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn collect_in_use_ips(&self) -> Result<Vec<Ipv4Addr>, RuntimeError> {
        Ok(self
            .state
            .list()?
            .into_iter()
            .filter(|r| r.state != ContainerState::Dead)
            .filter_map(|r| r.ip_address.parse().ok())
            .collect())
    }

    /// Validate, provision, and start one container. On any failure, every resource
    /// created so far is torn down in reverse order before the error is returned.
    pub fn create(&self, req: CreateRequest) -> Result<ContainerRecord, RuntimeError> {
        validate::validate_name(&req.name)?;
        validate::validate_memory_mb(req.memory_mb)?;
        validate::validate_cpu_percent(req.cpu_percent)?;
        let hostname = req.hostname.clone().unwrap_or_else(|| req.name.clone());
        validate::validate_hostname(&hostname)?;

        let lock = self.lock_for(&req.name);
        let _guard = lock.lock().unwrap();

        if self.state.get(&req.name).is_ok() {
            return Err(RuntimeError::AlreadyExists(req.name.clone()));
        }

        let deadline = Instant::now() + CREATE_DEADLINE;
        let ip = {
            let _ip_guard = self.ip_lock.lock().unwrap();
            let in_use = self.collect_in_use_ips()?;
            network::allocate_ip(&in_use)?
        };

        let (veth_host, veth_peer) = ContainerRecord::veth_names(&req.name);
        let record = ContainerRecord {
            name: req.name.clone(),
            memory_mb: req.memory_mb,
            cpu_percent: req.cpu_percent,
            hostname,
            host_uid: req.host_uid,
            host_gid: req.host_gid,
            ip_address: ip.to_string(),
            veth_host,
            veth_peer,
            init_pid: None,
            state: ContainerState::Creating,
            created_at: Utc::now(),
        };

        self.paths
            .create_tree(&record.name)
            .map_err(|e| RuntimeError::RootfsSetupFailed(e.to_string()))?;
        self.state.insert(&record)?;

        if let Err(e) = self.provision(&record, &req, deadline) {
            warn!(container = %record.name, error = %e, "create failed, rolling back");
            self.teardown_best_effort(&record);
            let _ = self.state.remove(&record.name);
            return Err(e);
        }

        let mut running = record;
        running.state = ContainerState::Running;
        self.state.update(&running)?;
        info!(container = %running.name, ip = %running.ip_address, "container running");
        Ok(running)
    }

    fn check_deadline(&self, deadline: Instant, phase: &str) -> Result<(), RuntimeError> {
        if Instant::now() > deadline {
            Err(RuntimeError::Timeout(phase.to_string()))
        } else {
            Ok(())
        }
    }

    fn provision(
        &self,
        record: &ContainerRecord,
        req: &CreateRequest,
        deadline: Instant,
    ) -> Result<(), RuntimeError> {
        self.check_deadline(deadline, "rootfs")?;
        let provider = LocalBusyboxProvider::new(&req.busybox_path);
        let rootfs_dir = self.paths.rootfs_dir(&record.name);
        RootFsBuilder::new(&rootfs_dir, &provider).build(&record.hostname, &record.ip_address)?;

        self.check_deadline(deadline, "namespace plan")?;
        NamespacePlanner::new(&self.paths)
            .plan(&record.name, &record.hostname, record.host_uid, record.host_gid)
            .map_err(|e| RuntimeError::NamespaceSetupFailed(e.to_string()))?;

        self.check_deadline(deadline, "cgroup")?;
        let cgroups = CgroupManager::create(&record.name)?;
        cgroups.apply_limits(record.memory_mb, record.cpu_percent)?;

        self.check_deadline(deadline, "network")?;
        NetworkManager::setup(record)?;

        self.check_deadline(deadline, "spawn")?;
        let netns = ContainerRecord::netns_name(&record.name);
        let plan = SpawnPlan {
            rootfs: rootfs_dir,
            hostname: record.hostname.clone(),
            host_uid: record.host_uid,
            host_gid: record.host_gid,
        };
        let supervised = supervisor::spawn_in_netns(plan, &netns)
            .map_err(|e| RuntimeError::SpawnFailed(e.to_string()))?;
        cgroups.add_process(supervised.pid)?;

        let mut with_pid = record.clone();
        with_pid.init_pid = Some(supervised.pid);
        self.state.update(&with_pid)?;

        // Dropping the handle here detaches the reaper thread; it keeps running to
        // completion in the background and does not need to be joined by this call.
        drop(supervised);
        Ok(())
    }

    /// Undo whatever of rootfs/namespaces/cgroups/network got built for `record`,
    /// tolerating every individual failure (the point is to leave as little behind as
    /// possible, not to succeed completely).
    fn teardown_best_effort(&self, record: &ContainerRecord) {
        for (step, result) in NetworkManager::teardown(record) {
            if let Err(e) = result {
                warn!(container = %record.name, step, error = %e, "network teardown step failed");
            }
        }

        if let Ok(cgroups) = CgroupManager::open(&record.name) {
            let _ = cgroups.kill_all();
            let _ = cgroups.destroy();
        }

        let _ = self.paths.remove_tree(&record.name);
    }

    /// List every known container record.
    pub fn list(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        Ok(self.state.list()?)
    }

    /// SIGTERM the init process, wait out the grace period, SIGKILL, then release every
    /// backing resource and remove the record. Deleting an unknown name is a no-op, not
    /// an error: the caller's desired end state (no such container) already holds.
    pub fn delete(&self, name: &str) -> Result<(), RuntimeError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().unwrap();

        let mut record = match self.state.get(name) {
            Ok(record) => record,
            Err(_) => return Ok(()),
        };
        record.state = ContainerState::Terminating;
        self.state.update(&record)?;

        if let Some(pid) = record.init_pid {
            terminate_pid(pid);
        }

        if let Ok(cgroups) = CgroupManager::open(name) {
            let _ = cgroups.kill_all();
            let _ = cgroups.destroy();
        }

        for (step, result) in NetworkManager::teardown(&record) {
            if let Err(e) = result {
                warn!(container = name, step, error = %e, "network teardown step failed");
            }
        }

        self.paths
            .remove_tree(name)
            .map_err(|e| RuntimeError::RootfsSetupFailed(e.to_string()))?;

        record.state = ContainerState::Dead;
        let _ = self.state.remove(name);
        self.locks.remove(name);
        info!(container = name, "container deleted");
        Ok(())
    }

    /// Reclassify every record and delete the ones found dead or orphaned, then sweep
    /// kernel resources that outlived their own `config.json` entirely (a host crash
    /// mid-`create`, or an operator `rm -rf` of the container directory, leaves cgroups
    /// and netns with no record to name them — see [`Self::sweep_orphaned_kernel_resources`]).
    pub fn cleanup_all(&self) -> Result<Vec<String>, RuntimeError> {
        let mut removed = Vec::new();
        let mut surviving = HashSet::new();
        for record in self.state.list()? {
            let classified = self.state.classify(&record);
            if classified == ContainerState::Orphaned || classified == ContainerState::Dead {
                if let Err(e) = self.delete(&record.name) {
                    warn!(container = %record.name, error = %e, "cleanup_all: delete failed");
                    surviving.insert(record.name);
                    continue;
                }
                removed.push(record.name);
            } else {
                surviving.insert(record.name);
            }
        }
        self.sweep_orphaned_kernel_resources(&surviving);
        Ok(removed)
    }

    /// Reclassify every record in place, persisting any state that changed. Returns the
    /// full, now-current set of records. Unlike [`Self::cleanup_all`], healthy
    /// containers are left running; only kernel resources with no matching record at
    /// all are swept.
    pub fn recover_state(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        let mut records = self.state.list()?;
        for record in records.iter_mut() {
            let classified = self.state.classify(record);
            if classified != record.state {
                record.state = classified;
                self.state.update(record)?;
            }
        }
        let known: HashSet<String> = records.iter().map(|r| r.name.clone()).collect();
        self.sweep_orphaned_kernel_resources(&known);
        Ok(records)
    }

    /// Tear down any cgroup or netns named `container-<name>` where `<name>` is not in
    /// `known`. This is the only way to recover resources a crash left behind *after*
    /// their `config.json` has already disappeared — [`StateStore::classify`] can only
    /// orphan a record that still exists; it cannot discover a kernel resource with no
    /// record left to classify. Best-effort: every failure is logged, never propagated.
    fn sweep_orphaned_kernel_resources(&self, known: &HashSet<String>) {
        match CgroupManager::list_container_names() {
            Ok(names) => {
                for name in names {
                    if known.contains(&name) {
                        continue;
                    }
                    if let Ok(cgroups) = CgroupManager::open(&name) {
                        let _ = cgroups.kill_all();
                        if let Err(e) = cgroups.destroy() {
                            warn!(container = %name, error = %e, "orphan cgroup teardown failed");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not enumerate cgroups for orphan sweep"),
        }

        for name in NetworkManager::list_known_netns() {
            if known.contains(&name) {
                continue;
            }
            for (step, result) in NetworkManager::teardown_by_name(&name) {
                if let Err(e) = result {
                    warn!(container = %name, step, error = %e, "orphan network teardown step failed");
                }
            }
        }
    }

    /// Report a single container's networking, independent of reachability.
    pub fn show_network(&self, name: &str) -> Result<NetworkReport, RuntimeError> {
        let record = self.state.get(name)?;
        Ok(NetworkReport {
            ip_address: record.ip_address,
            veth_host: record.veth_host,
            veth_peer: record.veth_peer,
            netns: ContainerRecord::netns_name(name),
        })
    }
}

#[cfg(target_os = "linux")]
fn terminate_pid(pid: u32) {
    // SAFETY: pid was read from a persisted record written by this runtime; kill(2)
    // validates the target and is a no-op if the process has already exited.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    std::thread::sleep(crate::supervisor::GRACE_PERIOD);
    // SAFETY: same pid as above.
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(target_os = "linux"))]
fn terminate_pid(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathStore::with_root(dir.path());
        (Orchestrator::new(paths), dir)
    }

    #[test]
    fn create_rejects_invalid_memory_without_touching_disk() {
        let (orch, _guard) = orchestrator();
        let req = CreateRequest {
            name: "alpha".into(),
            memory_mb: 1,
            cpu_percent: 10,
            hostname: None,
            host_uid: 1000,
            host_gid: 1000,
            busybox_path: PathBuf::from("/nonexistent/busybox"),
        };

        let err = orch.create(req).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument(_)));
        assert!(orch.list().unwrap().is_empty());
    }

    #[test]
    fn delete_missing_name_is_a_noop() {
        let (orch, _guard) = orchestrator();
        assert!(orch.delete("ghost").is_ok());
    }

    #[test]
    fn show_network_missing_name_is_not_found() {
        let (orch, _guard) = orchestrator();
        assert!(matches!(
            orch.show_network("ghost"),
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[test]
    fn cleanup_all_on_empty_state_is_a_noop() {
        let (orch, _guard) = orchestrator();
        assert_eq!(orch.cleanup_all().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn recover_state_is_idempotent_on_empty_state() {
        let (orch, _guard) = orchestrator();
        assert_eq!(orch.recover_state().unwrap().len(), 0);
        assert_eq!(orch.recover_state().unwrap().len(), 0);
    }
}
