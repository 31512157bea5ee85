//! State Store
//!
//! Persists one [`ContainerRecord`] per container as `config.json` under the
//! [`PathStore`], and classifies records as orphaned when their backing kernel
//! resources can no longer be confirmed live.

use std::fmt;
use std::path::Path;

use crate::cgroup::CgroupManager;
use crate::model::{ContainerRecord, ContainerState};
use crate::network::NetworkManager;
use crate::paths::PathStore;

/// State Store errors.
#[derive(Debug)]
pub enum StateError {
    /// No record exists for the given name.
    NotFound(String),
    /// A record already exists for the given name.
    AlreadyExists(String),
    /// The record on disk could not be parsed.
    Corrupt(String),
    /// Underlying I/O failure.
    IoError(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NotFound(name) => write!(f, "no record for {}", name),
            StateError::AlreadyExists(name) => write!(f, "record already exists for {}", name),
            StateError::Corrupt(msg) => write!(f, "corrupt record: {}", msg),
            StateError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        StateError::IoError(e.to_string())
    }
}

/// Reads and writes [`ContainerRecord`]s under a [`PathStore`].
pub struct StateStore {
    paths: PathStore,
}

impl StateStore {
    /// Wrap an existing [`PathStore`].
    pub fn new(paths: PathStore) -> Self {
        Self { paths }
    }

    /// The underlying path resolver.
    pub fn paths(&self) -> &PathStore {
        &self.paths
    }

    /// Write a new record. Fails if a record for this name already exists.
    pub fn insert(&self, record: &ContainerRecord) -> Result<(), StateError> {
        if self.paths.config_path(&record.name).is_file() {
            return Err(StateError::AlreadyExists(record.name.clone()));
        }
        self.write(record)
    }

    /// Overwrite an existing record in place (state transitions, PID updates).
    pub fn update(&self, record: &ContainerRecord) -> Result<(), StateError> {
        if !self.paths.config_path(&record.name).is_file() {
            return Err(StateError::NotFound(record.name.clone()));
        }
        self.write(record)
    }

    fn write(&self, record: &ContainerRecord) -> Result<(), StateError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| StateError::Corrupt(e.to_string()))?;
        self.paths.write_config_atomic(&record.name, &json)?;
        Ok(())
    }

    /// Read a single record by name.
    pub fn get(&self, name: &str) -> Result<ContainerRecord, StateError> {
        let path = self.paths.config_path(name);
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StateError::NotFound(name.to_string())
            } else {
                StateError::IoError(e.to_string())
            }
        })?;
        serde_json::from_str(&contents).map_err(|e| StateError::Corrupt(e.to_string()))
    }

    /// Read every record under the state root, skipping entries that fail to parse.
    pub fn list(&self) -> Result<Vec<ContainerRecord>, StateError> {
        let mut records = Vec::new();
        for name in self.paths.list_names()? {
            if let Ok(record) = self.get(&name) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Remove a record's config (the directory tree removal is the caller's job, via
    /// [`PathStore::remove_tree`], once every backing resource has been released).
    pub fn remove(&self, name: &str) -> Result<(), StateError> {
        self.paths.remove_tree(name)?;
        Ok(())
    }

    /// Classify a record as orphaned if its process, cgroups, netns, or host veth
    /// cannot be confirmed live. Does not mutate the stored record; callers persist
    /// the reclassified state via [`update`](Self::update) if it changed.
    pub fn classify(&self, record: &ContainerRecord) -> ContainerState {
        if record.state == ContainerState::Dead {
            return ContainerState::Dead;
        }

        if let Some(pid) = record.init_pid {
            if !Path::new(&format!("/proc/{}", pid)).is_dir() {
                return ContainerState::Orphaned;
            }
        }

        if CgroupManager::open(&record.name).is_err() {
            return ContainerState::Orphaned;
        }

        if !NetworkManager::netns_exists(&record.name) {
            return ContainerState::Orphaned;
        }

        if !NetworkManager::veth_exists(&record.veth_host) {
            return ContainerState::Orphaned;
        }

        record.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(name: &str) -> ContainerRecord {
        ContainerRecord {
            name: name.to_string(),
            memory_mb: 128,
            cpu_percent: 25,
            hostname: name.to_string(),
            host_uid: 0,
            host_gid: 0,
            ip_address: "10.0.0.10".into(),
            veth_host: format!("veth-{}", name),
            veth_peer: format!("veth-{}-peer", name),
            init_pid: None,
            state: ContainerState::Creating,
            created_at: Utc::now(),
        }
    }

    fn store() -> (StateStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathStore::with_root(dir.path());
        (StateStore::new(paths), dir)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let (store, _guard) = store();
        let record = sample("alpha");
        store.paths().create_tree("alpha").unwrap();
        store.insert(&record).unwrap();

        let back = store.get("alpha").unwrap();
        assert_eq!(back.ip_address, "10.0.0.10");
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let (store, _guard) = store();
        let record = sample("alpha");
        store.paths().create_tree("alpha").unwrap();
        store.insert(&record).unwrap();

        assert!(matches!(
            store.insert(&record),
            Err(StateError::AlreadyExists(_))
        ));
    }

    #[test]
    fn get_missing_name_is_not_found() {
        let (store, _guard) = store();
        assert!(matches!(store.get("ghost"), Err(StateError::NotFound(_))));
    }

    #[test]
    fn list_skips_nothing_when_all_valid() {
        let (store, _guard) = store();
        for name in ["a", "b"] {
            store.paths().create_tree(name).unwrap();
            store.insert(&sample(name)).unwrap();
        }
        let mut names: Vec<_> = store.list().unwrap().into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn classify_flags_missing_pid_as_orphaned() {
        let (store, _guard) = store();
        let mut record = sample("alpha");
        record.init_pid = Some(999_999_999);
        record.state = ContainerState::Running;

        assert_eq!(store.classify(&record), ContainerState::Orphaned);
    }

    #[test]
    fn classify_flags_running_record_without_backing_resources_as_orphaned() {
        // No real cgroup, netns, or veth named after "alpha" exists in this sandbox, so
        // a record with no init_pid falls through the pid check and must be orphaned by
        // whichever of cgroup/netns/veth it hits first.
        let (store, _guard) = store();
        let mut record = sample("alpha");
        record.init_pid = None;
        record.state = ContainerState::Running;

        assert_eq!(store.classify(&record), ContainerState::Orphaned);
    }

    #[test]
    fn classify_leaves_dead_alone() {
        let (store, _guard) = store();
        let mut record = sample("alpha");
        record.state = ContainerState::Dead;
        assert_eq!(store.classify(&record), ContainerState::Dead);
    }
}
