//! Canonical On-disk Layout (PathStore)
//!
//! ```text
//! <root>/<name>/
//!   config.json
//!   container.pid
//!   rootfs/
//!   namespaces/{pid,mount,uts,ipc,user}.conf
//!   cgroups/paths.conf
//!   network/{ip,veth}.conf
//! ```
//!
//! `<root>` defaults to [`DEFAULT_STATE_ROOT`] and is parameterizable for tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default state root; the shipped default for every deployment.
pub const DEFAULT_STATE_ROOT: &str = "/tmp/containers";

/// Directory mode applied to every directory this module creates.
const DIR_MODE: u32 = 0o755;

/// Resolves every path that belongs to a single container under a state root.
#[derive(Debug, Clone)]
pub struct PathStore {
    root: PathBuf,
}

impl PathStore {
    /// Build a `PathStore` rooted at the default state root (`/tmp/containers`).
    pub fn default_root() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_STATE_ROOT),
        }
    }

    /// Build a `PathStore` rooted at an arbitrary directory (used by tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The state root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<name>`
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// `<root>/<name>/config.json`
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("config.json")
    }

    /// `<root>/<name>/container.pid`
    pub fn pid_path(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("container.pid")
    }

    /// `<root>/<name>/rootfs`
    pub fn rootfs_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("rootfs")
    }

    /// `<root>/<name>/namespaces`
    pub fn namespaces_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("namespaces")
    }

    /// `<root>/<name>/namespaces/<kind>.conf`
    pub fn namespace_conf(&self, name: &str, kind: &str) -> PathBuf {
        self.namespaces_dir(name).join(format!("{}.conf", kind))
    }

    /// `<root>/<name>/cgroups`
    pub fn cgroups_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("cgroups")
    }

    /// `<root>/<name>/cgroups/paths.conf`
    pub fn cgroups_conf(&self, name: &str) -> PathBuf {
        self.cgroups_dir(name).join("paths.conf")
    }

    /// `<root>/<name>/network`
    pub fn network_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join("network")
    }

    /// `<root>/<name>/network/ip.conf`
    pub fn network_ip_conf(&self, name: &str) -> PathBuf {
        self.network_dir(name).join("ip.conf")
    }

    /// `<root>/<name>/network/veth.conf`
    pub fn network_veth_conf(&self, name: &str) -> PathBuf {
        self.network_dir(name).join("veth.conf")
    }

    /// Create the full directory tree for a new container. Idempotent.
    pub fn create_tree(&self, name: &str) -> io::Result<()> {
        for dir in [
            self.container_dir(name),
            self.rootfs_dir(name),
            self.namespaces_dir(name),
            self.cgroups_dir(name),
            self.network_dir(name),
        ] {
            create_dir_mode(&dir)?;
        }
        Ok(())
    }

    /// Remove a container's entire directory tree. Tolerates a missing directory.
    pub fn remove_tree(&self, name: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.container_dir(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List every container name with a `config.json` under this root.
    pub fn list_names(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.path().join("config.json").is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Atomically write `contents` to `config.json` via temp-file-then-rename.
    pub fn write_config_atomic(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        let final_path = self.config_path(name);
        let tmp_path = self.container_dir(name).join(".config.json.tmp");

        fs::write(&tmp_path, contents)?;
        fs::rename(&tmp_path, &final_path)
    }
}

fn create_dir_mode(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (PathStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (PathStore::with_root(dir.path()), dir)
    }

    #[test]
    fn create_tree_makes_every_subdir() {
        let (store, _guard) = temp_store();
        store.create_tree("alpha").unwrap();

        assert!(store.rootfs_dir("alpha").is_dir());
        assert!(store.namespaces_dir("alpha").is_dir());
        assert!(store.cgroups_dir("alpha").is_dir());
        assert!(store.network_dir("alpha").is_dir());
    }

    #[test]
    fn remove_tree_is_idempotent_on_missing_dir() {
        let (store, _guard) = temp_store();
        assert!(store.remove_tree("never-created").is_ok());
    }

    #[test]
    fn write_config_atomic_leaves_no_temp_file() {
        let (store, _guard) = temp_store();
        store.create_tree("alpha").unwrap();
        store.write_config_atomic("alpha", b"{}").unwrap();

        assert!(store.config_path("alpha").is_file());
        assert!(!store.container_dir("alpha").join(".config.json.tmp").exists());
    }

    #[test]
    fn list_names_only_returns_dirs_with_config() {
        let (store, _guard) = temp_store();
        store.create_tree("has-config").unwrap();
        store.write_config_atomic("has-config", b"{}").unwrap();
        store.create_tree("no-config").unwrap();

        let names = store.list_names().unwrap();
        assert_eq!(names, vec!["has-config".to_string()]);
    }

    #[test]
    fn list_names_on_missing_root_is_empty() {
        let store = PathStore::with_root("/nonexistent/path/for/test");
        assert_eq!(store.list_names().unwrap(), Vec::<String>::new());
    }
}
