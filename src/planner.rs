//! Namespace Planner
//!
//! Writes the five key=value descriptor files under `namespaces/` that the Process
//! Supervisor reads to build its namespace flag set and drive post-spawn setup. This
//! module performs no `unshare`/`clone` calls itself — it only records the plan.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::paths::PathStore;

/// IPC tunables recorded for documentation purposes; enforcement is via the IPC
/// namespace itself, not these values.
pub const IPC_SHMMAX_BYTES: u64 = 64 * 1024 * 1024;
pub const IPC_SEMMAX: u32 = 32_000;
pub const IPC_MSGMAX: u32 = 16;

/// UTS domainname every container is planned with.
pub const DOMAIN_NAME: &str = "container.local";

/// Namespace Planner errors.
#[derive(Debug)]
pub enum PlannerError {
    /// Writing a descriptor file failed.
    IoError(String),
}

impl fmt::Display for PlannerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannerError::IoError(msg) => write!(f, "namespace planner I/O error: {}", msg),
        }
    }
}

impl From<std::io::Error> for PlannerError {
    fn from(e: std::io::Error) -> Self {
        PlannerError::IoError(e.to_string())
    }
}

/// Writes the five namespace descriptor files for a container.
pub struct NamespacePlanner<'a> {
    paths: &'a PathStore,
}

impl<'a> NamespacePlanner<'a> {
    /// Plan against an existing [`PathStore`].
    pub fn new(paths: &'a PathStore) -> Self {
        Self { paths }
    }

    /// Write all five descriptors for `name`.
    pub fn plan(
        &self,
        name: &str,
        hostname: &str,
        host_uid: u32,
        host_gid: u32,
    ) -> Result<(), PlannerError> {
        self.write_pid(name)?;
        self.write_mount(name)?;
        self.write_uts(name, hostname)?;
        self.write_ipc(name)?;
        self.write_user(name, host_uid, host_gid)?;
        Ok(())
    }

    fn write_pid(&self, name: &str) -> Result<(), PlannerError> {
        write_conf(
            &self.paths.namespace_conf(name, "pid"),
            &[
                ("init_process", "/bin/busybox"),
                ("init_args", "sh"),
            ],
        )
    }

    fn write_mount(&self, name: &str) -> Result<(), PlannerError> {
        let rootfs = self.paths.rootfs_dir(name);
        write_conf(
            &self.paths.namespace_conf(name, "mount"),
            &[("rootfs", &rootfs.to_string_lossy())],
        )
    }

    fn write_uts(&self, name: &str, hostname: &str) -> Result<(), PlannerError> {
        write_conf(
            &self.paths.namespace_conf(name, "uts"),
            &[("hostname", hostname), ("domainname", DOMAIN_NAME)],
        )
    }

    fn write_ipc(&self, name: &str) -> Result<(), PlannerError> {
        write_conf(
            &self.paths.namespace_conf(name, "ipc"),
            &[
                ("shmmax", &IPC_SHMMAX_BYTES.to_string()),
                ("semmax", &IPC_SEMMAX.to_string()),
                ("msgmax", &IPC_MSGMAX.to_string()),
            ],
        )
    }

    fn write_user(&self, name: &str, host_uid: u32, host_gid: u32) -> Result<(), PlannerError> {
        write_conf(
            &self.paths.namespace_conf(name, "user"),
            &[
                ("host_uid", &host_uid.to_string()),
                ("host_gid", &host_gid.to_string()),
                ("uid_map", &format!("0 {} 1", host_uid)),
                ("gid_map", &format!("0 {} 1", host_gid)),
            ],
        )
    }
}

/// Read a single descriptor file back into key=value pairs, for the Supervisor.
pub fn read_conf(path: &Path) -> Result<Vec<(String, String)>, PlannerError> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

fn write_conf(path: &Path, pairs: &[(&str, &str)]) -> Result<(), PlannerError> {
    let mut file = fs::File::create(path)?;
    for (key, value) in pairs {
        writeln!(file, "{}={}", key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_writes_all_five_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathStore::with_root(dir.path());
        paths.create_tree("alpha").unwrap();

        let planner = NamespacePlanner::new(&paths);
        planner.plan("alpha", "alpha", 1000, 1000).unwrap();

        for kind in ["pid", "mount", "uts", "ipc", "user"] {
            assert!(paths.namespace_conf("alpha", kind).is_file(), "missing {}", kind);
        }
    }

    #[test]
    fn user_descriptor_records_identity_map() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathStore::with_root(dir.path());
        paths.create_tree("alpha").unwrap();

        let planner = NamespacePlanner::new(&paths);
        planner.plan("alpha", "alpha", 1000, 1000).unwrap();

        let pairs = read_conf(&paths.namespace_conf("alpha", "user")).unwrap();
        assert!(pairs.contains(&("uid_map".to_string(), "0 1000 1".to_string())));
    }

    #[test]
    fn mount_descriptor_records_rootfs_path() {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathStore::with_root(dir.path());
        paths.create_tree("alpha").unwrap();

        let planner = NamespacePlanner::new(&paths);
        planner.plan("alpha", "alpha", 0, 0).unwrap();

        let pairs = read_conf(&paths.namespace_conf("alpha", "mount")).unwrap();
        let rootfs = pairs.iter().find(|(k, _)| k == "rootfs").unwrap();
        assert!(rootfs.1.ends_with("rootfs"));
    }
}
