//! # cellrt
//!
//! **A minimal container runtime with direct kernel control.**
//!
//! A Rust library for running isolated processes with direct cgroup v1 and namespace
//! manipulation, without relying on Docker, Podman, or systemd.
//!
//! ## Features
//!
//! | Component | Description |
//! |-----------|-------------|
//! | **Direct Cgroup v1** | Paired `memory`/`cpu` hierarchies under `/sys/fs/cgroup` |
//! | **Namespace Isolation** | `clone(2)`, `pivot_root(2)`, user/mount/pid/uts/ipc namespaces |
//! | **Networking** | Per-container veth pair and netns, wired via `ip`(8) |
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                         │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                                │
//! │   create()                                                    │
//! │      │                                                        │
//! │      ▼                                                        │
//! │  ┌──────────┐  ┌───────────┐  ┌─────────┐  ┌───────────────┐  │
//! │  │  RootFs  │  │ Namespace │  │ Cgroup  │  │    Network    │  │
//! │  │ Builder  │  │  Planner  │  │ Manager │  │    Manager    │  │
//! │  └────┬─────┘  └─────┬─────┘  └────┬────┘  └───────┬───────┘  │
//! │       └──────────────┴─────────────┴───────────────┘          │
//! │                           ▼                                   │
//! │                   Process Supervisor                          │
//! │                           │                                   │
//! │                           ▼                                   │
//! │                    State Store (config.json)                 │
//! │                                                                │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cellrt::prelude::*;
//!
//! let paths = PathStore::default_root();
//! let orchestrator = Orchestrator::new(paths);
//!
//! let record = orchestrator.create(CreateRequest {
//!     name: "my-container".into(),
//!     memory_mb: 256,
//!     cpu_percent: 50,
//!     hostname: None,
//!     host_uid: 1000,
//!     host_gid: 1000,
//!     busybox_path: "/usr/bin/busybox".into(),
//! })?;
//!
//! orchestrator.delete(&record.name)?;
//! ```
//!
//! ## Requirements
//!
//! - Linux kernel with cgroup v1 (`memory` and `cpu` controllers mounted separately)
//! - Root privileges (`CAP_SYS_ADMIN`)
//! - `ip`(8) (iproute2) on `PATH`

pub mod cgroup;
pub mod error;
pub mod model;
pub mod namespace;
pub mod network;
pub mod orchestrator;
pub mod paths;
pub mod planner;
pub mod rootfs;
pub mod state;
pub mod supervisor;
pub mod validate;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::cgroup::{CgroupError, CgroupManager, CgroupReport, CpuConfig, MemoryConfig};
    pub use crate::error::{exit_code, RuntimeError};
    pub use crate::model::{ContainerRecord, ContainerState};
    pub use crate::namespace::{pivot_root, NamespaceFlags, Namespaces};
    pub use crate::network::{NetworkError, NetworkManager};
    pub use crate::orchestrator::{CreateRequest, NetworkReport, Orchestrator};
    pub use crate::paths::PathStore;
    pub use crate::rootfs::{mount_dev, mount_proc, LocalBusyboxProvider, RootFsBuilder};
    pub use crate::state::{StateError, StateStore};
}

pub use prelude::*;

/// Result type for orchestrator-level operations.
pub type Result<T> = core::result::Result<T, error::RuntimeError>;

/// Process ID type.
pub type Pid = u32;

/// Default cgroup v1 `memory` hierarchy mount point.
pub const MEMORY_CGROUP_ROOT: &str = cgroup::MEMORY_HIERARCHY_ROOT;

/// Default cgroup v1 `cpu` hierarchy mount point.
pub const CPU_CGROUP_ROOT: &str = cgroup::CPU_HIERARCHY_ROOT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cgroup_roots_match_their_module_constants() {
        assert_eq!(MEMORY_CGROUP_ROOT, "/sys/fs/cgroup/memory");
        assert_eq!(CPU_CGROUP_ROOT, "/sys/fs/cgroup/cpu");
    }
}
