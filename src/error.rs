//! Crate-wide Error Model
//!
//! Every component (`cgroup`, `namespace`, `rootfs`, `network`, `state`) returns its own
//! typed error. The orchestrator wraps whichever one it receives into a [`RuntimeError`],
//! attaching the verb and container name that were in flight, and maps it to a process
//! exit code at the CLI boundary.

use core::fmt;

use crate::cgroup::CgroupError;
use crate::namespace::NamespaceError;
use crate::network::NetworkError;
use crate::rootfs::RootFsError;
use crate::state::StateError;

/// Every failure mode the runtime can surface to a caller.
#[derive(Debug)]
pub enum RuntimeError {
    /// User input out of range or malformed, naming the offending field.
    InvalidArgument(String),
    /// The runtime is not running as root.
    PermissionDenied,
    /// A required kernel facility (cgroups, netns, unshare) is absent.
    KernelFacilityUnavailable(String),
    /// A bounded resource (IP pool, inodes) was exhausted.
    ResourceExhausted(String),
    /// `create` was called with a name already in use.
    AlreadyExists(String),
    /// A lookup verb was called with an unknown name.
    NotFound(String),
    /// The init process could not be started, or died during setup before exec.
    SpawnFailed(String),
    /// Rootfs preparation failed at the named step.
    RootfsSetupFailed(String),
    /// Namespace preparation failed for the named namespace kind.
    NamespaceSetupFailed(String),
    /// Cgroup preparation failed for the named controller.
    CgroupSetupFailed(String),
    /// Network wiring failed at the named step.
    NetworkSetupFailed(String),
    /// Post-setup connectivity verification failed.
    NetworkUnreachable,
    /// A phase exceeded its deadline.
    Timeout(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::InvalidArgument(field) => write!(f, "invalid argument: {}", field),
            RuntimeError::PermissionDenied => write!(f, "permission denied: must run as root"),
            RuntimeError::KernelFacilityUnavailable(facility) => {
                write!(f, "kernel facility unavailable: {}", facility)
            }
            RuntimeError::ResourceExhausted(kind) => write!(f, "resource exhausted: {}", kind),
            RuntimeError::AlreadyExists(name) => write!(f, "container already exists: {}", name),
            RuntimeError::NotFound(name) => write!(f, "container not found: {}", name),
            RuntimeError::SpawnFailed(reason) => write!(f, "spawn failed: {}", reason),
            RuntimeError::RootfsSetupFailed(step) => write!(f, "rootfs setup failed: {}", step),
            RuntimeError::NamespaceSetupFailed(kind) => {
                write!(f, "namespace setup failed: {}", kind)
            }
            RuntimeError::CgroupSetupFailed(ctrl) => write!(f, "cgroup setup failed: {}", ctrl),
            RuntimeError::NetworkSetupFailed(step) => write!(f, "network setup failed: {}", step),
            RuntimeError::NetworkUnreachable => write!(f, "network unreachable after setup"),
            RuntimeError::Timeout(phase) => write!(f, "timeout during: {}", phase),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<CgroupError> for RuntimeError {
    fn from(e: CgroupError) -> Self {
        match e {
            CgroupError::CgroupV1NotAvailable | CgroupError::ControllerNotEnabled(_) => {
                RuntimeError::KernelFacilityUnavailable(e.to_string())
            }
            CgroupError::PermissionDenied => RuntimeError::PermissionDenied,
            other => RuntimeError::CgroupSetupFailed(other.to_string()),
        }
    }
}

impl From<NamespaceError> for RuntimeError {
    fn from(e: NamespaceError) -> Self {
        match e {
            NamespaceError::PermissionDenied => RuntimeError::PermissionDenied,
            NamespaceError::NotSupported => {
                RuntimeError::KernelFacilityUnavailable("unshare/clone".into())
            }
            other => RuntimeError::NamespaceSetupFailed(other.to_string()),
        }
    }
}

impl From<RootFsError> for RuntimeError {
    fn from(e: RootFsError) -> Self {
        match e {
            RootFsError::PermissionDenied => RuntimeError::PermissionDenied,
            other => RuntimeError::RootfsSetupFailed(other.to_string()),
        }
    }
}

impl From<NetworkError> for RuntimeError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::Unreachable => RuntimeError::NetworkUnreachable,
            NetworkError::IpPoolExhausted => {
                RuntimeError::ResourceExhausted("10.0.0.0/24 address pool".into())
            }
            NetworkError::IpCommandUnavailable => {
                RuntimeError::KernelFacilityUnavailable("ip(8)".into())
            }
            other => RuntimeError::NetworkSetupFailed(other.to_string()),
        }
    }
}

impl From<StateError> for RuntimeError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(name) => RuntimeError::NotFound(name),
            StateError::AlreadyExists(name) => RuntimeError::AlreadyExists(name),
            other => RuntimeError::RootfsSetupFailed(other.to_string()),
        }
    }
}

/// Map a [`RuntimeError`] to the process exit code documented in the CLI surface.
pub fn exit_code(err: &RuntimeError) -> i32 {
    match err {
        RuntimeError::InvalidArgument(_) => 2,
        RuntimeError::PermissionDenied => 3,
        RuntimeError::KernelFacilityUnavailable(_) => 4,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failing_field() {
        let err = RuntimeError::InvalidArgument("memory_mb".into());
        assert!(err.to_string().contains("memory_mb"));

        let err = RuntimeError::CgroupSetupFailed("memory".into());
        assert!(err.to_string().contains("memory"));

        let err = RuntimeError::Timeout("create".into());
        assert!(err.to_string().contains("create"));
    }

    #[test]
    fn exit_codes_match_cli_table() {
        assert_eq!(exit_code(&RuntimeError::InvalidArgument("x".into())), 2);
        assert_eq!(exit_code(&RuntimeError::PermissionDenied), 3);
        assert_eq!(
            exit_code(&RuntimeError::KernelFacilityUnavailable("cgroups".into())),
            4
        );
        assert_eq!(exit_code(&RuntimeError::NetworkUnreachable), 1);
    }

    #[test]
    fn cgroup_permission_denied_maps_through() {
        let err: RuntimeError = CgroupError::PermissionDenied.into();
        assert!(matches!(err, RuntimeError::PermissionDenied));
    }
}
