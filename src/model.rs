//! Container Data Model
//!
//! The persistent record the State Store reads and writes, and the states a
//! container's lifecycle moves through. This module owns no I/O; the Orchestrator
//! mutates instances of [`ContainerRecord`] and hands them to [`crate::state`] for
//! persistence.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a container record currently sits in its lifecycle.
///
/// Transitions: `Creating -> Running -> Terminating -> Dead`. A crash anywhere in that
/// chain may leave the on-disk record `Orphaned` instead, discovered the next time
/// `recover-state` or `cleanup-all` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    /// Record written, resources not yet fully provisioned.
    Creating,
    /// Init process spawned and enrolled in its cgroups.
    Running,
    /// SIGTERM sent, waiting out the grace period.
    Terminating,
    /// Init process has exited and resources are released.
    Dead,
    /// Config present but one or more backing resources (process, cgroup, netns,
    /// veth) could not be confirmed live.
    Orphaned,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Creating => "creating",
            ContainerState::Running => "running",
            ContainerState::Terminating => "terminating",
            ContainerState::Dead => "dead",
            ContainerState::Orphaned => "orphaned",
        };
        write!(f, "{}", s)
    }
}

/// One container, as persisted to `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// 1-64 chars, `[A-Za-z0-9_-]+`, unique process-wide.
    pub name: String,
    /// Memory limit in MiB, `[64, 2048]`.
    pub memory_mb: u32,
    /// CPU bandwidth share as a percentage of one CFS period, `[1, 100]`.
    pub cpu_percent: u32,
    /// Hostname set inside the UTS namespace; defaults to `name`.
    pub hostname: String,
    /// Host-side uid mapped to uid 0 inside the user namespace.
    pub host_uid: u32,
    /// Host-side gid mapped to gid 0 inside the user namespace.
    pub host_gid: u32,
    /// Assigned address within `10.0.0.0/24`.
    pub ip_address: String,
    /// Host-side veth link name.
    pub veth_host: String,
    /// Container-side veth link name (before it is renamed to `eth0` inside the ns).
    pub veth_peer: String,
    /// PID of the init process, once spawned.
    pub init_pid: Option<u32>,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ContainerRecord {
    /// Derive the conventional veth link names for a container name.
    pub fn veth_names(name: &str) -> (String, String) {
        (format!("veth-{}", name), format!("veth-{}-peer", name))
    }

    /// Derive the conventional netns name for a container name.
    pub fn netns_name(name: &str) -> String {
        format!("container-{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_display_matches_schema_strings() {
        assert_eq!(ContainerState::Creating.to_string(), "creating");
        assert_eq!(ContainerState::Running.to_string(), "running");
        assert_eq!(ContainerState::Terminating.to_string(), "terminating");
        assert_eq!(ContainerState::Dead.to_string(), "dead");
        assert_eq!(ContainerState::Orphaned.to_string(), "orphaned");
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&ContainerState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = ContainerRecord {
            name: "alpha".into(),
            memory_mb: 128,
            cpu_percent: 25,
            hostname: "alpha".into(),
            host_uid: 0,
            host_gid: 0,
            ip_address: "10.0.0.10".into(),
            veth_host: "veth-alpha".into(),
            veth_peer: "veth-alpha-peer".into(),
            init_pid: Some(4242),
            state: ContainerState::Running,
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: ContainerRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back.name, record.name);
        assert_eq!(back.ip_address, record.ip_address);
        assert_eq!(back.init_pid, record.init_pid);
        assert_eq!(back.state, record.state);
    }

    #[test]
    fn veth_names_are_derived_from_container_name() {
        let (host, peer) = ContainerRecord::veth_names("alpha");
        assert_eq!(host, "veth-alpha");
        assert_eq!(peer, "veth-alpha-peer");
    }
}
