//! Input Validation
//!
//! Pure predicates over the fields that make up a [`crate::state::ContainerRecord`].
//! Every function here fails with [`RuntimeError::InvalidArgument`] naming the offending
//! field; no function touches the filesystem or performs a syscall.

use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::RuntimeError;

/// Minimum allowed memory limit, in MiB.
pub const MEMORY_MB_MIN: u32 = 64;
/// Maximum allowed memory limit, in MiB.
pub const MEMORY_MB_MAX: u32 = 2048;
/// Minimum allowed CPU percentage.
pub const CPU_PERCENT_MIN: u32 = 1;
/// Maximum allowed CPU percentage.
pub const CPU_PERCENT_MAX: u32 = 100;
/// Maximum container name length.
pub const NAME_MAX_LEN: usize = 64;
/// Maximum hostname length.
pub const HOSTNAME_MAX_LEN: usize = 63;

/// Validate a container name: 1-64 chars, `[A-Za-z0-9_-]+`.
pub fn validate_name(name: &str) -> Result<(), RuntimeError> {
    if name.is_empty() || name.len() > NAME_MAX_LEN {
        return Err(RuntimeError::InvalidArgument(format!(
            "name: length must be 1-{} chars, got {}",
            NAME_MAX_LEN,
            name.len()
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RuntimeError::InvalidArgument(format!(
            "name: must match [A-Za-z0-9_-]+, got {:?}",
            name
        )));
    }

    Ok(())
}

/// Validate a hostname: 1-63 chars. The runtime does not impose the name's charset
/// on hostnames, only the length bound from the data model.
pub fn validate_hostname(hostname: &str) -> Result<(), RuntimeError> {
    if hostname.is_empty() || hostname.len() > HOSTNAME_MAX_LEN {
        return Err(RuntimeError::InvalidArgument(format!(
            "hostname: length must be 1-{} chars, got {}",
            HOSTNAME_MAX_LEN,
            hostname.len()
        )));
    }
    Ok(())
}

/// Validate a memory limit in MiB, `[64, 2048]`.
pub fn validate_memory_mb(memory_mb: u32) -> Result<(), RuntimeError> {
    if !(MEMORY_MB_MIN..=MEMORY_MB_MAX).contains(&memory_mb) {
        return Err(RuntimeError::InvalidArgument(format!(
            "memory_mb: must be in [{}, {}], got {}",
            MEMORY_MB_MIN, MEMORY_MB_MAX, memory_mb
        )));
    }
    Ok(())
}

/// Validate a CPU percentage, `[1, 100]`.
pub fn validate_cpu_percent(cpu_percent: u32) -> Result<(), RuntimeError> {
    if !(CPU_PERCENT_MIN..=CPU_PERCENT_MAX).contains(&cpu_percent) {
        return Err(RuntimeError::InvalidArgument(format!(
            "cpu_percent: must be in [{}, {}], got {}",
            CPU_PERCENT_MIN, CPU_PERCENT_MAX, cpu_percent
        )));
    }
    Ok(())
}

/// Validate that a PID is positive and resolvable via `/proc/<pid>`.
pub fn validate_pid(pid: u32) -> Result<(), RuntimeError> {
    if pid == 0 {
        return Err(RuntimeError::InvalidArgument("pid: must be > 0".into()));
    }

    if !Path::new(&format!("/proc/{}", pid)).is_dir() {
        return Err(RuntimeError::InvalidArgument(format!(
            "pid: /proc/{} does not exist",
            pid
        )));
    }

    Ok(())
}

/// Validate a dotted-quad IPv4 literal within `10.0.0.0/24`.
pub fn validate_ip_in_subnet(ip: &str) -> Result<Ipv4Addr, RuntimeError> {
    let addr: Ipv4Addr = ip
        .parse()
        .map_err(|_| RuntimeError::InvalidArgument(format!("ip_address: not a dotted quad: {}", ip)))?;

    let octets = addr.octets();
    if octets[0] != 10 || octets[1] != 0 || octets[2] != 0 {
        return Err(RuntimeError::InvalidArgument(format!(
            "ip_address: {} is outside 10.0.0.0/24",
            ip
        )));
    }

    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_boundaries() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"a".repeat(64)).is_ok());
        assert!(validate_name(&"a".repeat(65)).is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("a@b").is_err());
        assert!(validate_name("under_score-dash").is_ok());
    }

    #[test]
    fn memory_boundaries() {
        assert!(validate_memory_mb(63).is_err());
        assert!(validate_memory_mb(64).is_ok());
        assert!(validate_memory_mb(2048).is_ok());
        assert!(validate_memory_mb(2049).is_err());
    }

    #[test]
    fn cpu_boundaries() {
        assert!(validate_cpu_percent(0).is_err());
        assert!(validate_cpu_percent(1).is_ok());
        assert!(validate_cpu_percent(100).is_ok());
        assert!(validate_cpu_percent(101).is_err());
    }

    #[test]
    fn ip_must_be_in_subnet() {
        assert!(validate_ip_in_subnet("10.0.0.10").is_ok());
        assert!(validate_ip_in_subnet("10.0.1.10").is_err());
        assert!(validate_ip_in_subnet("not-an-ip").is_err());
    }

    #[test]
    fn pid_zero_is_invalid() {
        assert!(validate_pid(0).is_err());
    }
}
