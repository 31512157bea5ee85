//! Root Filesystem Construction
//!
//! Builds a private root filesystem from a statically linked multi-call utility binary
//! (a Busybox-like executable selected by applet name via symlinks), and provides the
//! low-level mount primitives the Process Supervisor uses inside the new mount namespace.
//!
//! ## Layout
//!
//! ```text
//! <rootfs>/
//! ├── bin/            (busybox + one symlink per applet)
//! ├── sbin/ usr/bin/ usr/sbin/
//! ├── etc/
//! │   ├── passwd  group  hosts  resolv.conf  hostname
//! ├── proc/           (mount -t proc, at spawn time)
//! ├── sys/            (mount -t sysfs, at spawn time)
//! ├── dev/ dev/pts/   (minimal device nodes, at spawn time)
//! ├── tmp/            (tmpfs, at spawn time)
//! └── root/ home/
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

// ============================================================================
// Mount Flags (Linux values, defined as constants for cross-compilation)
// ============================================================================

/// Mount flags
pub mod mount_flags {
    /// Read-only mount
    pub const MS_RDONLY: u64 = 1;
    /// Don't allow setuid
    pub const MS_NOSUID: u64 = 2;
    /// Don't interpret special files
    pub const MS_NODEV: u64 = 4;
    /// Don't allow exec
    pub const MS_NOEXEC: u64 = 8;
    /// Remount
    pub const MS_REMOUNT: u64 = 32;
    /// Bind mount
    pub const MS_BIND: u64 = 4096;
    /// Recursive bind
    pub const MS_REC: u64 = 16384;
    /// Private mount
    pub const MS_PRIVATE: u64 = 1 << 18;
}

/// The fixed applet set every rootfs gets a `bin/<applet> -> busybox` symlink for.
pub const APPLETS: &[&str] = &[
    "sh", "ls", "cat", "echo", "ps", "grep", "sed", "awk", "mount", "umount", "mkdir", "rm", "cp",
    "mv", "chmod", "chown", "ln", "find", "which", "id", "whoami", "hostname", "ip", "ping", "wc",
    "head", "tail", "sort", "uniq", "cut", "tr", "tee", "sleep", "kill", "true", "false", "test",
    "expr", "basename", "dirname", "readlink", "stat", "du", "df", "free", "uname", "date", "env",
    "printenv",
];

const ESSENTIAL_DIRS: &[&str] = &[
    "bin", "sbin", "usr/bin", "usr/sbin", "proc", "sys", "dev", "dev/pts", "tmp", "etc", "root",
    "home",
];

// ============================================================================
// Error Types
// ============================================================================

/// Root filesystem errors
#[derive(Debug)]
pub enum RootFsError {
    /// Path does not exist
    PathNotFound(String),
    /// Permission denied
    PermissionDenied,
    /// Mount failed
    MountFailed(String),
    /// Device creation failed
    DeviceCreationFailed(String),
    /// I/O error
    IoError(String),
    /// The `busybox --help` verification check exited non-zero.
    VerificationFailed(String),
    /// Not supported on this platform
    NotSupported,
}

impl core::fmt::Display for RootFsError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RootFsError::PathNotFound(path) => write!(f, "path not found: {}", path),
            RootFsError::PermissionDenied => write!(f, "permission denied"),
            RootFsError::MountFailed(msg) => write!(f, "mount failed: {}", msg),
            RootFsError::DeviceCreationFailed(msg) => write!(f, "device creation failed: {}", msg),
            RootFsError::IoError(msg) => write!(f, "I/O error: {}", msg),
            RootFsError::VerificationFailed(msg) => write!(f, "busybox verification failed: {}", msg),
            RootFsError::NotSupported => write!(f, "not supported on this platform"),
        }
    }
}

impl From<std::io::Error> for RootFsError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            RootFsError::PermissionDenied
        } else if e.kind() == std::io::ErrorKind::NotFound {
            RootFsError::PathNotFound(e.to_string())
        } else {
            RootFsError::IoError(e.to_string())
        }
    }
}

// ============================================================================
// Busybox Provider
// ============================================================================

/// Supplies the path to a statically linked multi-call utility binary.
///
/// Acquiring the binary (building it, fetching it, vendoring it) is explicitly out of
/// scope for the core runtime; this trait is the seam an external collaborator fills in.
pub trait BusyboxProvider {
    /// Return the filesystem path to the multi-call utility executable.
    fn binary_path(&self) -> Result<PathBuf, RootFsError>;
}

/// A [`BusyboxProvider`] that always yields a fixed, caller-supplied path.
///
/// This is the only provider the core ships: it performs no download, build, or
/// extraction, it simply hands back whatever path it was constructed with.
#[derive(Debug, Clone)]
pub struct LocalBusyboxProvider {
    path: PathBuf,
}

impl LocalBusyboxProvider {
    /// Wrap an existing on-disk binary path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BusyboxProvider for LocalBusyboxProvider {
    fn binary_path(&self) -> Result<PathBuf, RootFsError> {
        if !self.path.is_file() {
            return Err(RootFsError::PathNotFound(self.path.display().to_string()));
        }
        Ok(self.path.clone())
    }
}

// ============================================================================
// Root Filesystem Builder
// ============================================================================

/// Populates a private rootfs directory from a multi-call utility binary.
pub struct RootFsBuilder<'a> {
    path: PathBuf,
    provider: &'a dyn BusyboxProvider,
}

impl<'a> RootFsBuilder<'a> {
    /// Target an existing (already-created-by-PathStore) rootfs directory.
    pub fn new(path: impl Into<PathBuf>, provider: &'a dyn BusyboxProvider) -> Self {
        Self {
            path: path.into(),
            provider,
        }
    }

    /// Run the full build: essential dirs, busybox copy, applet symlinks, `/etc` stubs,
    /// then the `busybox --help` verification check.
    pub fn build(&self, hostname: &str, ip_address: &str) -> Result<(), RootFsError> {
        self.create_essential_dirs()?;
        self.install_busybox()?;
        self.create_applet_symlinks()?;
        self.seed_etc(hostname, ip_address)?;
        self.verify()?;
        Ok(())
    }

    fn create_essential_dirs(&self) -> Result<(), RootFsError> {
        for dir in ESSENTIAL_DIRS {
            fs::create_dir_all(self.path.join(dir))?;
        }
        Ok(())
    }

    fn install_busybox(&self) -> Result<(), RootFsError> {
        let source = self.provider.binary_path()?;
        let dest = self.path.join("bin/busybox");

        fs::copy(&source, &dest)?;

        #[cfg(unix)]
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755))?;

        Ok(())
    }

    fn create_applet_symlinks(&self) -> Result<(), RootFsError> {
        for applet in APPLETS {
            let link = self.path.join("bin").join(applet);
            if link.symlink_metadata().is_ok() {
                continue;
            }

            #[cfg(unix)]
            std::os::unix::fs::symlink("busybox", &link)?;
        }
        Ok(())
    }

    fn seed_etc(&self, hostname: &str, ip_address: &str) -> Result<(), RootFsError> {
        write_file(
            self.path.join("etc/passwd"),
            "root:x:0:0:root:/root:/bin/sh\nnobody:x:65534:65534:nobody:/:/bin/false\n",
        )?;
        write_file(self.path.join("etc/group"), "root:x:0:\nnobody:x:65534:\n")?;
        write_file(
            self.path.join("etc/hosts"),
            &format!("127.0.0.1 localhost\n{} {}\n", ip_address, hostname),
        )?;
        write_file(self.path.join("etc/resolv.conf"), "nameserver 8.8.8.8\n")?;
        write_file(self.path.join("etc/hostname"), &format!("{}\n", hostname))?;
        Ok(())
    }

    /// Run `<rootfs>/bin/busybox --help` on the host as the on-disk sanity check.
    fn verify(&self) -> Result<(), RootFsError> {
        let busybox = self.path.join("bin/busybox");

        let status = std::process::Command::new(&busybox)
            .arg("--help")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_err(|e| RootFsError::VerificationFailed(e.to_string()))?;

        if !status.success() {
            return Err(RootFsError::VerificationFailed(format!(
                "busybox --help exited with {:?}",
                status.code()
            )));
        }

        Ok(())
    }
}

fn write_file(path: PathBuf, contents: &str) -> Result<(), RootFsError> {
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

// ============================================================================
// Mount Functions (used by the Process Supervisor inside the new mount namespace)
// ============================================================================

/// Low-level mount wrapper (Linux only)
#[cfg(target_os = "linux")]
pub fn mount(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    flags: u64,
    data: Option<&str>,
) -> Result<(), RootFsError> {
    use std::ffi::CString;

    // Convert every path/string argument to a NUL-terminated CString, propagating errors
    // for arguments that could contain interior NUL bytes (paths from user input). The
    // filesystem type and mount data strings are caller-controlled &str values that
    // originate from compile-time literals in this module.
    let source_c = source
        .map(|s| {
            CString::new(s.to_string_lossy().as_bytes())
                .map_err(|_| RootFsError::IoError("invalid source path".into()))
        })
        .transpose()?;
    let target_c = CString::new(target.to_string_lossy().as_bytes())
        .map_err(|_| RootFsError::IoError("invalid target path".into()))?;
    let fstype_c = fstype
        .map(|t| CString::new(t).map_err(|_| RootFsError::IoError("invalid filesystem type".into())))
        .transpose()?;
    let data_c = data
        .map(|d| CString::new(d).map_err(|_| RootFsError::IoError("invalid mount data".into())))
        .transpose()?;

    // SAFETY: all pointer arguments are either null (for optional parameters) or point to
    // valid NUL-terminated CString buffers that remain live for the duration of this call.
    // mount(2) only reads the strings and does not retain pointers after returning. The
    // kernel validates all flags and returns -1 on error.
    let ret = unsafe {
        libc::mount(
            source_c.as_ref().map_or(core::ptr::null(), |s| s.as_ptr()),
            target_c.as_ptr(),
            fstype_c.as_ref().map_or(core::ptr::null(), |t| t.as_ptr()),
            flags as libc::c_ulong,
            data_c.as_ref().map_or(core::ptr::null(), |d| d.as_ptr()) as *const libc::c_void,
        )
    };

    if ret < 0 {
        // SAFETY: called on the same thread immediately after the failed syscall above.
        let errno = unsafe { *libc::__errno_location() };
        Err(RootFsError::MountFailed(format!("errno {}", errno)))
    } else {
        Ok(())
    }
}

/// Mount (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub fn mount(
    _source: Option<&Path>,
    _target: &Path,
    _fstype: Option<&str>,
    _flags: u64,
    _data: Option<&str>,
) -> Result<(), RootFsError> {
    Err(RootFsError::NotSupported)
}

/// Mount a fresh `proc` at `target` (Linux only)
#[cfg(target_os = "linux")]
pub fn mount_proc(target: &Path) -> Result<(), RootFsError> {
    fs::create_dir_all(target)?;

    mount(
        Some(Path::new("proc")),
        target,
        Some("proc"),
        mount_flags::MS_NOSUID | mount_flags::MS_NODEV | mount_flags::MS_NOEXEC,
        None,
    )
}

/// Mount proc (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub fn mount_proc(_target: &Path) -> Result<(), RootFsError> {
    Err(RootFsError::NotSupported)
}

/// Mount `sysfs` at `target` (Linux only)
#[cfg(target_os = "linux")]
pub fn mount_sys(target: &Path) -> Result<(), RootFsError> {
    fs::create_dir_all(target)?;

    mount(
        Some(Path::new("sysfs")),
        target,
        Some("sysfs"),
        mount_flags::MS_NOSUID | mount_flags::MS_NODEV | mount_flags::MS_NOEXEC,
        None,
    )
}

/// Mount sysfs (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub fn mount_sys(_target: &Path) -> Result<(), RootFsError> {
    Err(RootFsError::NotSupported)
}

/// Mount a `tmpfs` at `target` (Linux only)
#[cfg(target_os = "linux")]
pub fn mount_tmp(target: &Path) -> Result<(), RootFsError> {
    fs::create_dir_all(target)?;

    mount(
        Some(Path::new("tmpfs")),
        target,
        Some("tmpfs"),
        mount_flags::MS_NOSUID | mount_flags::MS_NODEV,
        Some("size=64M,mode=1777"),
    )
}

/// Mount tmpfs (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub fn mount_tmp(_target: &Path) -> Result<(), RootFsError> {
    Err(RootFsError::NotSupported)
}

/// Mount minimal `/dev` with basic device nodes (Linux only)
#[cfg(target_os = "linux")]
pub fn mount_dev(target: &Path) -> Result<(), RootFsError> {
    fs::create_dir_all(target)?;

    mount(
        Some(Path::new("tmpfs")),
        target,
        Some("tmpfs"),
        mount_flags::MS_NOSUID,
        Some("mode=755,size=64K"),
    )?;

    create_device_node(target, "null", 1, 3, 0o666)?;
    create_device_node(target, "zero", 1, 5, 0o666)?;
    create_device_node(target, "random", 1, 8, 0o666)?;
    create_device_node(target, "urandom", 1, 9, 0o666)?;
    create_device_node(target, "tty", 5, 0, 0o666)?;
    create_device_node(target, "console", 5, 1, 0o620)?;

    fs::create_dir_all(target.join("pts"))?;
    fs::create_dir_all(target.join("shm"))?;

    std::os::unix::fs::symlink("/proc/self/fd", target.join("fd"))?;
    std::os::unix::fs::symlink("/proc/self/fd/0", target.join("stdin"))?;
    std::os::unix::fs::symlink("/proc/self/fd/1", target.join("stdout"))?;
    std::os::unix::fs::symlink("/proc/self/fd/2", target.join("stderr"))?;

    Ok(())
}

/// Mount dev (non-Linux stub)
#[cfg(not(target_os = "linux"))]
pub fn mount_dev(_target: &Path) -> Result<(), RootFsError> {
    Err(RootFsError::NotSupported)
}

/// Create a device node using mknod (Linux only)
#[cfg(target_os = "linux")]
fn create_device_node(
    dev_path: &Path,
    name: &str,
    major: u32,
    minor: u32,
    mode: u32,
) -> Result<(), RootFsError> {
    use std::ffi::CString;

    let path = dev_path.join(name);
    let path_c = CString::new(path.to_string_lossy().as_bytes())
        .map_err(|_| RootFsError::IoError("invalid path".into()))?;

    let dev = libc::makedev(major, minor);
    // SAFETY: path_c is a valid NUL-terminated CString for the device node path; S_IFCHR |
    // mode is a valid file-type + permission combination; dev is constructed by makedev(3)
    // from caller-supplied major/minor numbers. mknod(2) does not retain the path pointer
    // after returning.
    let ret = unsafe { libc::mknod(path_c.as_ptr(), libc::S_IFCHR | mode as libc::mode_t, dev) };

    if ret < 0 {
        // SAFETY: called on the same thread immediately after the failed syscall above.
        let errno = unsafe { *libc::__errno_location() };
        if errno != libc::EEXIST {
            return Err(RootFsError::DeviceCreationFailed(format!(
                "{}: errno {}",
                name, errno
            )));
        }
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;
    impl BusyboxProvider for FailingProvider {
        fn binary_path(&self) -> Result<PathBuf, RootFsError> {
            Err(RootFsError::PathNotFound("no binary".into()))
        }
    }

    #[test]
    fn local_provider_rejects_missing_file() {
        let provider = LocalBusyboxProvider::new("/nonexistent/busybox");
        assert!(provider.binary_path().is_err());
    }

    #[test]
    fn local_provider_accepts_existing_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let provider = LocalBusyboxProvider::new(tmp.path());
        assert_eq!(provider.binary_path().unwrap(), tmp.path());
    }

    #[test]
    fn essential_dirs_are_created() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FailingProvider;
        let builder = RootFsBuilder::new(dir.path(), &provider);
        builder.create_essential_dirs().unwrap();

        for d in ESSENTIAL_DIRS {
            assert!(dir.path().join(d).is_dir(), "missing {}", d);
        }
    }

    #[test]
    fn etc_stubs_are_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FailingProvider;
        let builder = RootFsBuilder::new(dir.path(), &provider);
        builder.create_essential_dirs().unwrap();
        builder.seed_etc("alpha", "10.0.0.10").unwrap();

        let hosts = fs::read_to_string(dir.path().join("etc/hosts")).unwrap();
        assert!(hosts.contains("10.0.0.10 alpha"));

        let hostname = fs::read_to_string(dir.path().join("etc/hostname")).unwrap();
        assert_eq!(hostname.trim(), "alpha");

        let passwd = fs::read_to_string(dir.path().join("etc/passwd")).unwrap();
        assert!(passwd.contains("root:x:0:0:root:/root:/bin/sh"));
    }

    #[test]
    fn applet_set_has_no_duplicates() {
        let mut sorted = APPLETS.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), APPLETS.len());
    }

    #[test]
    fn mount_flags_are_distinct_bits() {
        assert_ne!(mount_flags::MS_BIND, mount_flags::MS_REC);
        assert_ne!(mount_flags::MS_NOSUID, mount_flags::MS_NODEV);
    }

    #[test]
    fn rootfs_error_display() {
        let err = RootFsError::PathNotFound("/test".into());
        assert!(err.to_string().contains("/test"));

        let err = RootFsError::VerificationFailed("exit 1".into());
        assert!(err.to_string().contains("exit 1"));
    }
}
