//! Process Supervisor
//!
//! Spawns a container's init process into its namespace set, performs the ordered
//! child-side setup before `exec`, and supervises the process afterward: recording its
//! PID, reaping it in a background thread, and escalating from SIGTERM to SIGKILL on a
//! fixed grace period at delete time.

use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crate::namespace::{
    clone_with_namespaces, pivot_root, write_gid_map, write_uid_map, CloneFlags, IdMapping,
    NamespaceFlags, Namespaces,
};
use crate::rootfs::{mount, mount_dev, mount_flags, mount_proc, mount_sys, mount_tmp};

/// Fixed grace period between SIGTERM and SIGKILL during delete.
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

const CHILD_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Process Supervisor errors.
#[derive(Debug)]
pub enum SupervisorError {
    /// The init process could not be started at all.
    SpawnFailed(String),
    /// Namespace setup failed before exec.
    NamespaceUnavailable(String),
    /// A mount inside the new namespaces failed.
    RootfsSetupFailed(String),
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorError::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
            SupervisorError::NamespaceUnavailable(msg) => {
                write!(f, "namespace unavailable: {}", msg)
            }
            SupervisorError::RootfsSetupFailed(msg) => write!(f, "rootfs setup failed: {}", msg),
        }
    }
}

/// What the supervisor needs to spawn one container's init process.
pub struct SpawnPlan {
    pub rootfs: PathBuf,
    pub hostname: String,
    pub host_uid: u32,
    pub host_gid: u32,
}

/// A spawned init process, tracked until it is reaped.
pub struct Supervised {
    pub pid: u32,
    reaper: thread::JoinHandle<i32>,
}

impl Supervised {
    /// Block until the reaper thread observes the child's exit and return its status.
    pub fn wait(self) -> i32 {
        self.reaper.join().unwrap_or(-1)
    }

    /// Send a signal to the init process.
    pub fn signal(&self, sig: i32) {
        // SAFETY: self.pid was returned by a successful clone(2) and refers to this
        // supervisor's own child; sig is caller-supplied and validated by the kernel.
        unsafe {
            libc::kill(self.pid as i32, sig);
        }
    }

    /// SIGTERM, wait up to [`GRACE_PERIOD`], SIGKILL if still alive, then reap.
    pub fn terminate(self) -> i32 {
        self.signal(libc::SIGTERM);

        let pid = self.pid;
        let reaper = self.reaper;
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let status = reaper.join().unwrap_or(-1);
            let _ = tx.send(status);
        });

        match rx.recv_timeout(GRACE_PERIOD) {
            Ok(status) => status,
            Err(_) => {
                // SAFETY: pid refers to this supervisor's own child process.
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
                rx.recv().unwrap_or(-1)
            }
        }
    }
}

/// Spawns and supervises container init processes.
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    /// Clone a new process into `CLONE_NEWPID|CLONE_NEWNS|CLONE_NEWUTS|CLONE_NEWIPC|CLONE_NEWUSER`,
    /// run the ordered child-side setup, and `exec /bin/busybox sh`.
    ///
    /// `CLONE_NEWNET` is deliberately not part of this flag set: the Network Manager
    /// has already built and fully wired the container's netns (veth moved, addressed,
    /// routed) before this call; passing `CLONE_NEWNET` here would instead hand the
    /// child a *fresh, empty* netns. The caller is expected to have entered that
    /// prepared namespace (e.g. via the Network Manager's `ip netns exec` wrapper)
    /// around this call.
    #[cfg(target_os = "linux")]
    pub fn spawn(plan: SpawnPlan) -> Result<Supervised, SupervisorError> {
        let flags = NamespaceFlags::NEWNS
            .union(NamespaceFlags::NEWPID)
            .union(NamespaceFlags::NEWUTS)
            .union(NamespaceFlags::NEWIPC)
            .union(NamespaceFlags::NEWUSER);

        // SAFETY: sync_read/sync_write are created fresh below and live for the duration
        // of this call; the child only uses async-signal-safe operations (read/write on
        // raw fds, mount/pivot_root/exec syscalls) before exec replaces its image.
        let (ready_r, ready_w) = make_pipe().map_err(SupervisorError::SpawnFailed)?;
        let (go_r, go_w) = make_pipe().map_err(SupervisorError::SpawnFailed)?;

        let rootfs = plan.rootfs.clone();
        let hostname = plan.hostname.clone();

        let child_fn = move || -> i32 {
            // SAFETY: ready_r/go_w belong to this child exclusively post-clone; the
            // parent's copies (ready_w/go_r) are closed in the parent branch below.
            unsafe {
                libc::close(go_w);
                libc::close(ready_r);
            }
            // Signal readiness, then block until the parent has written id maps.
            let _ = write_byte(ready_w);
            let _ = read_byte(go_r);

            match child_setup(&rootfs, &hostname) {
                Ok(()) => {}
                Err(_) => std::process::exit(1),
            }

            exec_init()
        };

        let clone_flags = CloneFlags {
            namespaces: flags,
            extra: 0,
        };

        // SAFETY: CHILD_STACK_SIZE is a fixed, sufficient stack allocation; child_fn
        // performs no allocation-unsafe operations the parent's address space depends on.
        let pid = unsafe { clone_with_namespaces(clone_flags, CHILD_STACK_SIZE, child_fn) }
            .map_err(|e| SupervisorError::NamespaceUnavailable(e.to_string()))?;

        // SAFETY: ready_w/go_r belong to the parent exclusively post-clone.
        unsafe {
            libc::close(ready_w);
            libc::close(go_r);
        }

        let _ = read_byte(ready_r);

        write_uid_map(pid, &IdMapping::root_to_user(plan.host_uid))
            .map_err(|e| SupervisorError::NamespaceUnavailable(e.to_string()))?;
        write_gid_map(pid, &IdMapping::root_to_user(plan.host_gid))
            .map_err(|e| SupervisorError::NamespaceUnavailable(e.to_string()))?;

        let _ = write_byte(go_w);

        // SAFETY: ready_r/go_w are closed exactly once here, after both sides of the
        // handshake have completed.
        unsafe {
            libc::close(ready_r);
            libc::close(go_w);
        }

        let reaper = thread::spawn(move || {
            let mut status: libc::c_int = 0;
            // SAFETY: pid is this supervisor's own child, obtained from clone(2) above;
            // status is a valid local out-parameter for waitpid(2).
            unsafe {
                libc::waitpid(pid as i32, &mut status, 0);
            }
            libc::WEXITSTATUS(status)
        });

        Ok(Supervised { pid, reaper })
    }

    /// Spawn (non-Linux stub)
    #[cfg(not(target_os = "linux"))]
    pub fn spawn(_plan: SpawnPlan) -> Result<Supervised, SupervisorError> {
        Err(SupervisorError::SpawnFailed("requires Linux".into()))
    }
}

#[cfg(target_os = "linux")]
fn child_setup(rootfs: &Path, hostname: &str) -> Result<(), SupervisorError> {
    Namespaces::new(NamespaceFlags::NEWUTS)
        .set_hostname(hostname)
        .map_err(|e| SupervisorError::NamespaceUnavailable(e.to_string()))?;

    mount_proc(&rootfs.join("proc")).map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;
    mount_sys(&rootfs.join("sys")).map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;
    mount_tmp(&rootfs.join("tmp")).map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;
    mount_dev(&rootfs.join("dev")).map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;
    let _ = mount(
        Some(Path::new("devpts")),
        &rootfs.join("dev/pts"),
        Some("devpts"),
        mount_flags::MS_NOSUID | mount_flags::MS_NOEXEC,
        Some("mode=620,ptmxmode=666"),
    );

    let put_old = rootfs.join(".old_root");
    std::fs::create_dir_all(&put_old).map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;
    pivot_root(rootfs, &put_old)
        .map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;

    std::env::set_current_dir("/").map_err(|e| SupervisorError::RootfsSetupFailed(e.to_string()))?;

    redirect_std_streams_to_null();

    Ok(())
}

#[cfg(target_os = "linux")]
fn redirect_std_streams_to_null() {
    // SAFETY: /dev/null exists inside the just-pivoted rootfs (created by mount_dev);
    // dup2 onto fds 0/1/2 is always valid for a process that owns those fds.
    unsafe {
        let devnull = CString::new("/dev/null").unwrap();
        let fd = libc::open(devnull.as_ptr(), libc::O_RDWR);
        if fd >= 0 {
            libc::dup2(fd, 0);
            libc::dup2(fd, 1);
            libc::dup2(fd, 2);
            if fd > 2 {
                libc::close(fd);
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn exec_init() -> i32 {
    let path = CString::new("/bin/busybox").unwrap();
    let arg0 = CString::new("busybox").unwrap();
    let arg1 = CString::new("sh").unwrap();
    let argv = [arg0.as_ptr(), arg1.as_ptr(), core::ptr::null()];

    // SAFETY: path/arg0/arg1 are valid NUL-terminated CStrings kept alive through the
    // call; argv is null-terminated as execv(3) requires. execv only returns on error.
    unsafe {
        libc::execv(path.as_ptr(), argv.as_ptr());
    }
    127
}

#[cfg(target_os = "linux")]
fn make_pipe() -> Result<(i32, i32), String> {
    let mut fds = [0i32; 2];
    // SAFETY: fds is a valid 2-element array as pipe(2) requires.
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret < 0 {
        Err("pipe(2) failed".into())
    } else {
        Ok((fds[0], fds[1]))
    }
}

#[cfg(target_os = "linux")]
fn write_byte(fd: i32) -> Result<(), String> {
    let byte = [1u8];
    // SAFETY: fd is a valid pipe write end owned by the caller; byte lives for the call.
    let ret = unsafe { libc::write(fd, byte.as_ptr() as *const libc::c_void, 1) };
    if ret == 1 {
        Ok(())
    } else {
        Err("pipe write failed".into())
    }
}

#[cfg(target_os = "linux")]
fn read_byte(fd: i32) -> Result<(), String> {
    let mut byte = [0u8];
    // SAFETY: fd is a valid pipe read end owned by the caller; byte is a live 1-byte buffer.
    let ret = unsafe { libc::read(fd, byte.as_mut_ptr() as *mut libc::c_void, 1) };
    if ret == 1 {
        Ok(())
    } else {
        Err("pipe read failed".into())
    }
}

/// Join a pre-wired network namespace by name, then run [`ProcessSupervisor::spawn`].
///
/// The Network Manager builds and addresses a container's netns entirely through `ip
/// netns exec` before this is ever called; this function's only job is to put the
/// clone(2) call on the same footing `ip netns exec` would give a plain `fork`: call
/// `setns(2)` on a throwaway OS thread so the new child inherits that netns, then let
/// the thread end. Nothing else ever runs on that thread, so there is no netns to
/// restore.
#[cfg(target_os = "linux")]
pub fn spawn_in_netns(plan: SpawnPlan, netns_name: &str) -> Result<Supervised, SupervisorError> {
    let netns_name = netns_name.to_string();
    thread::spawn(move || -> Result<Supervised, SupervisorError> {
        join_netns(&netns_name)?;
        ProcessSupervisor::spawn(plan)
    })
    .join()
    .unwrap_or_else(|_| {
        Err(SupervisorError::SpawnFailed(
            "netns worker thread panicked".into(),
        ))
    })
}

#[cfg(not(target_os = "linux"))]
pub fn spawn_in_netns(_plan: SpawnPlan, _netns_name: &str) -> Result<Supervised, SupervisorError> {
    Err(SupervisorError::SpawnFailed("requires Linux".into()))
}

#[cfg(target_os = "linux")]
fn join_netns(name: &str) -> Result<(), SupervisorError> {
    let path = format!("/var/run/netns/{}", name);
    let cpath = CString::new(path.clone())
        .map_err(|_| SupervisorError::NamespaceUnavailable(path.clone()))?;

    // SAFETY: cpath is a valid NUL-terminated CString naming a bind-mounted netns file
    // created by `ip netns add`; open(2) does not retain the pointer after returning.
    let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        return Err(SupervisorError::NamespaceUnavailable(format!(
            "open {}",
            path
        )));
    }

    // SAFETY: fd is a just-opened, valid file descriptor referring to a netns inode;
    // CLONE_NEWNET matches the namespace type that file represents.
    let ret = unsafe { libc::setns(fd, libc::CLONE_NEWNET) };
    // SAFETY: fd was opened exactly once above and is closed exactly once here.
    unsafe {
        libc::close(fd);
    }

    if ret < 0 {
        Err(SupervisorError::NamespaceUnavailable(format!(
            "setns {}",
            path
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_is_ten_seconds() {
        assert_eq!(GRACE_PERIOD, Duration::from_secs(10));
    }

    #[test]
    fn supervisor_error_display_names_failure() {
        let err = SupervisorError::RootfsSetupFailed("mount proc".into());
        assert!(err.to_string().contains("mount proc"));
    }
}
