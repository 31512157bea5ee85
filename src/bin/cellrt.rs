//! `cellrt` CLI front-end
//!
//! Thin verb dispatch over [`cellrt::orchestrator::Orchestrator`]: parses arguments with
//! `clap`, initializes `tracing`, and translates `Result<_, RuntimeError>` into the exit
//! codes documented in the crate's external interface. No business logic lives here —
//! every verb is a one-line call into the orchestrator.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use cellrt::orchestrator::CreateRequest;
use cellrt::prelude::*;
use cellrt::Result;

/// Default path to the multi-call utility binary, used when `--busybox` is not given.
const DEFAULT_BUSYBOX_PATH: &str = "/usr/bin/busybox";

#[derive(Parser)]
#[command(name = "cellrt", about = "Minimal container runtime with direct cgroup v1 and namespace control")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the on-disk state root (defaults to `/tmp/containers`, or $STATE_ROOT).
    #[arg(long, global = true)]
    state_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Create and start a new container.
    Create {
        name: String,
        #[arg(long, default_value_t = 256)]
        ram: u32,
        #[arg(long, default_value_t = 50)]
        cpu: u32,
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        uid: Option<u32>,
        #[arg(long)]
        gid: Option<u32>,
        /// Path to the statically linked multi-call utility binary the rootfs is seeded from.
        #[arg(long)]
        busybox: Option<PathBuf>,
    },
    /// List every known container.
    List,
    /// Delete a container. Succeeds even if the name is unknown.
    Delete { name: String },
    /// Delete every known container and sweep orphaned kernel resources.
    CleanupAll,
    /// Reclassify every record, sweeping orphans while preserving healthy containers.
    RecoverState,
    /// Report a container's network configuration.
    ShowNetwork { name: String },
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let paths = match cli.state_root.clone().or_else(state_root_from_env) {
        Some(root) => PathStore::with_root(root),
        None => PathStore::default_root(),
    };
    let orchestrator = Orchestrator::new(paths);

    match run(&orchestrator, cli.command) {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            error!(error = %err, "cellrt command failed");
            eprintln!("error: {}", err);
            ExitCode::from(exit_code(&err) as u8)
        }
    }
}

fn run(orchestrator: &Orchestrator, command: Command) -> Result<()> {
    match command {
        Command::Create {
            name,
            ram,
            cpu,
            hostname,
            uid,
            gid,
            busybox,
        } => {
            let record = orchestrator.create(CreateRequest {
                name,
                memory_mb: ram,
                cpu_percent: cpu,
                hostname,
                host_uid: uid.unwrap_or_else(current_uid),
                host_gid: gid.unwrap_or_else(current_gid),
                busybox_path: busybox.unwrap_or_else(|| PathBuf::from(DEFAULT_BUSYBOX_PATH)),
            })?;
            println!(
                "{}\t{}\t{}MB\t{}%\t{}",
                record.name, record.state, record.memory_mb, record.cpu_percent, record.ip_address
            );
            Ok(())
        }
        Command::List => {
            for record in orchestrator.list()? {
                println!(
                    "{}\t{}\t{}MB\t{}%\t{}\t{}",
                    record.name,
                    record.state,
                    record.memory_mb,
                    record.cpu_percent,
                    record.ip_address,
                    record.init_pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                );
            }
            Ok(())
        }
        Command::Delete { name } => orchestrator.delete(&name),
        Command::CleanupAll => {
            let removed = orchestrator.cleanup_all()?;
            for name in removed {
                println!("removed {}", name);
            }
            Ok(())
        }
        Command::RecoverState => {
            let records = orchestrator.recover_state()?;
            for record in records {
                println!("{}\t{}", record.name, record.state);
            }
            Ok(())
        }
        Command::ShowNetwork { name } => {
            let report = orchestrator.show_network(&name)?;
            println!("ip: {}", report.ip_address);
            println!("veth_host: {}", report.veth_host);
            println!("veth_peer: {}", report.veth_peer);
            println!("netns: {}", report.netns);
            Ok(())
        }
    }
}

fn state_root_from_env() -> Option<PathBuf> {
    std::env::var_os("STATE_ROOT").map(PathBuf::from)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let default_filter = if std::env::var("RT_DEBUG").as_deref() == Ok("1") {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: getuid(2) takes no arguments and cannot fail.
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

#[cfg(unix)]
fn current_gid() -> u32 {
    // SAFETY: getgid(2) takes no arguments and cannot fail.
    unsafe { libc::getgid() }
}

#[cfg(not(unix))]
fn current_gid() -> u32 {
    0
}
