//! Direct Cgroup v1 Control Example
//!
//! Demonstrates cgroup creation, resource limits, and monitoring across the paired
//! `memory`/`cpu` hierarchies. Requires Linux with cgroup v1 and root privileges.
//!
//! ```bash
//! sudo cargo run --example cgroup_control
//! ```

use cellrt::prelude::*;

fn main() {
    println!("=== cellrt Cgroup Control Demo ===\n");

    #[cfg(target_os = "linux")]
    linux_demo();

    #[cfg(not(target_os = "linux"))]
    println!(
        "This example requires Linux with cgroup v1.\n\
         Showing API overview instead:\n\n\
         // Create paired memory/cpu cgroups\n\
         let cgroup = CgroupManager::create(\"my-container\")?;\n\n\
         // Set a 50% CPU share and a 256MB memory ceiling\n\
         cgroup.apply_limits(256, 50)?;\n\n\
         // Enroll a process\n\
         cgroup.add_process(pid)?;\n\n\
         // Read back usage\n\
         let report = cgroup.report()?;\n\
         println!(\"Memory: {{}} bytes\", report.memory_bytes);\n\n\
         // Cleanup\n\
         cgroup.destroy()?;"
    );
}

#[cfg(target_os = "linux")]
fn linux_demo() {
    match CgroupManager::create("cellrt-example") {
        Ok(cgroup) => {
            println!("Created cgroup: cellrt-example");

            if let Err(e) = cgroup.apply_limits(256, 50) {
                println!("Apply limits: {:?}", e);
            } else {
                println!("Memory limit: 256MB, CPU share: 50%");
            }

            match cgroup.report() {
                Ok(report) => {
                    println!("Current memory: {} bytes", report.memory_bytes);
                    println!("Peak memory: {} bytes", report.memory_peak_bytes);
                    match report.cpu_ns {
                        Some(ns) => println!("CPU time: {} ns", ns),
                        None => println!("CPU time: cpuacct not co-mounted"),
                    }
                }
                Err(e) => println!("Read report: {:?}", e),
            }

            if let Err(e) = cgroup.destroy() {
                println!("Cleanup: {:?}", e);
            } else {
                println!("\nCgroup destroyed successfully.");
            }
        }
        Err(e) => {
            println!("Failed to create cgroup (need root?): {:?}", e);
        }
    }
}
