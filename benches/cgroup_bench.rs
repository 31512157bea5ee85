use cellrt::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_cpu_config_from_percent(c: &mut Criterion) {
    c.bench_function("cpu_config_from_percent", |b| {
        b.iter(|| black_box(CpuConfig::from_percent(black_box(50))))
    });
}

fn bench_memory_config_from_mb(c: &mut Criterion) {
    c.bench_function("memory_config_from_mb", |b| {
        b.iter(|| black_box(MemoryConfig::from_mb(black_box(256))))
    });
}

fn bench_namespace_flags(c: &mut Criterion) {
    c.bench_function("namespace_flags_union", |b| {
        b.iter(|| {
            let flags = NamespaceFlags::NEWNS
                .union(NamespaceFlags::NEWPID)
                .union(NamespaceFlags::NEWUTS)
                .union(NamespaceFlags::NEWIPC);
            black_box(flags)
        })
    });
}

#[cfg(target_os = "linux")]
fn bench_cgroup_create_destroy(c: &mut Criterion) {
    c.bench_function("cgroup_create_destroy", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let name = format!("bench-{}", i);
            if let Ok(cg) = CgroupManager::create(&name) {
                let _ = cg.destroy();
            }
        })
    });
}

#[cfg(target_os = "linux")]
fn bench_cgroup_apply_limits(c: &mut Criterion) {
    if let Ok(cg) = CgroupManager::create("bench-apply-limits") {
        c.bench_function("cgroup_apply_limits", |b| {
            b.iter(|| {
                let _ = cg.apply_limits(black_box(256), black_box(50));
            })
        });
        let _ = cg.destroy();
    }
}

#[cfg(not(target_os = "linux"))]
fn bench_cgroup_create_destroy(_c: &mut Criterion) {}

#[cfg(not(target_os = "linux"))]
fn bench_cgroup_apply_limits(_c: &mut Criterion) {}

criterion_group!(
    benches,
    bench_cpu_config_from_percent,
    bench_memory_config_from_mb,
    bench_namespace_flags,
    bench_cgroup_create_destroy,
    bench_cgroup_apply_limits,
);
criterion_main!(benches);
