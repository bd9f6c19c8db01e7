use crate::cpu::TopologyTree;
use crate::error::{Error, Result};
use crate::sysfs::{SysfsRoot, indexed_entry};
use std::collections::BTreeMap;

const CPU_BASE: &str = "sys/devices/system/cpu";

/// package id -> core id -> logical CPUs
type Layout = BTreeMap<usize, BTreeMap<usize, Vec<usize>>>;

/// Build the package/core/thread tree of the online CPUs.
///
/// CPUs without topology files are treated as single-thread cores of
/// package 0.
pub fn enumerate(sysfs: &SysfsRoot) -> Result<TopologyTree> {
    let layout = read_layout(sysfs)?;
    if layout.is_empty() {
        return Err(Error::Detection(format!(
            "no online CPUs under {}",
            sysfs.path(CPU_BASE).display()
        )));
    }

    let mut tree = TopologyTree::new();
    for (package, cores) in &layout {
        let first_cpu = first_cpu_of(cores.values().flatten());
        let package_id = tree.add_package(*package, first_cpu);

        for (core, threads) in cores {
            let core_id = tree.add_core(package_id, *core, first_cpu_of(threads.iter()))?;
            for &cpu in threads {
                tree.add_thread(core_id, cpu)?;
            }
        }
    }

    tracing::debug!(
        packages = tree.roots().len(),
        threads = tree.threads().count(),
        "enumerated CPU topology"
    );
    Ok(tree)
}

fn first_cpu_of<'a>(cpus: impl Iterator<Item = &'a usize>) -> usize {
    cpus.copied().min().unwrap_or(0)
}

fn read_layout(sysfs: &SysfsRoot) -> Result<Layout> {
    let mut cpus: Vec<usize> = sysfs
        .list_dir(CPU_BASE)?
        .iter()
        .filter_map(|entry| indexed_entry(entry, "cpu"))
        .collect();
    cpus.sort_unstable();

    let mut layout = Layout::new();
    for cpu in cpus {
        let dir = format!("{}/cpu{}", CPU_BASE, cpu);

        if sysfs.read_optional(format!("{}/online", dir))?.as_deref() == Some("0") {
            tracing::debug!(cpu, "skipping offline CPU");
            continue;
        }

        // physical_package_id reads -1 on some virtual machines
        let package = sysfs
            .read_parse_optional::<i64>(format!("{}/topology/physical_package_id", dir))?
            .and_then(|id| usize::try_from(id).ok())
            .unwrap_or(0);
        let core = sysfs
            .read_parse_optional::<usize>(format!("{}/topology/core_id", dir))?
            .unwrap_or(cpu);

        layout
            .entry(package)
            .or_default()
            .entry(core)
            .or_default()
            .push(cpu);
    }
    Ok(layout)
}
