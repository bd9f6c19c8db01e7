pub mod cpu;
pub mod topology;

use crate::sysfs::SysfsRoot;

/// Processor facts gathered once at startup.
#[derive(Debug, Clone)]
pub struct HardwareInfo {
    pub cpu: cpu::CpuInfo,
    pub online_cpus: usize,
}

impl HardwareInfo {
    pub fn detect(sysfs: &SysfsRoot) -> Self {
        let online_cpus = sysfs
            .read_optional("sys/devices/system/cpu/online")
            .unwrap_or(None)
            .map(|list| count_cpu_list(&list))
            .unwrap_or(0);

        Self {
            cpu: cpu::CpuInfo::detect(sysfs),
            online_cpus,
        }
    }
}

/// Count the CPUs in a kernel cpu list such as `0-3,8,10-11`.
pub fn count_cpu_list(list: &str) -> usize {
    list.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('-') {
            Some((lo, hi)) => match (lo.parse::<usize>(), hi.parse::<usize>()) {
                (Ok(lo), Ok(hi)) if hi >= lo => hi - lo + 1,
                _ => 0,
            },
            None => usize::from(part.parse::<usize>().is_ok()),
        })
        .sum()
}
