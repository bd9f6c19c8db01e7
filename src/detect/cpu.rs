use crate::sysfs::SysfsRoot;
use serde::Serialize;

/// Descriptive facts about the processor, shown above the tables.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuInfo {
    pub model_name: Option<String>,
    pub vendor: Option<String>,
    pub family: Option<u32>,
    pub model: Option<u32>,
    pub scaling_driver: Option<String>,
    pub governor: Option<String>,
    pub idle_driver: Option<String>,
    pub idle_governor: Option<String>,
}

impl CpuInfo {
    pub fn detect(sysfs: &SysfsRoot) -> Self {
        let mut info = Self::default();

        // Parse /proc/cpuinfo for model name and vendor
        if let Ok(cpuinfo) = sysfs.read("proc/cpuinfo") {
            for line in cpuinfo.lines() {
                if let Some((key, value)) = line.split_once(':') {
                    let key = key.trim();
                    let value = value.trim();
                    match key {
                        "model name" if info.model_name.is_none() => {
                            info.model_name = Some(value.to_string());
                        }
                        "vendor_id" if info.vendor.is_none() => {
                            info.vendor = Some(value.to_string());
                        }
                        "cpu family" if info.family.is_none() => {
                            info.family = value.parse().ok();
                        }
                        "model" if info.model.is_none() => {
                            info.model = value.parse().ok();
                        }
                        _ => {}
                    }
                }
            }
        }

        info.scaling_driver = sysfs
            .read_optional("sys/devices/system/cpu/cpu0/cpufreq/scaling_driver")
            .unwrap_or(None);

        info.governor = sysfs
            .read_optional("sys/devices/system/cpu/cpu0/cpufreq/scaling_governor")
            .unwrap_or(None);

        info.idle_driver = sysfs
            .read_optional("sys/devices/system/cpu/cpuidle/current_driver")
            .unwrap_or(None);

        info.idle_governor = sysfs
            .read_optional("sys/devices/system/cpu/cpuidle/current_governor_ro")
            .unwrap_or(None)
            .or_else(|| {
                sysfs
                    .read_optional("sys/devices/system/cpu/cpuidle/current_governor")
                    .unwrap_or(None)
            });

        info
    }

    pub fn is_intel(&self) -> bool {
        self.vendor.as_deref() == Some("GenuineIntel")
    }

    pub fn is_amd(&self) -> bool {
        self.vendor.as_deref() == Some("AuthenticAMD")
    }
}
