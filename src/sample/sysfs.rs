use super::{CounterSource, CpuSample, FreqSample, IdleSample};
use crate::error::{Error, Result};
use crate::sysfs::{SysfsRoot, indexed_entry};

const CPU_BASE: &str = "sys/devices/system/cpu";

/// `time_in_state` counts in units of 10 ms.
const TIME_IN_STATE_UNIT_US: u64 = 10_000;

/// Reads cpuidle and cpufreq statistics from sysfs.
#[derive(Debug, Clone)]
pub struct SysfsSampler {
    sysfs: SysfsRoot,
}

impl SysfsSampler {
    pub fn new(sysfs: SysfsRoot) -> Self {
        Self { sysfs }
    }

    fn idle_states(&self, cpu: usize) -> Result<Vec<IdleSample>> {
        let base = format!("{}/cpu{}/cpuidle", CPU_BASE, cpu);
        if !self.sysfs.exists(&base) {
            tracing::debug!(cpu, "no cpuidle directory");
            return Ok(Vec::new());
        }

        let mut states: Vec<(usize, String)> = self
            .sysfs
            .list_dir(&base)?
            .into_iter()
            .filter_map(|entry| indexed_entry(&entry, "state").map(|i| (i, entry)))
            .collect();
        states.sort_by_key(|(i, _)| *i);

        let mut samples = Vec::with_capacity(states.len());
        for (_, entry) in states {
            let dir = format!("{}/{}", base, entry);
            let human_name = self
                .sysfs
                .read_optional(format!("{}/name", dir))?
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| entry.clone());
            let usage = self.sysfs.read_parse::<u64>(format!("{}/usage", dir))?;
            let duration = self.sysfs.read_parse::<u64>(format!("{}/time", dir))?;
            samples.push(IdleSample {
                name: entry,
                human_name,
                usage,
                duration,
                count: 1,
            });
        }
        Ok(samples)
    }

    fn frequencies(&self, cpu: usize) -> Result<Vec<FreqSample>> {
        let path = format!("{}/cpu{}/cpufreq/stats/time_in_state", CPU_BASE, cpu);
        let Some(content) = self.sysfs.read_optional(&path)? else {
            tracing::debug!(cpu, "no cpufreq statistics");
            return Ok(Vec::new());
        };

        let mut samples = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let mut fields = line.split_whitespace();
            let (Some(khz), Some(ticks)) = (fields.next(), fields.next()) else {
                return Err(Error::Parse {
                    path: self.sysfs.path(&path),
                    detail: format!("malformed line '{}'", line),
                });
            };
            let parse = |value: &str| {
                value.parse::<u64>().map_err(|e| Error::Parse {
                    path: self.sysfs.path(&path),
                    detail: format!("failed to parse '{}': {}", value, e),
                })
            };
            samples.push(FreqSample {
                freq: parse(khz)? * 1_000,
                human_name: String::new(),
                duration: parse(ticks)? * TIME_IN_STATE_UNIT_US,
                count: 1,
            });
        }
        Ok(samples)
    }

    fn max_frequency(&self, cpu: usize) -> Result<Option<u64>> {
        let path = format!("{}/cpu{}/cpufreq/cpuinfo_max_freq", CPU_BASE, cpu);
        Ok(self
            .sysfs
            .read_parse_optional::<u64>(path)?
            .map(|khz| khz * 1_000))
    }
}

impl CounterSource for SysfsSampler {
    fn sample(&self, cpu: usize) -> Result<CpuSample> {
        Ok(CpuSample {
            idle: self.idle_states(cpu)?,
            freq: self.frequencies(cpu)?,
            max_frequency: self.max_frequency(cpu)?,
        })
    }
}
