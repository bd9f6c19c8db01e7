pub mod sysfs;

use crate::error::Result;
use serde::Serialize;

pub use self::sysfs::SysfsSampler;

/// Counters of one idle state of one logical CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdleSample {
    /// cpuidle directory name, e.g. `state2`
    pub name: String,
    pub human_name: String,
    pub usage: u64,
    /// Residency in microseconds
    pub duration: u64,
    pub count: u64,
}

/// Residency of one frequency of one logical CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreqSample {
    /// Frequency in Hz
    pub freq: u64,
    /// Label override; empty lets the node derive one from `freq`
    pub human_name: String,
    /// Residency in microseconds
    pub duration: u64,
    pub count: u64,
}

/// Everything read for one logical CPU at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CpuSample {
    pub idle: Vec<IdleSample>,
    pub freq: Vec<FreqSample>,
    /// Highest frequency the CPU may run at, in Hz
    pub max_frequency: Option<u64>,
}

/// Producer of raw per-CPU counters.
pub trait CounterSource {
    fn sample(&self, cpu: usize) -> Result<CpuSample>;
}

impl<T: CounterSource + ?Sized> CounterSource for &T {
    fn sample(&self, cpu: usize) -> Result<CpuSample> {
        (**self).sample(cpu)
    }
}

impl<T: CounterSource + ?Sized> CounterSource for Box<T> {
    fn sample(&self, cpu: usize) -> Result<CpuSample> {
        (**self).sample(cpu)
    }
}
