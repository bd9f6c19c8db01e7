//! Idle-state and frequency residency accounting over the CPU topology.
//!
//! Threads read their cpuidle and cpufreq counters at the start and end of
//! an interval; cores and packages aggregate the resulting deltas.

pub mod cli;
pub mod config;
pub mod cpu;
pub mod detect;
pub mod error;
pub mod measure;
pub mod output;
pub mod sample;
pub mod sysfs;
