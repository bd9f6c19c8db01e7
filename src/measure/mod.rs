use crate::cpu::TopologyTree;
use crate::error::{Error, Result};
use crate::sample::{CounterSource, CpuSample};
use std::time::Instant;

/// Where a measurement cycle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No interval open, or the last one was aborted
    Idle,
    /// Baselines taken, waiting for `end`
    Measuring,
    /// End counters recorded, waiting for `process`
    Ended,
    /// Deltas computed and aggregated; the tree is safe to render
    Durable,
}

/// Drives the start/end/process protocol over a topology tree.
pub struct MeasurementCycle<S> {
    tree: TopologyTree,
    source: S,
    phase: Phase,
}

impl<S: CounterSource> MeasurementCycle<S> {
    pub fn new(tree: TopologyTree, source: S) -> Self {
        Self {
            tree,
            source,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tree(&self) -> &TopologyTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut TopologyTree {
        &mut self.tree
    }

    pub fn into_tree(self) -> TopologyTree {
        self.tree
    }

    /// Open an interval at `now` and take a baseline of every thread.
    ///
    /// `now` is converted to the tree's microsecond clock, the same one
    /// frequency events are stamped with. Starting while an interval is
    /// already open restarts it.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.phase == Phase::Measuring {
            tracing::debug!("restarting an open measurement");
        }
        let samples = self.sample_threads()?;

        let time = self.tree.timestamp(now);
        self.tree.measurement_start(time);
        for (cpu, sample) in samples {
            let node = self.thread_mut(cpu)?;
            if let Some(max) = sample.max_frequency {
                node.set_max_frequency(max);
            }
            for state in &sample.idle {
                node.rebase_cstate(
                    &state.name,
                    &state.human_name,
                    state.usage,
                    state.duration,
                    state.count,
                );
            }
            for freq in sorted_freqs(&sample) {
                node.rebase_pstate(freq.freq, &freq.human_name, freq.duration, freq.count);
            }
        }

        self.phase = Phase::Measuring;
        Ok(())
    }

    /// Close the interval at `now` and record the end counters.
    pub fn end(&mut self, now: Instant) -> Result<()> {
        if self.phase != Phase::Measuring {
            return Err(Error::Protocol(format!(
                "end requested in phase {:?}",
                self.phase
            )));
        }
        let samples = match self.sample_threads() {
            Ok(samples) => samples,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        let time = self.tree.timestamp(now);
        self.tree.measurement_end(time);
        for (cpu, sample) in samples {
            let node = self.thread_mut(cpu)?;
            for state in &sample.idle {
                node.update_cstate(
                    &state.name,
                    &state.human_name,
                    state.usage,
                    state.duration,
                    state.count,
                );
            }
            for freq in sorted_freqs(&sample) {
                node.update_pstate(freq.freq, &freq.human_name, freq.duration, freq.count);
            }
        }

        self.phase = Phase::Ended;
        Ok(())
    }

    /// Compute deltas on the threads, fold them into cores and packages and
    /// settle the effective frequencies over the interval.
    pub fn process(&mut self) -> Result<()> {
        if self.phase != Phase::Ended {
            return Err(Error::Protocol(format!(
                "process requested in phase {:?}",
                self.phase
            )));
        }
        self.tree.aggregate();
        self.phase = Phase::Durable;
        Ok(())
    }

    /// Drop whatever the open interval recorded.
    pub fn abort(&mut self) {
        self.tree.abort_measurement();
        self.phase = Phase::Idle;
    }

    /// Run one full interval, sleeping through `wait` between the samples.
    pub fn run(&mut self, wait: impl FnOnce()) -> Result<()> {
        self.start(Instant::now())?;
        wait();
        self.end(Instant::now())?;
        self.process()
    }

    fn sample_threads(&self) -> Result<Vec<(usize, CpuSample)>> {
        self.tree
            .threads()
            .map(|node| -> Result<(usize, CpuSample)> {
                let cpu = node.first_cpu();
                let sample = self.source.sample(cpu)?;
                tracing::trace!(
                    cpu,
                    cstates = sample.idle.len(),
                    pstates = sample.freq.len(),
                    "sampled"
                );
                Ok((cpu, sample))
            })
            .collect()
    }

    fn thread_mut(&mut self, cpu: usize) -> Result<&mut crate::cpu::CpuNode> {
        let id = self
            .tree
            .find_thread(cpu)
            .ok_or_else(|| Error::Topology(format!("no thread for CPU {}", cpu)))?;
        self.tree
            .node_mut(id)
            .ok_or_else(|| Error::Topology(format!("stale node for CPU {}", cpu)))
    }
}

/// Ascending by frequency, so the turbo step sees its predecessor on insert.
fn sorted_freqs(sample: &CpuSample) -> Vec<&crate::sample::FreqSample> {
    let mut freqs: Vec<_> = sample.freq.iter().collect();
    freqs.sort_by_key(|f| f.freq);
    freqs
}
