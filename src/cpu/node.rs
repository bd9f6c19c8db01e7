use super::freq::FreqAccount;
use super::state::{Frequency, IdleState, derive_line_level};
use super::tree::NodeId;
use super::{Row, hz_to_human, is_turbo, render};
use serde::Serialize;

/// Level of a node in the CPU topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A logical CPU (hardware thread), the only kind that reads counters
    Thread,
    Core,
    Package,
}

impl NodeKind {
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Thread => "CPU",
            NodeKind::Core => "Core",
            NodeKind::Package => "Package",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-kind behaviour used by the table renderers.
///
/// The provided methods are the behaviour of a node that contributes
/// nothing to the tables. The `fill_*` methods append one cell to `buf` and
/// return the number of bytes written.
pub trait CpuLevel {
    fn can_collapse(&self) -> bool {
        false
    }

    fn has_cstate_level(&self, _row: Row) -> bool {
        false
    }

    fn has_pstate_level(&self, _row: Row) -> bool {
        false
    }

    fn fill_cstate_line(&self, _row: Row, _buf: &mut String) -> usize {
        0
    }

    fn fill_cstate_name(&self, _row: Row, _buf: &mut String) -> usize {
        0
    }

    fn fill_pstate_line(&self, _row: Row, _buf: &mut String) -> usize {
        0
    }

    fn fill_pstate_name(&self, _row: Row, _buf: &mut String) -> usize {
        0
    }
}

/// One node of the topology tree: a hardware thread, a core or a package.
#[derive(Debug, Clone, Serialize)]
pub struct CpuNode {
    #[serde(skip)]
    pub(crate) id: NodeId,
    pub(crate) kind: NodeKind,
    pub(crate) number: usize,
    pub(crate) first_cpu: usize,

    #[serde(skip)]
    pub(crate) parent: Option<NodeId>,
    #[serde(skip)]
    pub(crate) children: Vec<NodeId>,
    pub childcount: usize,

    pub idle: bool,
    pub old_idle: bool,
    pub current_frequency: u64,
    pub effective_frequency: u64,
    pub max_frequency: u64,
    pub max_minus_one_frequency: u64,

    pub cstates: Vec<IdleState>,
    pub pstates: Vec<Frequency>,

    #[serde(skip)]
    pub(crate) stamp_before: Option<u64>,
    #[serde(skip)]
    pub(crate) stamp_after: Option<u64>,
    /// Length of the last interval in microseconds
    pub time_factor: f64,
    /// Hardware threads folded into this node's records
    pub(crate) leaves: usize,

    #[serde(skip)]
    pub(crate) account: FreqAccount,
}

impl CpuNode {
    pub(crate) fn new(
        id: NodeId,
        kind: NodeKind,
        number: usize,
        first_cpu: usize,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            id,
            kind,
            number,
            first_cpu,
            parent,
            children: Vec::new(),
            childcount: 0,
            idle: true,
            old_idle: true,
            current_frequency: 0,
            effective_frequency: 0,
            max_frequency: 0,
            max_minus_one_frequency: 0,
            cstates: Vec::new(),
            pstates: Vec::new(),
            stamp_before: None,
            stamp_after: None,
            time_factor: 0.0,
            leaves: usize::from(kind == NodeKind::Thread),
            account: FreqAccount::default(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn first_cpu(&self) -> usize {
        self.first_cpu
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Number of hardware threads aggregated into this node.
    pub fn leaves(&self) -> usize {
        self.leaves
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// True between `measurement_start` and `measurement_end`.
    pub fn is_measuring(&self) -> bool {
        self.stamp_before.is_some() && self.stamp_after.is_none()
    }

    /// Open a new interval at `time` (microseconds, the clock the frequency
    /// events use).
    ///
    /// The previous interval's after-counters become the baseline, so a state
    /// that is not sampled again reads a zero delta. Thread nodes get fresh
    /// baselines through `rebase_cstate`/`rebase_pstate` afterwards.
    pub fn measurement_start(&mut self, time: u64) {
        self.stamp_before = Some(time);
        self.stamp_after = None;
        for state in &mut self.cstates {
            state.rotate();
        }
        for state in &mut self.pstates {
            state.rotate();
        }
        self.account.reset(time);
    }

    /// Close the interval at `time` and derive `time_factor`.
    pub fn measurement_end(&mut self, time: u64) {
        let Some(before) = self.stamp_before else {
            debug_assert!(false, "measurement_end without measurement_start");
            tracing::warn!(node = %self, "measurement ended without a start stamp");
            self.time_factor = 0.0;
            return;
        };
        self.stamp_after = Some(time);
        self.time_factor = time.saturating_sub(before) as f64;
    }

    /// Drop an after-snapshot that was taken but never finalized.
    pub fn abort_measurement(&mut self) {
        self.stamp_after = None;
        for state in &mut self.cstates {
            state.discard();
        }
        for state in &mut self.pstates {
            state.discard();
        }
    }

    pub fn cstate(&self, linux_name: &str) -> Option<&IdleState> {
        self.cstates.iter().find(|s| s.linux_name == linux_name)
    }

    fn cstate_index(&self, linux_name: &str) -> Option<usize> {
        self.cstates.iter().position(|s| s.linux_name == linux_name)
    }

    /// Create the record for `linux_name` if this node has not seen it yet.
    /// Returns whether a record was created.
    pub fn insert_cstate(
        &mut self,
        linux_name: &str,
        human_name: &str,
        usage: u64,
        duration: u64,
        count: u64,
    ) -> bool {
        if self.cstate_index(linux_name).is_some() {
            return false;
        }
        let level = derive_line_level(linux_name, human_name, &self.cstates);
        self.cstates.push(IdleState::new(
            linux_name, human_name, level, usage, duration, count,
        ));
        true
    }

    /// Reset the interval baseline of `linux_name` to a fresh sample.
    pub fn rebase_cstate(
        &mut self,
        linux_name: &str,
        human_name: &str,
        usage: u64,
        duration: u64,
        count: u64,
    ) {
        if !self.insert_cstate(linux_name, human_name, usage, duration, count)
            && let Some(i) = self.cstate_index(linux_name)
        {
            self.cstates[i].rebase(usage, duration, count);
        }
    }

    /// Store the end-of-interval counters of `linux_name`. An unseen state is
    /// inserted with a zero baseline first.
    pub fn update_cstate(
        &mut self,
        linux_name: &str,
        human_name: &str,
        usage: u64,
        duration: u64,
        count: u64,
    ) {
        let i = match self.cstate_index(linux_name) {
            Some(i) => i,
            None => {
                self.insert_cstate(linux_name, human_name, 0, 0, 0);
                self.cstates.len() - 1
            }
        };
        self.cstates[i].record_after(usage, duration, count);
    }

    /// Close the interval for `linux_name` with its final counters and
    /// compute the deltas.
    pub fn finalize_cstate(&mut self, linux_name: &str, usage: u64, duration: u64, count: u64) {
        let Some(i) = self.cstate_index(linux_name) else {
            debug_assert!(false, "finalize of unknown C state {linux_name}");
            tracing::warn!(node = %self, state = linux_name, "finalize of unknown C state");
            return;
        };
        let state = &mut self.cstates[i];
        debug_assert!(state.updated, "finalize of C state {linux_name} without update");
        state.record_after(usage, duration, count);
        state.close();
    }

    pub fn pstate(&self, freq: u64) -> Option<&Frequency> {
        self.pstates.iter().find(|s| s.freq == freq)
    }

    fn pstate_index(&self, freq: u64) -> Option<usize> {
        self.pstates.iter().position(|s| s.freq == freq)
    }

    fn pstate_label(&self, freq: u64, human_name: &str) -> String {
        if freq == 0 {
            "Idle".to_string()
        } else if is_turbo(freq, self.max_frequency, self.max_minus_one_frequency) {
            "Turbo Mode".to_string()
        } else if human_name.is_empty() {
            hz_to_human(freq)
        } else {
            human_name.to_string()
        }
    }

    pub fn insert_pstate(&mut self, freq: u64, human_name: &str, duration: u64, count: u64) -> bool {
        if self.pstate_index(freq).is_some() {
            return false;
        }
        let label = self.pstate_label(freq, human_name);
        let level = self.pstates.len();
        self.pstates
            .push(Frequency::new(freq, label, level, duration, count));
        self.refresh_max_minus_one();
        true
    }

    pub fn rebase_pstate(&mut self, freq: u64, human_name: &str, duration: u64, count: u64) {
        if !self.insert_pstate(freq, human_name, duration, count)
            && let Some(i) = self.pstate_index(freq)
        {
            self.pstates[i].rebase(duration, count);
        }
    }

    pub fn update_pstate(&mut self, freq: u64, human_name: &str, duration: u64, count: u64) {
        let i = match self.pstate_index(freq) {
            Some(i) => i,
            None => {
                self.insert_pstate(freq, human_name, 0, 0);
                self.pstates.len() - 1
            }
        };
        self.pstates[i].record_after(duration, count);
    }

    pub fn finalize_pstate(&mut self, freq: u64, duration: u64, count: u64) {
        let Some(i) = self.pstate_index(freq) else {
            debug_assert!(false, "finalize of unknown P state {freq}");
            tracing::warn!(node = %self, freq, "finalize of unknown P state");
            return;
        };
        let time_factor = self.time_factor;
        let leaves = self.leaves;
        let state = &mut self.pstates[i];
        debug_assert!(state.updated, "finalize of P state {freq} without update");
        state.record_after(duration, count);
        state.close();
        state.compute_display_value(time_factor, leaves);
    }

    /// Set the frequency ceiling reported by the hardware.
    pub fn set_max_frequency(&mut self, max: u64) {
        self.max_frequency = max;
        self.refresh_max_minus_one();
    }

    fn refresh_max_minus_one(&mut self) {
        self.max_minus_one_frequency = self
            .pstates
            .iter()
            .map(|s| s.freq)
            .filter(|&f| f < self.max_frequency)
            .max()
            .unwrap_or(0);
    }

    /// Finalize every record sampled during the interval. Records that were
    /// not sampled again read a zero delta.
    pub(crate) fn finalize_interval(&mut self) {
        let updated: Vec<(String, u64, u64, u64)> = self
            .cstates
            .iter()
            .filter(|s| s.updated)
            .map(|s| (s.linux_name.clone(), s.usage_after, s.duration_after, s.after_count))
            .collect();
        for state in self.cstates.iter_mut().filter(|s| !s.updated) {
            state.discard();
            state.rotate();
            state.close();
        }
        for (name, usage, duration, count) in updated {
            self.finalize_cstate(&name, usage, duration, count);
        }

        let updated: Vec<(u64, u64, u64)> = self
            .pstates
            .iter()
            .filter(|s| s.updated)
            .map(|s| (s.freq, s.time_after, s.after_count))
            .collect();
        let time_factor = self.time_factor;
        let leaves = self.leaves;
        for state in self.pstates.iter_mut().filter(|s| !s.updated) {
            state.rotate();
            state.close();
            state.compute_display_value(time_factor, leaves);
        }
        for (freq, duration, count) in updated {
            self.finalize_pstate(freq, duration, count);
        }
    }

    /// Rebuild this aggregate node's records from its finalized children.
    ///
    /// Records keep their first-seen order; a record that none of the
    /// children reports any more stays in place with zero counters.
    pub(crate) fn absorb_children<'a>(&mut self, children: impl Iterator<Item = &'a CpuNode>) {
        for state in &mut self.cstates {
            state.clear();
        }
        for state in &mut self.pstates {
            state.clear();
        }
        self.leaves = 0;

        let mut max_frequency = 0;
        for child in children {
            self.leaves += child.leaves;
            max_frequency = max_frequency.max(child.max_frequency);

            for state in &child.cstates {
                let i = match self.cstate_index(&state.linux_name) {
                    Some(i) => i,
                    None => {
                        let mut fresh = state.clone();
                        fresh.clear();
                        fresh.line_level =
                            derive_line_level(&state.linux_name, &state.human_name, &self.cstates);
                        self.cstates.push(fresh);
                        self.cstates.len() - 1
                    }
                };
                self.cstates[i].absorb(state);
            }

            for state in &child.pstates {
                let i = match self.pstate_index(state.freq) {
                    Some(i) => i,
                    None => {
                        let mut fresh = state.clone();
                        fresh.clear();
                        fresh.line_level = self.pstates.len();
                        self.pstates.push(fresh);
                        self.pstates.len() - 1
                    }
                };
                self.pstates[i].absorb(state);
            }
        }

        self.set_max_frequency(max_frequency);
        let time_factor = self.time_factor;
        let leaves = self.leaves;
        for state in &mut self.pstates {
            state.compute_display_value(time_factor, leaves);
        }
    }

    /// Share of the interval spent in `state`, in percent of the node's
    /// total thread time.
    pub fn residency_percent(&self, state: &IdleState) -> f64 {
        let span = self.time_factor * self.leaves.max(1) as f64;
        if span <= 0.0 {
            return 0.0;
        }
        100.0 * state.duration_delta as f64 / span
    }

    /// Share of the interval spent outside every idle state.
    pub fn active_percent(&self) -> f64 {
        let idle: f64 = self
            .cstates
            .iter()
            .filter(|s| s.line_level != Row::Active)
            .map(|s| self.residency_percent(s))
            .sum();
        (100.0 - idle).clamp(0.0, 100.0)
    }

    pub(crate) fn refresh_effective_frequency(&mut self) {
        self.effective_frequency = self.account.average().unwrap_or(if self.idle {
            0
        } else {
            self.current_frequency
        });
    }
}

impl std::fmt::Display for CpuNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.number)
    }
}

impl CpuLevel for CpuNode {
    fn can_collapse(&self) -> bool {
        match self.kind {
            NodeKind::Thread => false,
            NodeKind::Core | NodeKind::Package => self.childcount == 1,
        }
    }

    fn has_cstate_level(&self, row: Row) -> bool {
        if self.can_collapse() {
            return false;
        }
        match row {
            Row::Header => true,
            Row::Active => !self.cstates.is_empty(),
            Row::Level(_) => self.cstates.iter().any(|s| s.line_level == row),
        }
    }

    fn has_pstate_level(&self, row: Row) -> bool {
        if self.can_collapse() {
            return false;
        }
        match row {
            Row::Header => true,
            Row::Active => false,
            Row::Level(i) => i < self.pstates.len(),
        }
    }

    fn fill_cstate_line(&self, row: Row, buf: &mut String) -> usize {
        render::cstate_line(self, row, buf)
    }

    fn fill_cstate_name(&self, row: Row, buf: &mut String) -> usize {
        render::cstate_name(self, row, buf)
    }

    fn fill_pstate_line(&self, row: Row, buf: &mut String) -> usize {
        render::pstate_line(self, row, buf)
    }

    fn fill_pstate_name(&self, row: Row, buf: &mut String) -> usize {
        render::pstate_name(self, row, buf)
    }
}
