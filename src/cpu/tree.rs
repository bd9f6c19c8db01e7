use super::Row;
use super::node::{CpuNode, NodeKind};
use crate::error::{Error, Result};
use serde::Serialize;
use std::time::Instant;

/// Handle of a node inside a [`TopologyTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The forest of CPU topology nodes.
///
/// Nodes live in an arena and refer to each other by [`NodeId`]. A node can
/// only be attached to a parent that already exists, so every child has a
/// larger index than its parent and walking the arena backwards visits
/// children before parents.
#[derive(Debug, Clone, Default)]
pub struct TopologyTree {
    nodes: Vec<CpuNode>,
    roots: Vec<NodeId>,
    epoch: Option<Instant>,
    /// Start and, once closed, end of the current interval
    window: Option<(u64, Option<u64>)>,
    /// Transitions reported since the interval started
    live_events: usize,
}

impl TopologyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node below `parent`, or a new root when `parent` is `None`.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        number: usize,
        first_cpu: usize,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        match parent {
            Some(p) => {
                let parent_node = self.nodes.get_mut(p.0).ok_or_else(|| {
                    Error::Topology(format!("parent node {} does not exist", p.0))
                })?;
                if parent_node.kind == NodeKind::Thread {
                    return Err(Error::Topology(format!(
                        "{} cannot have children",
                        parent_node
                    )));
                }
                parent_node.children.push(id);
                parent_node.childcount += 1;
            }
            None => self.roots.push(id),
        }
        self.nodes
            .push(CpuNode::new(id, kind, number, first_cpu, parent));
        Ok(id)
    }

    pub fn add_package(&mut self, number: usize, first_cpu: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.roots.push(id);
        self.nodes
            .push(CpuNode::new(id, NodeKind::Package, number, first_cpu, None));
        id
    }

    pub fn add_core(&mut self, package: NodeId, number: usize, first_cpu: usize) -> Result<NodeId> {
        self.add_node(NodeKind::Core, number, first_cpu, Some(package))
    }

    pub fn add_thread(&mut self, core: NodeId, cpu: usize) -> Result<NodeId> {
        self.add_node(NodeKind::Thread, cpu, cpu, Some(core))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&CpuNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut CpuNode> {
        self.nodes.get_mut(id.0)
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut CpuNode> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| Error::Topology(format!("node {} does not exist", id.0)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CpuNode> {
        self.nodes.iter()
    }

    /// All hardware-thread nodes, in creation order.
    pub fn threads(&self) -> impl Iterator<Item = &CpuNode> {
        self.nodes.iter().filter(|n| n.kind == NodeKind::Thread)
    }

    /// The thread node of logical CPU `cpu`.
    pub fn find_thread(&self, cpu: usize) -> Option<NodeId> {
        self.threads().find(|n| n.first_cpu == cpu).map(|n| n.id)
    }

    /// `root` and everything below it, depth first, parents before children.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            out.push(id);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Microseconds from the tree's epoch to `at`; the clock shared by the
    /// interval stamps and the frequency events. The first call fixes the
    /// epoch.
    pub fn timestamp(&mut self, at: Instant) -> u64 {
        let epoch = *self.epoch.get_or_insert(at);
        at.saturating_duration_since(epoch).as_micros() as u64
    }

    pub fn measurement_start(&mut self, time: u64) {
        for node in &mut self.nodes {
            node.measurement_start(time);
        }
        self.window = Some((time, None));
        self.live_events = 0;
    }

    pub fn measurement_end(&mut self, time: u64) {
        for node in &mut self.nodes {
            node.measurement_end(time);
        }
        if let Some((start, _)) = self.window {
            self.window = Some((start, Some(time)));
        }
    }

    pub fn abort_measurement(&mut self) {
        for node in &mut self.nodes {
            node.abort_measurement();
        }
        if let Some((start, _)) = self.window {
            self.window = Some((start, None));
        }
    }

    /// Finalize the thread counters, fold them up into cores and packages
    /// and close the frequency window at the interval end.
    ///
    /// When no idle or frequency transition was reported during the
    /// interval, each thread's transitions are derived from its finalized
    /// records: it runs for the non-idle part of the interval, split across
    /// frequencies by their residency.
    pub fn aggregate(&mut self) {
        for index in (0..self.nodes.len()).rev() {
            let (head, tail) = self.nodes.split_at_mut(index + 1);
            let node = &mut head[index];
            if node.children.is_empty() {
                if node.kind == NodeKind::Thread {
                    node.finalize_interval();
                }
                continue;
            }
            // children always sit after their parent in the arena
            let children = node.children.clone();
            node.absorb_children(children.iter().map(|c| &tail[c.0 - index - 1]));
        }

        if let Some((start, Some(end))) = self.window {
            if self.live_events == 0 {
                self.replay_residency(start);
            }
            self.settle_frequencies(end);
        }
    }

    fn replay_residency(&mut self, start: u64) {
        // (time, thread, frequency while busy, or None for idle)
        let mut events: Vec<(u64, NodeId, Option<u64>)> = Vec::new();
        for node in self.threads() {
            let mut time = start;
            for (freq, span) in busy_spans(node) {
                events.push((time, node.id, Some(freq)));
                time += span;
            }
            if time > start {
                events.push((time, node.id, None));
            }
        }
        events.sort_by_key(|&(time, _, _)| time);

        for (time, id, busy) in events {
            let node = &mut self.nodes[id.0];
            node.old_idle = node.idle;
            match busy {
                Some(freq) => {
                    node.idle = false;
                    node.current_frequency = freq;
                }
                None => node.idle = true,
            }
            self.propagate(id, time);
        }
        tracing::trace!(start, "derived frequency transitions from residency");
    }

    pub fn go_idle(&mut self, id: NodeId, time: u64) -> Result<()> {
        let node = self.get_mut(id)?;
        node.old_idle = node.idle;
        node.idle = true;
        self.live_events += 1;
        self.propagate(id, time);
        Ok(())
    }

    pub fn go_unidle(&mut self, id: NodeId, time: u64) -> Result<()> {
        let node = self.get_mut(id)?;
        node.old_idle = node.idle;
        node.idle = false;
        self.live_events += 1;
        self.propagate(id, time);
        Ok(())
    }

    pub fn change_freq(&mut self, id: NodeId, time: u64, freq: u64) -> Result<()> {
        self.get_mut(id)?.current_frequency = freq;
        self.live_events += 1;
        self.propagate(id, time);
        Ok(())
    }

    /// Recompute the frequency state of `id` and of every ancestor.
    pub fn calculate_freq(&mut self, id: NodeId, time: u64) -> Result<()> {
        self.get_mut(id)?;
        self.propagate(id, time);
        Ok(())
    }

    /// Each step integrates the node's rates up to `time`, then refreshes
    /// the rates from its direct children's cached rates, so a leaf event
    /// costs one pass up the parent chain.
    fn propagate(&mut self, id: NodeId, time: u64) {
        let mut cursor = Some(id);
        while let Some(id) = cursor {
            let (freq_rate, active_rate, busiest) = self.rates_below(id);
            let node = &mut self.nodes[id.0];
            node.account.advance(time);
            if node.children.is_empty() {
                let (freq_rate, active_rate) = if node.idle {
                    (0, 0)
                } else {
                    (node.current_frequency, 1)
                };
                node.account.set_rates(freq_rate, active_rate);
            } else {
                node.account.set_rates(freq_rate, active_rate);
                node.old_idle = node.idle;
                node.idle = active_rate == 0;
                node.current_frequency = busiest;
            }
            node.refresh_effective_frequency();
            cursor = node.parent;
        }
    }

    /// Sum of the children's rates and the highest busy child frequency.
    fn rates_below(&self, id: NodeId) -> (u64, u64, u64) {
        let node = &self.nodes[id.0];
        node.children
            .iter()
            .map(|c| &self.nodes[c.0])
            .fold((0, 0, 0), |(freq, active, busiest), child| {
                let child_busiest = if child.idle { 0 } else { child.current_frequency };
                (
                    freq + child.account.freq_rate,
                    active + child.account.active_rate,
                    busiest.max(child_busiest),
                )
            })
    }

    /// Integrate every node up to `time` so the effective frequencies cover
    /// the whole window, not just up to each subtree's last event.
    pub fn settle_frequencies(&mut self, time: u64) {
        for node in self.nodes.iter_mut().rev() {
            node.account.advance(time);
            node.refresh_effective_frequency();
        }
    }
}

/// How long `thread` ran at each frequency during its last interval, in
/// microseconds. The non-idle time is split across the frequencies in
/// proportion to their residency.
fn busy_spans(thread: &CpuNode) -> Vec<(u64, u64)> {
    let window = thread.time_factor as u64;
    let idle: u64 = thread
        .cstates
        .iter()
        .filter(|s| s.line_level != Row::Active)
        .map(|s| s.duration_delta)
        .sum();
    let busy = window.saturating_sub(idle);
    let total: u64 = thread
        .pstates
        .iter()
        .filter(|s| s.freq > 0)
        .map(|s| s.time_delta)
        .sum();
    if busy == 0 || total == 0 {
        return Vec::new();
    }
    thread
        .pstates
        .iter()
        .filter(|s| s.freq > 0 && s.time_delta > 0)
        .map(|s| {
            let span = u128::from(busy) * u128::from(s.time_delta) / u128::from(total);
            (s.freq, span as u64)
        })
        .filter(|&(_, span)| span > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuLevel;

    const GHZ: u64 = 1_000_000_000;

    /// Package P with one core C holding threads T0 and T1.
    fn chain() -> (TopologyTree, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = TopologyTree::new();
        let p = tree.add_package(0, 0);
        let c = tree.add_core(p, 0, 0).unwrap();
        let t0 = tree.add_thread(c, 0).unwrap();
        let t1 = tree.add_thread(c, 1).unwrap();
        (tree, p, c, t0, t1)
    }

    #[test]
    fn test_structure() {
        let (tree, p, c, t0, t1) = chain();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots(), &[p]);
        assert_eq!(tree.node(c).unwrap().children(), &[t0, t1]);
        assert_eq!(tree.node(t1).unwrap().parent(), Some(c));
        assert_eq!(tree.node(p).unwrap().childcount, 1);
        assert_eq!(tree.find_thread(1), Some(t1));
        assert_eq!(tree.descendants(p), vec![p, c, t0, t1]);
    }

    #[test]
    fn test_threads_cannot_have_children() {
        let (mut tree, _, _, t0, _) = chain();
        let err = tree.add_thread(t0, 7).unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
        assert!(tree.add_core(NodeId(99), 0, 0).is_err());
    }

    #[test]
    fn test_go_idle_reaches_root() {
        let (mut tree, p, c, t0, _) = chain();
        tree.change_freq(t0, 0, 2 * GHZ).unwrap();
        tree.go_unidle(t0, 0).unwrap();
        tree.change_freq(t0, 1_000, GHZ).unwrap();
        assert!(!tree.node(p).unwrap().idle);

        tree.go_idle(t0, 2_000).unwrap();

        // 2 GHz for 1000 and 1 GHz for 1000
        for id in [t0, c, p] {
            let node = tree.node(id).unwrap();
            assert_eq!(node.effective_frequency, 1_500_000_000, "{}", node);
        }
        assert!(tree.node(c).unwrap().idle);
        assert!(tree.node(p).unwrap().idle);
        assert!(!tree.node(p).unwrap().old_idle);
    }

    #[test]
    fn test_blend_is_weighted_by_busy_time() {
        let (mut tree, p, c, t0, t1) = chain();
        tree.change_freq(t0, 0, 2 * GHZ).unwrap();
        tree.change_freq(t1, 0, GHZ).unwrap();
        tree.go_unidle(t0, 0).unwrap();
        tree.go_unidle(t1, 0).unwrap();
        tree.go_idle(t0, 1_000).unwrap();
        tree.settle_frequencies(3_000);

        // (2 GHz * 1000 + 1 GHz * 3000) / 4000
        assert_eq!(tree.node(c).unwrap().effective_frequency, 1_250_000_000);
        assert_eq!(tree.node(p).unwrap().effective_frequency, 1_250_000_000);
        assert_eq!(tree.node(t1).unwrap().effective_frequency, GHZ);
        assert_eq!(tree.node(c).unwrap().current_frequency, GHZ);
    }

    #[test]
    fn test_propagation_does_not_touch_siblings() {
        let (mut tree, _, _, t0, t1) = chain();
        tree.go_unidle(t1, 5).unwrap();
        tree.go_unidle(t0, 10).unwrap();
        tree.go_idle(t0, 20).unwrap();
        assert_eq!(tree.node(t1).unwrap().account.last_stamp, Some(5));
    }

    #[test]
    fn test_calculate_freq_picks_up_direct_changes() {
        let (mut tree, p, _, t0, _) = chain();
        let node = tree.node_mut(t0).unwrap();
        node.idle = false;
        node.current_frequency = GHZ;
        tree.calculate_freq(t0, 0).unwrap();
        tree.settle_frequencies(500);

        assert_eq!(tree.node(p).unwrap().effective_frequency, GHZ);
        assert!(!tree.node(p).unwrap().idle);
        assert!(tree.calculate_freq(NodeId(42), 0).is_err());
    }

    #[test]
    fn test_window_covers_busy_time_before_start() {
        let (mut tree, p, _, t0, _) = chain();
        tree.change_freq(t0, 0, 2 * GHZ).unwrap();
        tree.go_unidle(t0, 0).unwrap();

        tree.measurement_start(1_000);
        tree.change_freq(t0, 2_000, GHZ).unwrap();
        tree.measurement_end(3_000);
        tree.aggregate();

        // 2 GHz from the window edge to 2000, then 1 GHz
        assert_eq!(tree.node(t0).unwrap().effective_frequency, 1_500_000_000);
        assert_eq!(tree.node(p).unwrap().effective_frequency, 1_500_000_000);
    }

    #[test]
    fn test_frequency_derived_from_residency() {
        let (mut tree, p, c, t0, t1) = chain();
        tree.measurement_start(0);
        for id in [t0, t1] {
            let node = tree.node_mut(id).unwrap();
            node.rebase_cstate("state1", "C1", 0, 0, 0);
            node.rebase_pstate(2 * GHZ, "2.00 GHz", 0, 0);
            node.rebase_pstate(GHZ, "1000 MHz", 0, 0);
        }
        let node = tree.node_mut(t0).unwrap();
        node.update_cstate("state1", "C1", 10, 400, 0);
        node.update_pstate(2 * GHZ, "2.00 GHz", 300, 0);
        node.update_pstate(GHZ, "1000 MHz", 300, 0);
        // t1 never leaves C1
        let node = tree.node_mut(t1).unwrap();
        node.update_cstate("state1", "C1", 1, 1_000, 0);
        tree.measurement_end(1_000);
        tree.aggregate();

        // t0 is busy for 600 of 1000, split evenly between the two bins
        assert_eq!(tree.node(t0).unwrap().effective_frequency, 1_500_000_000);
        assert_eq!(tree.node(t1).unwrap().effective_frequency, 0);
        assert_eq!(tree.node(c).unwrap().effective_frequency, 1_500_000_000);
        assert_eq!(tree.node(p).unwrap().effective_frequency, 1_500_000_000);
        assert!(tree.node(p).unwrap().idle);
    }

    #[test]
    fn test_reported_transitions_win_over_residency() {
        let (mut tree, p, _, t0, _) = chain();
        tree.measurement_start(0);
        let node = tree.node_mut(t0).unwrap();
        node.rebase_pstate(2 * GHZ, "2.00 GHz", 0, 0);
        node.update_pstate(2 * GHZ, "2.00 GHz", 1_000, 0);
        tree.change_freq(t0, 0, GHZ).unwrap();
        tree.go_unidle(t0, 0).unwrap();
        tree.measurement_end(1_000);
        tree.aggregate();

        assert_eq!(tree.node(p).unwrap().effective_frequency, GHZ);
    }

    #[test]
    fn test_timestamp_counts_from_first_use() {
        let mut tree = TopologyTree::new();
        let t0 = Instant::now();
        assert_eq!(tree.timestamp(t0), 0);
        assert_eq!(tree.timestamp(t0 + std::time::Duration::from_millis(3)), 3_000);
        assert_eq!(tree.timestamp(t0), 0);
    }

    #[test]
    fn test_collapse_is_display_only() {
        let (mut tree, p, c, t0, t1) = chain();
        tree.measurement_start(0);
        for id in [t0, t1] {
            let node = tree.node_mut(id).unwrap();
            node.rebase_cstate("state1", "C1", 100, 1000, 5);
        }
        tree.node_mut(t0)
            .unwrap()
            .update_cstate("state1", "C1", 140, 1400, 7);
        tree.node_mut(t1)
            .unwrap()
            .update_cstate("state1", "C1", 100, 1000, 5);
        tree.measurement_end(10_000);
        tree.aggregate();

        let package = tree.node(p).unwrap();
        assert!(package.can_collapse());
        assert!(!package.has_cstate_level(Row::Level(1)));
        let state = package.cstate("state1").unwrap();
        assert_eq!(state.usage_delta, 40);
        assert_eq!(state.duration_delta, 400);
        assert_eq!(state.count_delta(), 2);
        assert_eq!(package.leaves(), 2);

        let core = tree.node(c).unwrap();
        assert!(!core.can_collapse());
        assert!(core.has_cstate_level(Row::Level(1)));
        assert_eq!(core.cstate("state1").unwrap().usage_delta, 40);
    }

    #[test]
    fn test_aggregate_regression_does_not_stop_siblings() {
        let (mut tree, _, c, t0, t1) = chain();
        tree.measurement_start(0);
        tree.node_mut(t0)
            .unwrap()
            .rebase_cstate("state1", "C1", 500, 0, 0);
        tree.node_mut(t1)
            .unwrap()
            .rebase_cstate("state1", "C1", 100, 0, 0);
        tree.node_mut(t0)
            .unwrap()
            .update_cstate("state1", "C1", 480, 0, 0);
        tree.node_mut(t1)
            .unwrap()
            .update_cstate("state1", "C1", 130, 0, 0);
        tree.measurement_end(10_000);
        tree.aggregate();

        assert_eq!(tree.node(t0).unwrap().cstate("state1").unwrap().usage_delta, 0);
        assert_eq!(tree.node(t1).unwrap().cstate("state1").unwrap().usage_delta, 30);
        assert_eq!(tree.node(c).unwrap().cstate("state1").unwrap().usage_delta, 30);
    }
}
