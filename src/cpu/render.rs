use super::node::{CpuLevel, CpuNode};
use super::tree::{NodeId, TopologyTree};
use super::Row;
use std::collections::BTreeSet;
use std::fmt::Write;

const NAME_WIDTH: usize = 11;
const LINE_WIDTH: usize = 17;

/// Delimiters used when assembling a table, so the same traversal can
/// produce plain text, a separated-value dump or markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStyle {
    pub start: String,
    pub end: String,
    pub line_start: String,
    pub separator: String,
    pub line_end: String,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            start: String::new(),
            end: String::new(),
            line_start: String::new(),
            separator: "| ".to_string(),
            line_end: "\n".to_string(),
        }
    }
}

fn written(buf: &mut String, f: impl FnOnce(&mut String)) -> usize {
    let start = buf.len();
    f(buf);
    buf.len() - start
}

pub(crate) fn cstate_name(node: &CpuNode, row: Row, buf: &mut String) -> usize {
    written(buf, |buf| match row {
        Row::Header => {
            let _ = write!(buf, "{} {}", node.kind(), node.number());
        }
        Row::Active => {
            if !node.cstates.is_empty() {
                buf.push_str("C0 active");
            }
        }
        Row::Level(_) => {
            if let Some(state) = node.cstates.iter().find(|s| s.line_level == row) {
                buf.push_str(&state.human_name);
            }
        }
    })
}

pub(crate) fn cstate_line(node: &CpuNode, row: Row, buf: &mut String) -> usize {
    written(buf, |buf| match row {
        Row::Header => {}
        Row::Active => {
            if !node.cstates.is_empty() {
                let _ = write!(buf, "{:5.1}%", node.active_percent());
            }
        }
        Row::Level(_) => {
            if let Some(state) = node.cstates.iter().find(|s| s.line_level == row) {
                let avg_ms = state.average_residency_us().unwrap_or(0.0) / 1000.0;
                let _ = write!(
                    buf,
                    "{:5.1}% {:6.1} ms",
                    node.residency_percent(state),
                    avg_ms
                );
            }
        }
    })
}

pub(crate) fn pstate_name(node: &CpuNode, row: Row, buf: &mut String) -> usize {
    written(buf, |buf| match row {
        Row::Header => {
            let _ = write!(buf, "{} {}", node.kind(), node.number());
        }
        Row::Active => {}
        Row::Level(i) => {
            if let Some(state) = node.pstates.get(i) {
                buf.push_str(&state.human_name);
            }
        }
    })
}

pub(crate) fn pstate_line(node: &CpuNode, row: Row, buf: &mut String) -> usize {
    written(buf, |buf| match row {
        Row::Header => {
            if node.effective_frequency > 0 {
                let _ = write!(buf, "avg {}", super::hz_to_human(node.effective_frequency));
            }
        }
        Row::Active => {}
        Row::Level(i) => {
            if let Some(state) = node.pstates.get(i) {
                let _ = write!(buf, "{:5.1}%", state.display_value);
            }
        }
    })
}

/// Nodes of one package that get their own columns, in depth-first order.
fn visible_nodes(tree: &TopologyTree, root: NodeId) -> Vec<&CpuNode> {
    tree.descendants(root)
        .into_iter()
        .filter_map(|id| tree.node(id))
        .filter(|node| !node.can_collapse())
        .collect()
}

fn push_cell(buf: &mut String, width: usize, fill: impl FnOnce(&mut String) -> usize) {
    let mut cell = String::new();
    fill(&mut cell);
    let _ = write!(buf, "{:<width$}", cell, width = width);
}

fn assemble(
    tree: &TopologyTree,
    style: &TableStyle,
    rows_of: impl Fn(&[&CpuNode]) -> Vec<Row>,
    has_level: impl Fn(&CpuNode, Row) -> bool,
    fill_name: impl Fn(&CpuNode, Row, &mut String) -> usize,
    fill_line: impl Fn(&CpuNode, Row, &mut String) -> usize,
) -> String {
    let mut out = String::new();
    out.push_str(&style.start);

    for &root in tree.roots() {
        let nodes = visible_nodes(tree, root);
        if nodes.is_empty() {
            continue;
        }

        for row in rows_of(&nodes) {
            if !nodes.iter().any(|node| has_level(node, row)) {
                continue;
            }
            out.push_str(&style.line_start);
            for node in &nodes {
                push_cell(&mut out, NAME_WIDTH, |cell| fill_name(node, row, cell));
                out.push_str(&style.separator);
                push_cell(&mut out, LINE_WIDTH, |cell| fill_line(node, row, cell));
                out.push_str(&style.separator);
            }
            out.push_str(&style.line_end);
        }
    }

    out.push_str(&style.end);
    out
}

/// Render the idle-state table of the whole tree, one block per package.
pub fn display_cpu_cstates(tree: &TopologyTree, style: &TableStyle) -> String {
    assemble(
        tree,
        style,
        |nodes| {
            let levels: BTreeSet<Row> = nodes
                .iter()
                .flat_map(|node| node.cstates.iter().map(|s| s.line_level))
                .chain([Row::Header, Row::Active])
                .collect();
            levels.into_iter().collect()
        },
        |node, row| node.has_cstate_level(row),
        |node, row, buf| node.fill_cstate_name(row, buf),
        |node, row, buf| node.fill_cstate_line(row, buf),
    )
}

/// Render the frequency table of the whole tree, one block per package.
pub fn display_cpu_pstates(tree: &TopologyTree, style: &TableStyle) -> String {
    assemble(
        tree,
        style,
        |nodes| {
            let depth = nodes.iter().map(|node| node.pstates.len()).max().unwrap_or(0);
            std::iter::once(Row::Header)
                .chain((0..depth).map(Row::Level))
                .collect()
        },
        |node, row| node.has_pstate_level(row),
        |node, row, buf| node.fill_pstate_name(row, buf),
        |node, row, buf| node.fill_pstate_line(row, buf),
    )
}
