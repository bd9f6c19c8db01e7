pub mod freq;
pub mod node;
pub mod render;
pub mod state;
pub mod tree;

pub use node::{CpuLevel, CpuNode, NodeKind};
pub use render::{TableStyle, display_cpu_cstates, display_cpu_pstates};
pub use state::{Frequency, IdleState};
pub use tree::{NodeId, TopologyTree};

use serde::Serialize;

/// A display row of the C-state or P-state table.
///
/// Rows are ordered: the header first, then the C0/active row, then the
/// numbered state levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Row {
    Header,
    Active,
    Level(usize),
}

impl Row {
    /// Level number of a `Level` row.
    pub fn level(self) -> Option<usize> {
        match self {
            Row::Level(level) => Some(level),
            _ => None,
        }
    }
}

const KHZ: u64 = 1_000;
const MHZ: u64 = 1_000_000;

/// Format a frequency in Hz the way it is shown in the tables.
pub fn hz_to_human(hz: u64) -> String {
    if hz > 1_500 * MHZ {
        format!("{:.2} GHz", hz as f64 / 1e9)
    } else if hz > MHZ {
        format!("{} MHz", (hz + 500 * KHZ) / MHZ)
    } else if hz > KHZ {
        format!("{} kHz", (hz + 500) / KHZ)
    } else {
        format!("{} Hz", hz)
    }
}

/// Intel exposes the turbo bin as the highest non-turbo frequency plus 1 MHz.
pub fn is_turbo(freq: u64, max: u64, max_minus_one: u64) -> bool {
    freq != 0 && freq == max && max_minus_one + MHZ == max
}
