use super::Row;
use serde::Serialize;

/// Accumulated counters of one cpuidle state on one topology node.
///
/// `before` holds the counters at interval start, `after` the counters at
/// interval end, and the deltas are recomputed when the interval is
/// finalized. The counters are monotonic; a reading that goes backwards
/// produces a zero delta.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdleState {
    /// cpuidle directory name, e.g. `state2`
    pub linux_name: String,
    /// Label shown in the tables, e.g. `C1E`
    pub human_name: String,

    pub usage_before: u64,
    pub usage_after: u64,
    pub usage_delta: u64,

    /// Residency counters in microseconds
    pub duration_before: u64,
    pub duration_after: u64,
    pub duration_delta: u64,

    pub before_count: u64,
    pub after_count: u64,

    pub line_level: Row,

    #[serde(skip)]
    pub(crate) updated: bool,
}

impl IdleState {
    pub fn new(
        linux_name: impl Into<String>,
        human_name: impl Into<String>,
        line_level: Row,
        usage: u64,
        duration: u64,
        count: u64,
    ) -> Self {
        Self {
            linux_name: linux_name.into(),
            human_name: human_name.into(),
            usage_before: usage,
            usage_after: usage,
            usage_delta: 0,
            duration_before: duration,
            duration_after: duration,
            duration_delta: 0,
            before_count: count,
            after_count: count,
            line_level,
            updated: false,
        }
    }

    /// Number of state entries observed during the interval.
    pub fn count_delta(&self) -> u64 {
        self.after_count.saturating_sub(self.before_count)
    }

    /// Average time spent per entry during the interval, in microseconds.
    pub fn average_residency_us(&self) -> Option<f64> {
        (self.usage_delta > 0).then(|| self.duration_delta as f64 / self.usage_delta as f64)
    }

    pub(crate) fn rebase(&mut self, usage: u64, duration: u64, count: u64) {
        self.usage_before = usage;
        self.duration_before = duration;
        self.before_count = count;
    }

    pub(crate) fn record_after(&mut self, usage: u64, duration: u64, count: u64) {
        self.usage_after = usage;
        self.duration_after = duration;
        self.after_count = count;
        self.updated = true;
    }

    /// Compute the interval deltas from the before/after counters.
    pub(crate) fn close(&mut self) {
        if self.usage_after < self.usage_before
            || self.duration_after < self.duration_before
            || self.after_count < self.before_count
        {
            tracing::warn!(
                state = %self.linux_name,
                usage_before = self.usage_before,
                usage_after = self.usage_after,
                duration_before = self.duration_before,
                duration_after = self.duration_after,
                "idle state counter went backwards, clamping delta to zero"
            );
        }
        self.usage_delta = self.usage_after.saturating_sub(self.usage_before);
        self.duration_delta = self.duration_after.saturating_sub(self.duration_before);
        self.updated = false;
    }

    /// Make the previous interval's end the next interval's baseline.
    pub(crate) fn rotate(&mut self) {
        self.usage_before = self.usage_after;
        self.duration_before = self.duration_after;
        self.before_count = self.after_count;
        self.updated = false;
    }

    /// Throw away an after-sample that was never finalized.
    pub(crate) fn discard(&mut self) {
        if self.updated {
            self.usage_after = self.usage_before;
            self.duration_after = self.duration_before;
            self.after_count = self.before_count;
            self.updated = false;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.rebase(0, 0, 0);
        self.record_after(0, 0, 0);
        self.usage_delta = 0;
        self.duration_delta = 0;
        self.updated = false;
    }

    /// Add a child node's finalized record into this aggregate record.
    pub(crate) fn absorb(&mut self, child: &IdleState) {
        let count_delta = self.count_delta() + child.count_delta();
        self.usage_before += child.usage_before;
        self.duration_before += child.duration_before;
        self.before_count += child.before_count;
        self.usage_delta += child.usage_delta;
        self.duration_delta += child.duration_delta;
        self.usage_after = self.usage_before + self.usage_delta;
        self.duration_after = self.duration_before + self.duration_delta;
        self.after_count = self.before_count + count_delta;
    }
}

/// Accumulated residency of one frequency on one topology node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frequency {
    /// Frequency in Hz, the identity of the record
    pub freq: u64,
    pub human_name: String,
    pub line_level: usize,

    /// Time counters in microseconds
    pub time_before: u64,
    pub time_after: u64,
    pub time_delta: u64,

    pub before_count: u64,
    pub after_count: u64,

    /// Percentage of the interval spent at this frequency
    pub display_value: f64,

    #[serde(skip)]
    pub(crate) updated: bool,
}

impl Frequency {
    pub fn new(
        freq: u64,
        human_name: impl Into<String>,
        line_level: usize,
        duration: u64,
        count: u64,
    ) -> Self {
        Self {
            freq,
            human_name: human_name.into(),
            line_level,
            time_before: duration,
            time_after: duration,
            time_delta: 0,
            before_count: count,
            after_count: count,
            display_value: 0.0,
            updated: false,
        }
    }

    pub fn count_delta(&self) -> u64 {
        self.after_count.saturating_sub(self.before_count)
    }

    pub(crate) fn rebase(&mut self, duration: u64, count: u64) {
        self.time_before = duration;
        self.before_count = count;
    }

    pub(crate) fn record_after(&mut self, duration: u64, count: u64) {
        self.time_after = duration;
        self.after_count = count;
        self.updated = true;
    }

    pub(crate) fn close(&mut self) {
        if self.time_after < self.time_before || self.after_count < self.before_count {
            tracing::warn!(
                freq = self.freq,
                time_before = self.time_before,
                time_after = self.time_after,
                "frequency residency counter went backwards, clamping delta to zero"
            );
        }
        self.time_delta = self.time_after.saturating_sub(self.time_before);
        self.updated = false;
    }

    pub(crate) fn rotate(&mut self) {
        self.time_before = self.time_after;
        self.before_count = self.after_count;
        self.updated = false;
    }

    pub(crate) fn discard(&mut self) {
        if self.updated {
            self.time_after = self.time_before;
            self.after_count = self.before_count;
            self.updated = false;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.rebase(0, 0);
        self.record_after(0, 0);
        self.time_delta = 0;
        self.display_value = 0.0;
        self.updated = false;
    }

    pub(crate) fn absorb(&mut self, child: &Frequency) {
        let count_delta = self.count_delta() + child.count_delta();
        self.time_before += child.time_before;
        self.before_count += child.before_count;
        self.time_delta += child.time_delta;
        self.time_after = self.time_before + self.time_delta;
        self.after_count = self.before_count + count_delta;
    }

    /// Derive `display_value` from the interval length in microseconds and
    /// the number of hardware threads folded into this record.
    pub(crate) fn compute_display_value(&mut self, time_factor: f64, leaves: usize) {
        let span = time_factor * leaves.max(1) as f64;
        self.display_value = if span > 0.0 {
            100.0 * self.time_delta as f64 / span
        } else {
            0.0
        };
    }
}

/// Work out the table row of a newly seen idle state from its names.
///
/// The first digit run of the human name gives the level (`C6` is row 6).
/// A variant such as `C1E` that shows up next to an existing `C1` is
/// pushed one row below the deepest record sharing its digit. Names
/// without digits fall back to the cpuidle directory index. A row that is
/// already taken on this node moves the state below every used row, so no
/// two states share a row.
pub fn derive_line_level(linux_name: &str, human_name: &str, existing: &[IdleState]) -> Row {
    if linux_name == "active" {
        return Row::Active;
    }

    let level = match leading_digit_run(human_name) {
        Some((digits, next)) => {
            let mut level: usize = digits.parse().unwrap_or(0);
            if next != Some('-') {
                let deepest = existing
                    .iter()
                    .filter(|state| {
                        leading_digit_run(&state.human_name)
                            .is_some_and(|(d, n)| d == digits && n != next)
                    })
                    .filter_map(|state| state.line_level.level())
                    .max();
                if let Some(deepest) = deepest {
                    level = level.max(deepest) + 1;
                }
            }
            level
        }
        None => leading_digit_run(linux_name)
            .and_then(|(digits, _)| digits.parse().ok())
            .unwrap_or(0),
    };

    if existing.iter().any(|state| state.line_level == Row::Level(level)) {
        let deepest = existing
            .iter()
            .filter_map(|state| state.line_level.level())
            .max()
            .unwrap_or(level);
        return Row::Level(deepest.max(level) + 1);
    }
    Row::Level(level)
}

fn leading_digit_run(name: &str) -> Option<(&str, Option<char>)> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let rest = &name[start..];
    let len = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some((&rest[..len], rest[len..].chars().next()))
}
