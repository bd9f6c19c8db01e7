/// Running frequency integral of one node.
///
/// `freq_rate` is the sum of the current frequencies of the busy hardware
/// threads below the node and `active_rate` their count, so integrating both
/// over time gives the frequency-time product and the busy time of the
/// subtree. Aggregate nodes get their rates by summing their direct
/// children's rates, which keeps every recomputation local to one level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreqAccount {
    pub freq_time: u128,
    pub active_time: u64,
    pub freq_rate: u64,
    pub active_rate: u64,
    pub last_stamp: Option<u64>,
}

impl FreqAccount {
    /// Integrate the current rates up to `time`.
    ///
    /// Timestamps older than the last one are treated as "now".
    pub fn advance(&mut self, time: u64) {
        let time = match self.last_stamp {
            Some(last) => {
                let time = time.max(last);
                let dt = time - last;
                self.freq_time += u128::from(self.freq_rate) * u128::from(dt);
                self.active_time += self.active_rate * dt;
                time
            }
            None => time,
        };
        self.last_stamp = Some(time);
    }

    pub fn set_rates(&mut self, freq_rate: u64, active_rate: u64) {
        self.freq_rate = freq_rate;
        self.active_rate = active_rate;
    }

    /// Time-weighted average frequency over the busy time of the window.
    pub fn average(&self) -> Option<u64> {
        if self.active_time == 0 {
            return None;
        }
        Some((self.freq_time / u128::from(self.active_time)) as u64)
    }

    /// Open a new window at `start`, keeping the current rates so a thread
    /// that was already busy is accounted from the window edge.
    pub fn reset(&mut self, start: u64) {
        self.freq_time = 0;
        self.active_time = 0;
        self.last_stamp = Some(start);
    }
}
