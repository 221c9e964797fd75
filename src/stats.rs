use std::time::Instant;

/// Counters for one capture session. Owned by the pipeline and only read on
///  the receive path, so plain integers suffice.
#[derive(Debug)]
pub struct SessionStats {
    pub total: u64,
    /// Packets dropped by validation; never journaled.
    pub invalid: u64,
    /// Heartbeats short-circuited by the filter; never journaled.
    pub heartbeats_skipped: u64,
    pub data: u64,
    pub admin: u64,
    pub unsequenced: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    start: Instant,
}

impl SessionStats {
    pub fn new() -> SessionStats {
        SessionStats {
            total: 0,
            invalid: 0,
            heartbeats_skipped: 0,
            data: 0,
            admin: 0,
            unsequenced: 0,
            out_of_order: 0,
            duplicates: 0,
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn packets_per_second(&self) -> f64 {
        let elapsed = self.elapsed_seconds();
        if elapsed > 0.0 {
            self.total as f64 / elapsed
        }
        else {
            0.0
        }
    }

    /// One-line performance summary for the periodic and final reports.
    pub fn report(&self) -> String {
        let pps = self.packets_per_second();
        let mut line = format!(
            "{} packets, {:.0} pps, {:.1}s elapsed",
            self.total,
            pps,
            self.elapsed_seconds()
        );

        if self.heartbeats_skipped > 0 {
            line.push_str(&format!(", {} heartbeats skipped", self.heartbeats_skipped));
        }
        if self.invalid > 0 {
            line.push_str(&format!(", {} invalid", self.invalid));
        }
        if self.out_of_order > 0 || self.duplicates > 0 {
            line.push_str(&format!(
                ", {} OOO, {} dups",
                self.out_of_order, self.duplicates
            ));
        }
        if pps < 50_000.0 && self.total > 100_000 {
            line.push_str(" [below 50K pps target]");
        }

        line
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl SessionStats {
    fn backdated_by(seconds: u64) -> SessionStats {
        let mut stats = SessionStats::new();
        stats.start = Instant::now() - std::time::Duration::from_secs(seconds);
        stats
    }
}
