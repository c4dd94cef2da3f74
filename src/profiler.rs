//! Code profiler for the runtime works by keeping track of how often each
//! instruction runs and how often loop headers are entered. A loop entry is
//! seen whenever the instruction pointer does not move forward, which only
//! a taken jump can cause. When a loop header has exceeded the threshold
//! it's considered hot.
use std::collections::HashMap;

#[derive(Debug)]
pub struct Profiler {
    // Threshold before a loop entry is considered hot.
    threshold: usize,
    // Last executed instruction pointer.
    last_ip: Option<usize>,
    // Record of loop entries and their access counts.
    records: HashMap<usize, usize>,
    // Executions per instruction pointer.
    steps: HashMap<usize, usize>,
}

impl Profiler {
    pub fn new() -> Profiler {
        Self::with_threshold(2)
    }

    pub fn with_threshold(threshold: usize) -> Profiler {
        Profiler {
            threshold,
            last_ip: None,
            records: HashMap::new(),
            steps: HashMap::new(),
        }
    }

    /// Account for the instruction at `ip` about to execute.
    pub fn count_entry(&mut self, ip: usize) {
        *self.steps.entry(ip).or_insert(0) += 1;
        if matches!(self.last_ip, Some(last) if ip <= last) {
            *self.records.entry(ip).or_insert(0) += 1;
        }
        self.last_ip = Some(ip);
    }

    pub fn is_hot(&self, ip: usize) -> bool {
        if let Some(record) = self.records.get(&ip) {
            return record > &self.threshold;
        }
        false
    }

    /// Number of times the instruction at `ip` was executed.
    pub fn executions(&self, ip: usize) -> usize {
        self.steps.get(&ip).copied().unwrap_or(0)
    }

    /// Total number of executed instructions.
    pub fn total_steps(&self) -> usize {
        self.steps.values().sum()
    }

    /// Loop headers and their entry counts, ordered by instruction pointer.
    pub fn loop_headers(&self) -> Vec<(usize, usize)> {
        let mut headers: Vec<_> =
            self.records.iter().map(|(ip, count)| (*ip, *count)).collect();
        headers.sort_unstable();
        headers
    }

    /// Renders a short summary of the collected counts.
    pub fn summary(&self) -> String {
        let mut s = format!("{} instructions executed", self.total_steps());
        for (ip, count) in self.loop_headers() {
            let hot = if self.is_hot(ip) { " (hot)" } else { "" };
            s.push_str(&format!("\nloop header {ip}: {count} entries{hot}"));
        }
        s
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}
