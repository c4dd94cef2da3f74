//! Execution tracing module for the runtime.
use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::Instruction;

/// Trace recording captures every instruction executed during a run. Each
/// record entry is a tuple of (ip, inst, depth) where ip is the position of
/// the instruction in the program and depth the stack size before it ran.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    pub ip: usize,
    pub inst: Instruction,
    pub depth: usize,
}

/// A finished recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recording {
    pub trace: Vec<RecordEntry>,
    /// Targets of the jumps that were taken.
    pub branch_targets: BTreeSet<usize>,
}

impl Recording {
    pub fn len(&self) -> usize {
        self.trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trace.is_empty()
    }

    /// Renders the recorded trace, one executed instruction per line.
    /// Jump targets are marked with `>`.
    pub fn debug(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "---- Trace recorded : {} steps ----", self.len());
        for record in &self.trace {
            let marker = if self.branch_targets.contains(&record.ip) {
                '>'
            } else {
                ' '
            };
            let _ = writeln!(
                s,
                "{marker}{:>5}  {:<12} depth {}",
                record.ip,
                record.inst.to_string(),
                record.depth
            );
        }
        s
    }
}

#[derive(Debug, Default)]
pub struct TraceRecorder {
    is_recording: bool,
    trace: Vec<RecordEntry>,
    branch_targets: BTreeSet<usize>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    // Check if we are recording a trace already.
    pub const fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Init a trace recording, dropping anything recorded before.
    pub fn init(&mut self) {
        self.is_recording = true;
        self.trace.clear();
        self.branch_targets.clear();
    }

    pub fn record(&mut self, ip: usize, inst: Instruction, depth: usize) {
        if self.is_recording {
            self.trace.push(RecordEntry { ip, inst, depth });
        }
    }

    pub fn record_branch(&mut self, target: usize) {
        if self.is_recording {
            self.branch_targets.insert(target);
        }
    }

    /// Stop recording and return the recorded trace.
    pub fn get_recording(&mut self) -> Recording {
        self.is_recording = false;
        Recording {
            trace: std::mem::take(&mut self.trace),
            branch_targets: std::mem::take(&mut self.branch_targets),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::build::*;
    use crate::program::Program;
    use crate::runtime::{Environment, Runtime, Stack};

    #[test]
    fn recorder_ignores_entries_until_init() {
        let mut recorder = TraceRecorder::new();
        assert!(!recorder.is_recording());
        recorder.record(0, dup(), 1);
        recorder.init();
        recorder.record(1, add(), 2);
        let recording = recorder.get_recording();
        assert!(!recorder.is_recording());
        assert_eq!(
            recording.trace,
            vec![RecordEntry {
                ip: 1,
                inst: add(),
                depth: 2
            }]
        );
    }

    #[test]
    fn can_record_loop_trace() {
        // Counts R0 down from 2 to 0.
        let program = Program::new(vec![
            push_const(2),
            pop_reg(0),
            push_reg(0),
            push_const(1),
            sub(),
            dup(),
            pop_reg(0),
            push_const(0),
            jump_gt(-6),
        ]);
        let mut runtime =
            Runtime::new(&program, Environment::new(), Stack::new())
                .with_recorder(TraceRecorder::new());
        assert_eq!(runtime.run(), Ok(9));
        let (state, recorder, _) = runtime.into_parts();
        assert_eq!(state.env[&0], 0);

        let recording = recorder.unwrap().get_recording();
        // 2 setup instructions, then the 7 instruction body twice.
        assert_eq!(recording.len(), 2 + 7 * 2);
        assert_eq!(recording.branch_targets, BTreeSet::from([2]));
        assert_eq!(recording.trace[8].inst, jump_gt(-6));
        assert_eq!(recording.trace[8].depth, 2);
        assert_eq!(recording.trace[9].ip, 2);

        let listing = recording.debug();
        assert!(listing.starts_with("---- Trace recorded : 16 steps ----\n"));
        assert!(listing.contains(">    2  PUSH R0"));
    }
}
