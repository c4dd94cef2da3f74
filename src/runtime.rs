//! Runtime module responsible for executing a program against an
//! evaluation stack and a register environment.
use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::bytecode::{Instruction, Integer, Register};
use crate::profiler::Profiler;
use crate::program::Program;
use crate::trace::TraceRecorder;

/// LIFO of integers, the top of the stack is the last element.
pub type Stack = Vec<Integer>;

/// Sparse register file. Registers come into existence on their first write.
pub type Environment = BTreeMap<Register, Integer>;

type Result<T> = std::result::Result<T, RuntimeError>;

/// `RuntimeErrorKind` represents the possible errors that can occur
/// during runtime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    /// A register was read before it was ever written.
    #[error("source registry doesn't exist")]
    SourceRegistryDoesntExist,
    /// An instruction needed one or two stack values but fewer were present.
    #[error("requires stack to not be empty")]
    RequiresStackToNotBeEmpty,
    /// A taken jump would move the instruction pointer out of the program.
    #[error("instruction pointer became invalid")]
    InstructionPointerInvalid,
}

/// `RuntimeError` is a failure together with the index of the instruction
/// that caused it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("error in instruction #{}: {}", .ip + 1, .kind)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub ip: usize,
}

/// Execution state of a single run: the instruction pointer, the stack and
/// the environment. A run owns its state exclusively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub ip: usize,
    pub stack: Stack,
    pub env: Environment,
}

impl State {
    /// Returns the top of the stack without removing it.
    fn peek(&self) -> std::result::Result<Integer, RuntimeErrorKind> {
        self.stack
            .last()
            .copied()
            .ok_or(RuntimeErrorKind::RequiresStackToNotBeEmpty)
    }

    /// Returns `(a, b)` where `b` is the top of the stack and `a` the value
    /// right below it, without removing them.
    fn peek_pair(
        &self,
    ) -> std::result::Result<(Integer, Integer), RuntimeErrorKind> {
        match self.stack.as_slice() {
            [.., a, b] => Ok((*a, *b)),
            _ => Err(RuntimeErrorKind::RequiresStackToNotBeEmpty),
        }
    }

    fn pop(&mut self) -> std::result::Result<Integer, RuntimeErrorKind> {
        self.stack
            .pop()
            .ok_or(RuntimeErrorKind::RequiresStackToNotBeEmpty)
    }

    /// Pops `b` then `a`. Nothing is popped unless both are present.
    fn pop_pair(
        &mut self,
    ) -> std::result::Result<(Integer, Integer), RuntimeErrorKind> {
        let pair = self.peek_pair()?;
        self.stack.truncate(self.stack.len() - 2);
        Ok(pair)
    }
}

/// Where execution continues after an instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Flow {
    Next,
    Jump(usize),
}

/// `Runtime` runs a program from instruction 0 until the instruction
/// pointer reaches the end of the program or an instruction fails.
///
/// Every instruction checks its preconditions before touching the stack or
/// the environment, so a failing instruction leaves no trace of its own.
/// Effects of the instructions executed before it are kept.
#[derive(Debug)]
pub struct Runtime<'p> {
    program: &'p Program,
    state: State,
    recorder: Option<TraceRecorder>,
    profiler: Option<Profiler>,
}

impl<'p> Runtime<'p> {
    pub fn new(program: &'p Program, env: Environment, stack: Stack) -> Self {
        Self {
            program,
            state: State {
                ip: 0,
                stack,
                env,
            },
            recorder: None,
            profiler: None,
        }
    }

    /// Record every executed instruction into `recorder`.
    pub fn with_recorder(mut self, mut recorder: TraceRecorder) -> Self {
        recorder.init();
        self.recorder = Some(recorder);
        self
    }

    /// Count instruction executions and loop entries into `profiler`.
    pub fn with_profiler(mut self, profiler: Profiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Consume the runtime, handing back its state and instrumentation.
    pub fn into_parts(self) -> (State, Option<TraceRecorder>, Option<Profiler>) {
        (self.state, self.recorder, self.profiler)
    }

    /// Run until completion, returning the final instruction pointer which
    /// is always the program length.
    pub fn run(&mut self) -> Result<usize> {
        info!(
            instructions = self.program.len(),
            depth = self.state.stack.len(),
            registers = self.state.env.len(),
            "starting run"
        );
        while let Some(inst) = self.next() {
            let ip = self.state.ip;
            match self.eval(inst) {
                Ok(Flow::Next) => self.state.ip = ip + 1,
                Ok(Flow::Jump(target)) => {
                    debug!(from = ip, to = target, "jump taken");
                    if let Some(recorder) = self.recorder.as_mut() {
                        recorder.record_branch(target);
                    }
                    self.state.ip = target;
                }
                Err(kind) => {
                    info!(ip, %kind, "run failed");
                    return Err(RuntimeError { kind, ip });
                }
            }
        }
        info!(ip = self.state.ip, "run completed");
        Ok(self.state.ip)
    }

    /// Evaluate a given instruction.
    fn eval(
        &mut self,
        inst: Instruction,
    ) -> std::result::Result<Flow, RuntimeErrorKind> {
        debug!(
            ip = self.state.ip,
            %inst,
            depth = self.state.stack.len(),
            "eval"
        );
        let state = &mut self.state;
        match inst {
            Instruction::PushConst(c) => state.stack.push(c),
            Instruction::PushReg(r) => {
                let value = state
                    .env
                    .get(&r)
                    .copied()
                    .ok_or(RuntimeErrorKind::SourceRegistryDoesntExist)?;
                state.stack.push(value);
            }
            Instruction::PopReg(r) => {
                let value = state.pop()?;
                state.env.insert(r, value);
            }
            Instruction::Dup => {
                let top = state.peek()?;
                state.stack.push(top);
            }
            Instruction::Add => {
                let (a, b) = state.pop_pair()?;
                state.stack.push(a.wrapping_add(b));
            }
            Instruction::Sub => {
                let (a, b) = state.pop_pair()?;
                state.stack.push(a.wrapping_sub(b));
            }
            Instruction::Jeq(offset) => return self.branch(offset, |a, b| a == b),
            Instruction::Jgt(offset) => return self.branch(offset, |a, b| a > b),
        }
        Ok(Flow::Next)
    }

    /// Shared body of the conditional jumps. The target is validated before
    /// the operands are popped, and only when the jump is taken.
    fn branch(
        &mut self,
        offset: Integer,
        taken: impl Fn(Integer, Integer) -> bool,
    ) -> std::result::Result<Flow, RuntimeErrorKind> {
        let (a, b) = self.state.peek_pair()?;
        let flow = if taken(a, b) {
            Flow::Jump(self.jump_target(offset)?)
        } else {
            Flow::Next
        };
        self.state.pop_pair()?;
        Ok(flow)
    }

    /// Resolve a relative jump from the current instruction. Landing exactly
    /// on the program length is valid and ends the run.
    fn jump_target(
        &self,
        offset: Integer,
    ) -> std::result::Result<usize, RuntimeErrorKind> {
        let target = self.state.ip as i64 + i64::from(offset);
        usize::try_from(target)
            .ok()
            .filter(|target| *target <= self.program.len())
            .ok_or(RuntimeErrorKind::InstructionPointerInvalid)
    }

    /// Returns the next instruction to execute, or `None` once the
    /// instruction pointer reached the end of the program.
    fn next(&mut self) -> Option<Instruction> {
        let ip = self.state.ip;
        let inst = *self.program.get(ip)?;
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(ip, inst, self.state.stack.len());
        }
        if let Some(profiler) = self.profiler.as_mut() {
            profiler.count_entry(ip);
        }
        Some(inst)
    }
}
