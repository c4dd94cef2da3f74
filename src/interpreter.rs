//! Interpreter facade over the runtime.
//!
//! [`interpret`] runs a program against a caller supplied environment and
//! stack and reports how the run ended. The environment is handed back in
//! place whatever the outcome, so the caller can inspect registers written
//! before a failure.
use std::mem;

use crate::profiler::Profiler;
use crate::program::Program;
use crate::runtime::{
    Environment, Runtime, RuntimeError, RuntimeErrorKind, Stack,
};
use crate::trace::{Recording, TraceRecorder};

/// Final status of a run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    SourceRegistryDoesntExist,
    RequiresStackToNotBeEmpty,
    InstructionPointerInvalid,
}

impl From<RuntimeErrorKind> for Status {
    fn from(kind: RuntimeErrorKind) -> Self {
        match kind {
            RuntimeErrorKind::SourceRegistryDoesntExist => {
                Self::SourceRegistryDoesntExist
            }
            RuntimeErrorKind::RequiresStackToNotBeEmpty => {
                Self::RequiresStackToNotBeEmpty
            }
            RuntimeErrorKind::InstructionPointerInvalid => {
                Self::InstructionPointerInvalid
            }
        }
    }
}

/// Outcome of a run: the status and the instruction pointer, which is the
/// failing instruction's index on failure and the program length on success.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub status: Status,
    pub ip: usize,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Returns the failure kind, `None` on success.
    pub fn error_kind(&self) -> Option<RuntimeErrorKind> {
        match self.status {
            Status::Success => None,
            Status::SourceRegistryDoesntExist => {
                Some(RuntimeErrorKind::SourceRegistryDoesntExist)
            }
            Status::RequiresStackToNotBeEmpty => {
                Some(RuntimeErrorKind::RequiresStackToNotBeEmpty)
            }
            Status::InstructionPointerInvalid => {
                Some(RuntimeErrorKind::InstructionPointerInvalid)
            }
        }
    }

    pub fn into_result(self) -> Result<usize, RuntimeError> {
        match self.error_kind() {
            None => Ok(self.ip),
            Some(kind) => Err(RuntimeError { kind, ip: self.ip }),
        }
    }
}

impl From<Result<usize, RuntimeError>> for RunResult {
    fn from(result: Result<usize, RuntimeError>) -> Self {
        match result {
            Ok(ip) => Self {
                status: Status::Success,
                ip,
            },
            Err(err) => Self {
                status: err.kind.into(),
                ip: err.ip,
            },
        }
    }
}

/// Configuration of the optional run instrumentation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Record every executed instruction.
    pub trace: bool,
    /// Count instruction executions and loop entries.
    pub profile: bool,
}

/// Result of an instrumented run.
#[derive(Debug)]
pub struct Execution {
    pub result: RunResult,
    pub trace: Option<Recording>,
    pub profile: Option<Profiler>,
}

/// `Interpreter` for the stack based virtual machine.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    config: ExecutionConfig,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExecutionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ExecutionConfig {
        self.config
    }

    /// Run `program` to completion or to its first failing instruction.
    ///
    /// Values already on `stack` take part in the run. Both `env` and
    /// `stack` hold the run's final contents on return.
    pub fn execute(
        &self,
        program: &Program,
        env: &mut Environment,
        stack: &mut Stack,
    ) -> Execution {
        let mut runtime = Runtime::new(program, mem::take(env), mem::take(stack));
        if self.config.trace {
            runtime = runtime.with_recorder(TraceRecorder::new());
        }
        if self.config.profile {
            runtime = runtime.with_profiler(Profiler::new());
        }

        let result = RunResult::from(runtime.run());
        let (state, recorder, profile) = runtime.into_parts();
        *env = state.env;
        *stack = state.stack;

        Execution {
            result,
            trace: recorder.map(|mut recorder| recorder.get_recording()),
            profile,
        }
    }
}

/// Run `program` without instrumentation.
pub fn interpret(
    program: &Program,
    env: &mut Environment,
    stack: &mut Stack,
) -> RunResult {
    Interpreter::new().execute(program, env, stack).result
}
