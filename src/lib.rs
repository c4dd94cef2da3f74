//! `stackvm` is a small stack-based virtual machine over signed integers.
//!
//! Programs are linear sequences of eight instructions that operate on an
//! evaluation stack and a sparse register environment. Programs can be
//! built in code, read from assembly text or decoded from bytecode.
pub mod bytecode;
pub mod interpreter;
pub mod profiler;
pub mod program;
pub mod report;
pub mod runtime;
pub mod trace;


pub use bytecode::{Instruction, Integer, Register};
pub use interpreter::{
    interpret, Execution, ExecutionConfig, Interpreter, RunResult, Status,
};
pub use program::Program;
pub use runtime::{Environment, RuntimeError, RuntimeErrorKind, Stack};
