//! Human readable rendering of run outcomes.
use std::fmt::Write;

use colored::Colorize;

use crate::interpreter::RunResult;
use crate::runtime::{Environment, RuntimeErrorKind};

/// Renders the registers as a JSON-like object, one register per line.
pub fn render_environment(env: &Environment) -> String {
    if env.is_empty() {
        return "{}\n".to_string();
    }
    let mut s = String::from("{\n");
    let mut remaining = env.len();
    for (register, value) in env {
        remaining -= 1;
        let separator = if remaining > 0 { "," } else { "" };
        let _ = writeln!(s, "  \"R{register}\" : {value}{separator}");
    }
    s.push_str("}\n");
    s
}

fn describe(kind: RuntimeErrorKind) -> &'static str {
    match kind {
        RuntimeErrorKind::SourceRegistryDoesntExist => {
            "Source registry doesn't exist!"
        }
        RuntimeErrorKind::RequiresStackToNotBeEmpty => {
            "Requires stack to be non-empty!"
        }
        RuntimeErrorKind::InstructionPointerInvalid => {
            "Instruction pointer became invalid!"
        }
    }
}

/// Renders a failed run, naming the failing instruction by its 1-based
/// position. Returns `None` for a successful run.
pub fn render_error(result: &RunResult) -> Option<String> {
    let kind = result.error_kind()?;
    let header = format!("Error in instruction #{}", result.ip + 1);
    let detail = format!("Error: {}", describe(kind));
    Some(format!("{}\n  {}\n", header.red(), detail.red()))
}
