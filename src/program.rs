//! Representation of the programs we want to run, along with the builders
//! and the assembly reader used to author them.
use std::fmt::Write;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::bytecode::{self, DecodeError, Instruction, Integer, Register};

/// Immutable, ordered sequence of instructions indexed from 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    /// Build a program from a list of instructions.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// Number of instructions, also the instruction pointer value at which
    /// a run completes.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Returns the instruction at `ip`, if any.
    pub fn get(&self, ip: usize) -> Option<&Instruction> {
        self.instructions.get(ip)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Render the program in the textual assembly format accepted by
    /// [`Program::from_str`].
    pub fn to_assembly(&self) -> String {
        let mut s = String::new();
        for inst in &self.instructions {
            let _ = writeln!(s, "{inst}");
        }
        s
    }

    /// Load a program from raw file contents, either encoded bytecode or
    /// UTF-8 assembly text.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProgramError> {
        if bytecode::is_bytecode(bytes) {
            return Ok(bytecode::decode(bytes)?);
        }
        let source = std::str::from_utf8(bytes)?;
        Ok(source.parse()?)
    }
}

impl FromIterator<Instruction> for Program {
    fn from_iter<I: IntoIterator<Item = Instruction>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Helpers to build well-formed instructions.
pub mod build {
    use crate::bytecode::{Instruction, Integer, Register};

    pub fn push_const(c: Integer) -> Instruction {
        Instruction::PushConst(c)
    }

    pub fn push_reg(r: Register) -> Instruction {
        Instruction::PushReg(r)
    }

    pub fn pop_reg(r: Register) -> Instruction {
        Instruction::PopReg(r)
    }

    pub fn dup() -> Instruction {
        Instruction::Dup
    }

    pub fn add() -> Instruction {
        Instruction::Add
    }

    pub fn sub() -> Instruction {
        Instruction::Sub
    }

    /// Jump `offset` instructions away if the two top values are equal.
    pub fn jump_eq(offset: Integer) -> Instruction {
        Instruction::Jeq(offset)
    }

    /// Jump `offset` instructions away if the lower value is greater than
    /// the top one.
    pub fn jump_gt(offset: Integer) -> Instruction {
        Instruction::Jgt(offset)
    }
}

/// Errors reported while reading assembly text. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("line {line}: malformed instruction `{text}`")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unknown instruction `{mnemonic}`")]
    UnknownInstruction { line: usize, mnemonic: String },
    #[error("line {line}: `{mnemonic}` expects an operand")]
    MissingOperand { line: usize, mnemonic: String },
    #[error("line {line}: `{mnemonic}` takes no operand")]
    UnexpectedOperand { line: usize, mnemonic: String },
    #[error("line {line}: invalid operand `{operand}`")]
    InvalidOperand { line: usize, operand: String },
    #[error("line {line}: expected a register, got `{operand}`")]
    ExpectedRegister { line: usize, operand: String },
    #[error("line {line}: expected a constant, got `{operand}`")]
    ExpectedConstant { line: usize, operand: String },
}

/// Errors reported while loading a program from file contents.
#[derive(Debug, Error)]
pub enum ProgramError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error("bytecode: {0}")]
    Decode(#[from] DecodeError),
    #[error("source is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Parsed operand of an assembly line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Operand {
    Constant(Integer),
    Register(Register),
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<mnemonic>[A-Za-z]+)(?:\s+(?P<operand>\S+))?$")
            .expect("line pattern is valid")
    })
}

fn operand_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[Rr](?P<register>\d+)|(?P<constant>[+-]?\d+))$")
            .expect("operand pattern is valid")
    })
}

/// Strip `;` and `//` comments and surrounding whitespace.
fn strip_comment(line: &str) -> &str {
    let end = [line.find(';'), line.find("//")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(line.len());
    line[..end].trim()
}

fn parse_operand(line: usize, text: &str) -> Result<Operand, AssemblyError> {
    let invalid = || AssemblyError::InvalidOperand {
        line,
        operand: text.to_string(),
    };
    let caps = operand_regex().captures(text).ok_or_else(invalid)?;
    if let Some(register) = caps.name("register") {
        let id = register.as_str().parse().map_err(|_| invalid())?;
        return Ok(Operand::Register(id));
    }
    let constant = caps.name("constant").ok_or_else(invalid)?;
    let value = constant.as_str().parse().map_err(|_| invalid())?;
    Ok(Operand::Constant(value))
}

fn parse_line(line: usize, text: &str) -> Result<Instruction, AssemblyError> {
    let caps = line_regex().captures(text).ok_or_else(|| {
        AssemblyError::Malformed {
            line,
            text: text.to_string(),
        }
    })?;
    let mnemonic = caps["mnemonic"].to_ascii_uppercase();
    let operand = caps
        .name("operand")
        .map(|m| parse_operand(line, m.as_str()).map(|op| (op, m.as_str())))
        .transpose()?;

    let missing = || AssemblyError::MissingOperand {
        line,
        mnemonic: mnemonic.clone(),
    };
    let register = |operand: Option<(Operand, &str)>| match operand {
        Some((Operand::Register(r), _)) => Ok(r),
        Some((Operand::Constant(_), text)) => {
            Err(AssemblyError::ExpectedRegister {
                line,
                operand: text.to_string(),
            })
        }
        None => Err(missing()),
    };
    let constant = |operand: Option<(Operand, &str)>| match operand {
        Some((Operand::Constant(c), _)) => Ok(c),
        Some((Operand::Register(_), text)) => {
            Err(AssemblyError::ExpectedConstant {
                line,
                operand: text.to_string(),
            })
        }
        None => Err(missing()),
    };
    let nullary = |operand: Option<(Operand, &str)>, inst: Instruction| {
        match operand {
            Some(_) => Err(AssemblyError::UnexpectedOperand {
                line,
                mnemonic: mnemonic.clone(),
            }),
            None => Ok(inst),
        }
    };

    match mnemonic.as_str() {
        "PUSH" => match operand {
            Some((Operand::Constant(c), _)) => Ok(Instruction::PushConst(c)),
            Some((Operand::Register(r), _)) => Ok(Instruction::PushReg(r)),
            None => Err(missing()),
        },
        "POP" => register(operand).map(Instruction::PopReg),
        "DUP" => nullary(operand, Instruction::Dup),
        "ADD" => nullary(operand, Instruction::Add),
        "SUB" => nullary(operand, Instruction::Sub),
        "JEQ" => constant(operand).map(Instruction::Jeq),
        "JGT" => constant(operand).map(Instruction::Jgt),
        _ => Err(AssemblyError::UnknownInstruction {
            line,
            mnemonic: caps["mnemonic"].to_string(),
        }),
    }
}

impl FromStr for Program {
    type Err = AssemblyError;

    /// Parse assembly text, one instruction per line.
    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut instructions = Vec::new();
        for (index, raw) in source.lines().enumerate() {
            let text = strip_comment(raw);
            if text.is_empty() {
                continue;
            }
            instructions.push(parse_line(index + 1, text)?);
        }
        Ok(Self::new(instructions))
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    use std::env;
    use std::fs;
    use std::path::Path;

    fn support_file(name: &str) -> Vec<u8> {
        let env_var = env::var("CARGO_MANIFEST_DIR").unwrap();
        let path = Path::new(&env_var).join("support").join(name);
        fs::read(path).unwrap()
    }

    #[test]
    fn can_build_program() {
        let program: Program =
            vec![push_const(10), push_const(22), add(), pop_reg(3)]
                .into_iter()
                .collect();
        assert_eq!(program.len(), 4);
        assert_eq!(program.get(2), Some(&Instruction::Add));
        assert_eq!(program.get(4), None);
        assert!(Program::default().is_empty());
    }

    #[test]
    fn can_parse_assembly() {
        let source = "
            ; stack: 10 |
            PUSH 10
            push R2      // registers are case-insensitive too
            pop r3
            Dup
            ADD
            SUB
            JEQ -5
            JGT +2
        ";
        let program: Program = source.parse().unwrap();
        assert_eq!(
            program.instructions(),
            &[
                push_const(10),
                push_reg(2),
                pop_reg(3),
                dup(),
                add(),
                sub(),
                jump_eq(-5),
                jump_gt(2),
            ]
        );
    }

    #[test]
    fn assembly_round_trips_through_text() {
        let program = Program::new(vec![
            push_const(-1),
            push_reg(0),
            pop_reg(7),
            jump_gt(-8),
        ]);
        let text = program.to_assembly();
        assert_eq!(text, "PUSH -1\nPUSH R0\nPOP R7\nJGT -8\n");
        assert_eq!(text.parse::<Program>().unwrap(), program);
    }

    #[test]
    fn assembly_errors_carry_line_numbers() {
        let err = "PUSH 1\n\nMUL".parse::<Program>().unwrap_err();
        assert_eq!(
            err,
            AssemblyError::UnknownInstruction {
                line: 3,
                mnemonic: "MUL".to_string()
            }
        );
        assert_eq!(err.to_string(), "line 3: unknown instruction `MUL`");
    }

    #[test]
    fn assembly_checks_operands() {
        assert!(matches!(
            "POP".parse::<Program>(),
            Err(AssemblyError::MissingOperand { line: 1, .. })
        ));
        assert!(matches!(
            "POP 3".parse::<Program>(),
            Err(AssemblyError::ExpectedRegister { line: 1, .. })
        ));
        assert!(matches!(
            "JEQ R1".parse::<Program>(),
            Err(AssemblyError::ExpectedConstant { line: 1, .. })
        ));
        assert!(matches!(
            "ADD 4".parse::<Program>(),
            Err(AssemblyError::UnexpectedOperand { line: 1, .. })
        ));
        assert!(matches!(
            "PUSH 99999999999".parse::<Program>(),
            Err(AssemblyError::InvalidOperand { line: 1, .. })
        ));
        assert!(matches!(
            "PUSH R-1".parse::<Program>(),
            Err(AssemblyError::InvalidOperand { line: 1, .. })
        ));
        assert!(matches!(
            "PUSH 1 2".parse::<Program>(),
            Err(AssemblyError::Malformed { line: 1, .. })
        ));
    }

    #[test]
    fn can_load_support_programs() {
        let sum = Program::from_bytes(&support_file("sum.asm")).unwrap();
        assert_eq!(sum.len(), 6);
        let countdown =
            Program::from_bytes(&support_file("countdown.asm")).unwrap();
        assert_eq!(countdown.len(), 15);
        assert_eq!(countdown.get(13), Some(&jump_gt(-8)));
    }

    #[test]
    fn from_bytes_accepts_bytecode() {
        let program = Program::new(vec![push_const(4), dup(), add()]);
        let bytes = bytecode::encode(&program).unwrap();
        assert_eq!(Program::from_bytes(&bytes).unwrap(), program);
        assert!(matches!(
            Program::from_bytes(&[0xff, 0xfe]),
            Err(ProgramError::Utf8(_))
        ));
    }
}
