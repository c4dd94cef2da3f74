//! Instruction set of the stack machine and its binary bytecode encoding.
use std::fmt;
use std::io::{self, Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

use crate::program::Program;

/// Signed integer value manipulated by the machine.
pub type Integer = i32;

/// Register identifier, registers are addressed by non-negative ids.
pub type Register = u32;

/// Magic bytes at the start of every encoded program.
pub const MAGIC: [u8; 4] = *b"STKV";

/// Opcodes as they appear in encoded bytecode, one byte each.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OPCode {
    PushConst = 0,
    PushReg = 1,
    PopReg = 2,
    Dup = 3,
    Add = 4,
    Sub = 5,
    Jeq = 6,
    Jgt = 7,
}

impl TryFrom<u8> for OPCode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::PushConst),
            1 => Ok(Self::PushReg),
            2 => Ok(Self::PopReg),
            3 => Ok(Self::Dup),
            4 => Ok(Self::Add),
            5 => Ok(Self::Sub),
            6 => Ok(Self::Jeq),
            7 => Ok(Self::Jgt),
            _ => Err(DecodeError::InvalidOpcode(byte)),
        }
    }
}

/// A single machine instruction. Jump operands are offsets relative to the
/// jump's own index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Instruction {
    PushConst(Integer),
    PushReg(Register),
    PopReg(Register),
    Dup,
    Add,
    Sub,
    Jeq(Integer),
    Jgt(Integer),
}

impl Instruction {
    /// Returns the opcode used to encode this instruction.
    pub fn opcode(&self) -> OPCode {
        match self {
            Self::PushConst(_) => OPCode::PushConst,
            Self::PushReg(_) => OPCode::PushReg,
            Self::PopReg(_) => OPCode::PopReg,
            Self::Dup => OPCode::Dup,
            Self::Add => OPCode::Add,
            Self::Sub => OPCode::Sub,
            Self::Jeq(_) => OPCode::Jeq,
            Self::Jgt(_) => OPCode::Jgt,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::PushConst(c) => write!(f, "PUSH {c}"),
            Self::PushReg(r) => write!(f, "PUSH R{r}"),
            Self::PopReg(r) => write!(f, "POP R{r}"),
            Self::Dup => write!(f, "DUP"),
            Self::Add => write!(f, "ADD"),
            Self::Sub => write!(f, "SUB"),
            Self::Jeq(c) => write!(f, "JEQ {c}"),
            Self::Jgt(c) => write!(f, "JGT {c}"),
        }
    }
}

/// Failures while decoding a bytecode buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing or invalid magic header")]
    BadMagic,
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("unexpected end of bytecode")]
    UnexpectedEnd,
    #[error("{0} trailing bytes after last instruction")]
    TrailingBytes(usize),
}

/// Returns true if `bytes` starts with the bytecode magic header.
pub fn is_bytecode(bytes: &[u8]) -> bool {
    bytes.starts_with(&MAGIC)
}

/// Failures while encoding a program.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{0} instructions do not fit the u32 instruction count")]
    TooManyInstructions(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Returns the instruction count as stored in the bytecode header.
fn instruction_count(len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooManyInstructions(len))
}

/// Write a program in its big-endian bytecode representation to `out`.
pub fn write_program<W: Write>(
    out: &mut W,
    program: &Program,
) -> Result<(), EncodeError> {
    let count = instruction_count(program.len())?;
    out.write_all(&MAGIC)?;
    out.write_u32::<BigEndian>(count)?;
    for inst in program.iter() {
        out.write_u8(inst.opcode() as u8)?;
        match *inst {
            Instruction::PushConst(c)
            | Instruction::Jeq(c)
            | Instruction::Jgt(c) => out.write_i32::<BigEndian>(c)?,
            Instruction::PushReg(r) | Instruction::PopReg(r) => {
                out.write_u32::<BigEndian>(r)?
            }
            Instruction::Dup | Instruction::Add | Instruction::Sub => {}
        }
    }
    Ok(())
}

/// Encode a program into a new buffer, see [`write_program`].
pub fn encode(program: &Program) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(8 + program.len() * 5);
    write_program(&mut out, program)?;
    Ok(out)
}

/// Decode a bytecode buffer produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<Program, DecodeError> {
    if !is_bytecode(bytes) {
        return Err(DecodeError::BadMagic);
    }
    let mut cursor = Cursor::new(&bytes[MAGIC.len()..]);
    let count = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| DecodeError::UnexpectedEnd)?;

    let mut instructions = Vec::new();
    for _ in 0..count {
        instructions.push(decode_instruction(&mut cursor)?);
    }

    let consumed = cursor.position() as usize;
    let remaining = cursor.get_ref().len() - consumed;
    if remaining > 0 {
        return Err(DecodeError::TrailingBytes(remaining));
    }
    Ok(Program::new(instructions))
}

fn decode_instruction(
    cursor: &mut Cursor<&[u8]>,
) -> Result<Instruction, DecodeError> {
    let byte = cursor.read_u8().map_err(|_| DecodeError::UnexpectedEnd)?;
    let inst = match OPCode::try_from(byte)? {
        OPCode::PushConst => Instruction::PushConst(read_integer(cursor)?),
        OPCode::PushReg => Instruction::PushReg(read_register(cursor)?),
        OPCode::PopReg => Instruction::PopReg(read_register(cursor)?),
        OPCode::Dup => Instruction::Dup,
        OPCode::Add => Instruction::Add,
        OPCode::Sub => Instruction::Sub,
        OPCode::Jeq => Instruction::Jeq(read_integer(cursor)?),
        OPCode::Jgt => Instruction::Jgt(read_integer(cursor)?),
    };
    Ok(inst)
}

fn read_integer(cursor: &mut Cursor<&[u8]>) -> Result<Integer, DecodeError> {
    cursor
        .read_i32::<BigEndian>()
        .map_err(|_| DecodeError::UnexpectedEnd)
}

fn read_register(cursor: &mut Cursor<&[u8]>) -> Result<Register, DecodeError> {
    cursor
        .read_u32::<BigEndian>()
        .map_err(|_| DecodeError::UnexpectedEnd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::build::*;

    #[test]
    fn opcode_bytes_follow_variant_order() {
        for byte in 0u8..8 {
            let opcode = OPCode::try_from(byte).unwrap();
            assert_eq!(opcode as u8, byte);
        }
        assert_eq!(OPCode::try_from(8u8), Err(DecodeError::InvalidOpcode(8)));
    }

    #[test]
    fn can_encode_and_decode_program() {
        let program = Program::new(vec![
            push_const(-7),
            push_reg(3),
            pop_reg(u32::MAX),
            dup(),
            add(),
            sub(),
            jump_eq(-5),
            jump_gt(2),
        ]);
        let bytes = encode(&program).unwrap();
        assert_eq!(&bytes[..4], b"STKV");
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), 8);
        // One opcode byte per instruction, plus four bytes per operand.
        assert_eq!(bytes.len(), 8 + 8 + 5 * 4);
        assert_eq!(decode(&bytes).unwrap(), program);
    }

    #[test]
    fn constants_are_big_endian() {
        let bytes =
            encode(&Program::new(vec![push_const(0x0102_0304)])).unwrap();
        assert_eq!(&bytes[8..], &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert_eq!(decode(b"JUNK\0\0\0\0"), Err(DecodeError::BadMagic));
        assert_eq!(decode(b"STK"), Err(DecodeError::BadMagic));
        assert_eq!(decode(b"STKV\0\0"), Err(DecodeError::UnexpectedEnd));
        assert_eq!(
            decode(b"STKV\0\0\0\x01\x09"),
            Err(DecodeError::InvalidOpcode(9))
        );
        // Declares a push but the operand is cut short.
        assert_eq!(
            decode(b"STKV\0\0\0\x01\x00\x00\x01"),
            Err(DecodeError::UnexpectedEnd)
        );
        assert_eq!(
            decode(b"STKV\0\0\0\x01\x03\x03"),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn empty_program_encodes_to_header_only() {
        let bytes = encode(&Program::default()).unwrap();
        assert_eq!(bytes, b"STKV\0\0\0\0");
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn instructions_display_as_assembly() {
        assert_eq!(push_const(-3).to_string(), "PUSH -3");
        assert_eq!(push_reg(1).to_string(), "PUSH R1");
        assert_eq!(pop_reg(12).to_string(), "POP R12");
        assert_eq!(jump_gt(-8).to_string(), "JGT -8");
    }

    #[test]
    fn instruction_count_must_fit_header() {
        assert_eq!(instruction_count(0).unwrap(), 0);
        assert_eq!(
            instruction_count(u32::MAX as usize).unwrap(),
            u32::MAX
        );
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            instruction_count(u32::MAX as usize + 1),
            Err(EncodeError::TooManyInstructions(n)) if n == u32::MAX as usize + 1
        ));
    }

    #[test]
    fn write_program_reports_writer_errors() {
        let program = Program::new(vec![push_const(1), dup()]);
        // Room for the header only.
        let mut buf = [0u8; 8];
        let mut out = &mut buf[..];
        assert!(matches!(
            write_program(&mut out, &program),
            Err(EncodeError::Io(_))
        ));
        assert_eq!(&buf[..4], b"STKV");
    }
}
