//! Bytecode instruction set.
//!
//! An instruction is one `u64`: the opcode in bits 0..8 and up to three `u16`
//! operands A, B and C at bits 16, 32 and 48.

use std::fmt::Write as _;

use crate::typ::FlowType;

pub type Instruction = u64;
pub type Operand = u16;

macro_rules! opcodes {
    ($($op:ident = $mnemonic:literal, $operands:literal, $result:ident;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($op,)*
        }

        const OPCODES: &[Opcode] = &[$(Opcode::$op,)*];

        impl Opcode {
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$op => $mnemonic,)*
                }
            }

            /// Number of operand fields the instruction uses.
            pub const fn operand_count(self) -> usize {
                match self {
                    $(Opcode::$op => $operands,)*
                }
            }

            /// Type of the value the instruction pushes, `Void` if none.
            pub const fn result_type(self) -> FlowType {
                match self {
                    $(Opcode::$op => FlowType::$result,)*
                }
            }
        }
    };
}

opcodes! {
    NOP = "NOP", 0, Void;
    ALLOCA = "ALLOCA", 1, Void;
    DISCARD = "DISCARD", 1, Void;
    EXIT = "EXIT", 1, Void;
    RET = "RET", 0, Void;
    JMP = "JMP", 1, Void;
    JN = "JN", 1, Void;
    JZ = "JZ", 1, Void;
    LOAD = "LOAD", 1, Void;
    STORE = "STORE", 1, Void;
    ILOAD = "ILOAD", 1, Number;
    NLOAD = "NLOAD", 1, Number;
    NNEG = "NNEG", 0, Number;
    NNOT = "NNOT", 0, Number;
    NADD = "NADD", 0, Number;
    NSUB = "NSUB", 0, Number;
    NMUL = "NMUL", 0, Number;
    NDIV = "NDIV", 0, Number;
    NREM = "NREM", 0, Number;
    NSHL = "NSHL", 0, Number;
    NSHR = "NSHR", 0, Number;
    NPOW = "NPOW", 0, Number;
    NAND = "NAND", 0, Number;
    NOR = "NOR", 0, Number;
    NXOR = "NXOR", 0, Number;
    NCMPZ = "NCMPZ", 0, Boolean;
    NCMPEQ = "NCMPEQ", 0, Boolean;
    NCMPNE = "NCMPNE", 0, Boolean;
    NCMPLE = "NCMPLE", 0, Boolean;
    NCMPGE = "NCMPGE", 0, Boolean;
    NCMPLT = "NCMPLT", 0, Boolean;
    NCMPGT = "NCMPGT", 0, Boolean;
    BNOT = "BNOT", 0, Boolean;
    BAND = "BAND", 0, Boolean;
    BOR = "BOR", 0, Boolean;
    BXOR = "BXOR", 0, Boolean;
    SLOAD = "SLOAD", 1, String;
    SADD = "SADD", 0, String;
    SSUBSTR = "SSUBSTR", 0, String;
    SCMPEQ = "SCMPEQ", 0, Boolean;
    SCMPNE = "SCMPNE", 0, Boolean;
    SCMPLE = "SCMPLE", 0, Boolean;
    SCMPGE = "SCMPGE", 0, Boolean;
    SCMPLT = "SCMPLT", 0, Boolean;
    SCMPGT = "SCMPGT", 0, Boolean;
    SCMPBEG = "SCMPBEG", 0, Boolean;
    SCMPEND = "SCMPEND", 0, Boolean;
    SCONTAINS = "SCONTAINS", 0, Boolean;
    SLEN = "SLEN", 0, Number;
    SISEMPTY = "SISEMPTY", 0, Boolean;
    SMATCHEQ = "SMATCHEQ", 1, Void;
    SMATCHBEG = "SMATCHBEG", 1, Void;
    SMATCHEND = "SMATCHEND", 1, Void;
    SMATCHR = "SMATCHR", 1, Void;
    PLOAD = "PLOAD", 1, IPAddress;
    PCMPEQ = "PCMPEQ", 0, Boolean;
    PCMPNE = "PCMPNE", 0, Boolean;
    PINCIDR = "PINCIDR", 0, Boolean;
    CLOAD = "CLOAD", 1, Cidr;
    RLOAD = "RLOAD", 1, RegExp;
    SREGMATCH = "SREGMATCH", 1, Boolean;
    SREGGROUP = "SREGGROUP", 0, String;
    N2S = "N2S", 0, String;
    P2S = "P2S", 0, String;
    C2S = "C2S", 0, String;
    R2S = "R2S", 0, String;
    S2N = "S2N", 0, Number;
    CALL = "CALL", 3, Void;
    HANDLER = "HANDLER", 2, Void;
}

impl Opcode {
    pub fn from_u8(raw: u8) -> Option<Opcode> {
        OPCODES.get(raw as usize).copied()
    }

    /// Values popped and pushed when executing `instr` with this opcode.
    pub fn stack_effect(self, instr: Instruction) -> (usize, usize) {
        use Opcode::*;
        let a = operand_a(instr) as usize;
        let b = operand_b(instr) as usize;
        let c = operand_c(instr) as usize;
        match self {
            NOP | EXIT | JMP => (0, 0),
            ALLOCA => (0, a),
            DISCARD => (a, 0),
            RET | JN | JZ | STORE => (1, 0),
            LOAD | ILOAD | NLOAD | SLOAD | PLOAD | CLOAD | RLOAD => (0, 1),
            NNEG | NNOT | NCMPZ | BNOT | SLEN | SISEMPTY | SREGMATCH | SREGGROUP | N2S | P2S | C2S | R2S | S2N => {
                (1, 1)
            }
            SMATCHEQ | SMATCHBEG | SMATCHEND | SMATCHR => (1, 0),
            SSUBSTR => (3, 1),
            CALL => (b, usize::from(c != 0)),
            HANDLER => (b, 0),
            _ => (2, 1),
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::JMP | Opcode::JN | Opcode::JZ)
    }
}

#[inline]
pub const fn make_instruction(op: Opcode, a: Operand, b: Operand, c: Operand) -> Instruction {
    (op as u64) | ((a as u64) << 16) | ((b as u64) << 32) | ((c as u64) << 48)
}

#[inline]
pub fn opcode(instr: Instruction) -> Opcode {
    Opcode::from_u8((instr & 0xff) as u8).unwrap_or_else(|| panic!("invalid opcode in instruction {instr:#018x}"))
}

#[inline]
pub const fn operand_a(instr: Instruction) -> Operand {
    (instr >> 16) as Operand
}

#[inline]
pub const fn operand_b(instr: Instruction) -> Operand {
    (instr >> 32) as Operand
}

#[inline]
pub const fn operand_c(instr: Instruction) -> Operand {
    (instr >> 48) as Operand
}

/// Replaces operand A, keeping opcode and the other operands.
#[inline]
pub const fn with_operand_a(instr: Instruction, a: Operand) -> Instruction {
    (instr & !(0xffff << 16)) | ((a as u64) << 16)
}

/// One listing line: mnemonic, operands, instruction offset and raw bytes.
pub fn disassemble(instr: Instruction, ip: usize) -> String {
    let op = opcode(instr);
    let mut line = format!("  {:<10}", op.mnemonic());
    let operands = [operand_a(instr), operand_b(instr), operand_c(instr)];
    for (i, operand) in operands.iter().take(op.operand_count()).enumerate() {
        let _ = write!(line, "{}{operand}", if i == 0 { "" } else { ", " });
    }
    while line.len() < 30 {
        line.push(' ');
    }
    let _ = write!(line, ";{ip:>4} |");
    for byte in instr.to_le_bytes() {
        let _ = write!(line, " {byte:02x}");
    }
    line
}

/// Multi-line listing of a whole code block.
pub fn disassemble_code(code: &[Instruction]) -> String {
    code.iter()
        .enumerate()
        .map(|(ip, instr)| disassemble(*instr, ip) + "\n")
        .collect()
}
