use std::fmt;

use crate::typ::{FlowType, MatchClass};

use super::{BlockId, BuiltinFunctionId, BuiltinHandlerId, ConstantId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    INeg,
    INot,
    BNot,
    SLen,
    SIsEmpty,
}

impl UnaryOp {
    pub const fn operand_type(self) -> FlowType {
        match self {
            UnaryOp::INeg | UnaryOp::INot => FlowType::Number,
            UnaryOp::BNot => FlowType::Boolean,
            UnaryOp::SLen | UnaryOp::SIsEmpty => FlowType::String,
        }
    }

    pub const fn result_type(self) -> FlowType {
        match self {
            UnaryOp::INeg | UnaryOp::INot | UnaryOp::SLen => FlowType::Number,
            UnaryOp::BNot | UnaryOp::SIsEmpty => FlowType::Boolean,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::INeg => "ineg",
            UnaryOp::INot => "inot",
            UnaryOp::BNot => "bnot",
            UnaryOp::SLen => "slen",
            UnaryOp::SIsEmpty => "sisempty",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    IAdd,
    ISub,
    IMul,
    IDiv,
    IRem,
    IPow,
    IAnd,
    IOr,
    IXor,
    IShl,
    IShr,
    ICmpEQ,
    ICmpNE,
    ICmpLE,
    ICmpGE,
    ICmpLT,
    ICmpGT,
    BAnd,
    BOr,
    BXor,
    SAdd,
    SCmpEQ,
    SCmpNE,
    SCmpLE,
    SCmpGE,
    SCmpLT,
    SCmpGT,
    /// String matches a regular expression constant.
    SCmpRE,
    SCmpBeg,
    SCmpEnd,
    /// lhs contains rhs as a substring.
    SIn,
    PCmpEQ,
    PCmpNE,
    PInCidr,
}

impl BinaryOp {
    pub const fn lhs_type(self) -> FlowType {
        use BinaryOp::*;
        match self {
            IAdd | ISub | IMul | IDiv | IRem | IPow | IAnd | IOr | IXor | IShl | IShr | ICmpEQ | ICmpNE
            | ICmpLE | ICmpGE | ICmpLT | ICmpGT => FlowType::Number,
            BAnd | BOr | BXor => FlowType::Boolean,
            SAdd | SCmpEQ | SCmpNE | SCmpLE | SCmpGE | SCmpLT | SCmpGT | SCmpRE | SCmpBeg | SCmpEnd | SIn => {
                FlowType::String
            }
            PCmpEQ | PCmpNE | PInCidr => FlowType::IPAddress,
        }
    }

    pub const fn rhs_type(self) -> FlowType {
        match self {
            BinaryOp::SCmpRE => FlowType::RegExp,
            BinaryOp::PInCidr => FlowType::Cidr,
            other => other.lhs_type(),
        }
    }

    pub const fn result_type(self) -> FlowType {
        use BinaryOp::*;
        match self {
            IAdd | ISub | IMul | IDiv | IRem | IPow | IAnd | IOr | IXor | IShl | IShr => FlowType::Number,
            SAdd => FlowType::String,
            _ => FlowType::Boolean,
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        use BinaryOp::*;
        match self {
            IAdd => "iadd",
            ISub => "isub",
            IMul => "imul",
            IDiv => "idiv",
            IRem => "irem",
            IPow => "ipow",
            IAnd => "iand",
            IOr => "ior",
            IXor => "ixor",
            IShl => "ishl",
            IShr => "ishr",
            ICmpEQ => "icmpeq",
            ICmpNE => "icmpne",
            ICmpLE => "icmple",
            ICmpGE => "icmpge",
            ICmpLT => "icmplt",
            ICmpGT => "icmpgt",
            BAnd => "band",
            BOr => "bor",
            BXor => "bxor",
            SAdd => "sadd",
            SCmpEQ => "scmpeq",
            SCmpNE => "scmpne",
            SCmpLE => "scmple",
            SCmpGE => "scmpge",
            SCmpLT => "scmplt",
            SCmpGT => "scmpgt",
            SCmpRE => "scmpre",
            SCmpBeg => "scmpbeg",
            SCmpEnd => "scmpend",
            SIn => "sin",
            PCmpEQ => "pcmpeq",
            PCmpNE => "pcmpne",
            PInCidr => "pincidr",
        }
    }
}

/// Instruction payload. Data operands live in [`Instr::operands`]; block
/// targets and callees are carried here so the CFG edges stay typed.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    Nop,
    /// Local variable slot of type [`Instr::ty`].
    Alloca,
    /// operands: `[variable]`
    Load,
    /// operands: `[variable, value]`
    Store,
    /// operands: incoming values
    Phi,
    /// operands: `[value]`, converted to [`Instr::ty`]
    Cast,
    Unary(UnaryOp),
    Binary(BinaryOp),
    /// operands: `[string, offset, count]`
    SubStr,
    /// operands: `[group]`, reads the captures of the last regex match
    RegExpGroup,
    Call(BuiltinFunctionId),
    HandlerCall(BuiltinHandlerId),
    Br {
        target: BlockId,
    },
    /// operands: `[condition]`
    CondBr {
        then_block: BlockId,
        else_block: BlockId,
    },
    /// operands: `[condition]`; cases are tested in insertion order
    Match {
        class: MatchClass,
        cases: Vec<(ConstantId, BlockId)>,
        else_block: Option<BlockId>,
    },
    /// operands: `[result]`
    Ret,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub name: String,
    pub ty: FlowType,
    pub kind: InstrKind,
    pub operands: Vec<Value>,
    pub(crate) parent: BlockId,
}

impl Instr {
    pub fn new(kind: InstrKind, ty: FlowType, operands: Vec<Value>) -> Self {
        Self {
            name: String::new(),
            ty,
            kind,
            operands,
            parent: BlockId::new(0),
        }
    }

    pub fn parent(&self) -> BlockId {
        self.parent
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstrKind::Br { .. } | InstrKind::CondBr { .. } | InstrKind::Match { .. } | InstrKind::Ret
        )
    }

    /// Branch targets in edge order; a `Match` lists its cases first, then the
    /// else block.
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.kind {
            InstrKind::Br { target } => vec![*target],
            InstrKind::CondBr { then_block, else_block } => vec![*then_block, *else_block],
            InstrKind::Match { cases, else_block, .. } => {
                cases.iter().map(|(_, b)| *b).chain(else_block.iter().copied()).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Retargets every edge to `old` onto `new`; returns how many were changed.
    pub(crate) fn replace_successor(&mut self, old: BlockId, new: BlockId) -> usize {
        let mut n = 0;
        let mut swap = |b: &mut BlockId| {
            if *b == old {
                *b = new;
                n += 1;
            }
        };
        match &mut self.kind {
            InstrKind::Br { target } => swap(target),
            InstrKind::CondBr { then_block, else_block } => {
                swap(then_block);
                swap(else_block);
            }
            InstrKind::Match { cases, else_block, .. } => {
                cases.iter_mut().for_each(|(_, b)| swap(b));
                if let Some(b) = else_block {
                    swap(b);
                }
            }
            _ => {}
        }
        n
    }

    /// Whether removing an unused instance could change observable behaviour.
    /// `pure_call` tells whether the callee of a `Call` is side-effect free.
    /// A regex comparison updates the capture context read by `RegExpGroup`.
    pub fn has_side_effects(&self, pure_call: impl Fn(BuiltinFunctionId) -> bool) -> bool {
        match &self.kind {
            InstrKind::Store | InstrKind::HandlerCall(_) | InstrKind::Binary(BinaryOp::SCmpRE) => true,
            InstrKind::Call(callee) => !pure_call(*callee),
            _ => self.is_terminator(),
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match &self.kind {
            InstrKind::Nop => "nop",
            InstrKind::Alloca => "alloca",
            InstrKind::Load => "load",
            InstrKind::Store => "store",
            InstrKind::Phi => "phi",
            InstrKind::Cast => "cast",
            InstrKind::Unary(op) => op.mnemonic(),
            InstrKind::Binary(op) => op.mnemonic(),
            InstrKind::SubStr => "substr",
            InstrKind::RegExpGroup => "regexpgroup",
            InstrKind::Call(_) => "call",
            InstrKind::HandlerCall(_) => "handler",
            InstrKind::Br { .. } => "br",
            InstrKind::CondBr { .. } => "condbr",
            InstrKind::Match { .. } => "match",
            InstrKind::Ret => "ret",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(id) => write!(f, "{id}"),
            Value::Instr(id) => write!(f, "{id}"),
        }
    }
}
