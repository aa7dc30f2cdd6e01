//! Intermediate representation: handlers are control-flow graphs of basic
//! blocks owned by an arena, with edges expressed as block ids.

mod block;
mod builder;
mod handler;
mod instr;
mod program;

use std::fmt;

pub use block::BasicBlock;
pub use builder::IRBuilder;
pub use handler::IRHandler;
pub use instr::{BinaryOp, Instr, InstrKind, UnaryOp};
pub use program::{IRBuiltinFunction, IRBuiltinHandler, IRProgram, PassContext};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Index of a block inside its handler's arena. Stable for the block's lifetime.
    BlockId,
    "bb"
);
arena_id!(
    /// Index of an instruction inside its handler's arena.
    InstrId,
    "%"
);
arena_id!(ConstantId, "const#");
arena_id!(HandlerId, "handler#");
arena_id!(BuiltinFunctionId, "fn#");
arena_id!(BuiltinHandlerId, "native#");

/// An operand: either a pooled constant or the result of an instruction in the
/// same handler. Branch targets and callees are carried by the terminator and
/// call variants of [`InstrKind`] as typed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Constant(ConstantId),
    Instr(InstrId),
}

impl Value {
    pub fn as_instr(self) -> Option<InstrId> {
        match self {
            Value::Instr(id) => Some(id),
            Value::Constant(_) => None,
        }
    }

    pub fn as_constant(self) -> Option<ConstantId> {
        match self {
            Value::Constant(id) => Some(id),
            Value::Instr(_) => None,
        }
    }
}
