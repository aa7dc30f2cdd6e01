//! Bytecode virtual machine
//!
//! Compiled handlers run as linear `u64` instruction streams on a per-runner
//! operand stack. Programs are linked against a [`Runtime`] that supplies the
//! native functions and handlers they reference by signature.

mod constant_pool;
mod instruction;
mod matcher;
mod native;
mod program;
mod runner;
mod runtime;
mod value;

pub use constant_pool::{ConstantPool, HandlerDef, MatchCaseDef, MatchDef};
pub use instruction::{
    Instruction, Opcode, Operand, disassemble, disassemble_code, make_instruction, opcode, operand_a, operand_b,
    operand_c, with_operand_a,
};
pub use native::{CallbackKind, FromParam, IntoResult, NativeCallback, NativeFn, ParamType, Params, ResumeToken, Userdata};
pub use program::Program;
pub use runner::{Runner, RunnerState};
pub use runtime::{CallbackBuilder, Module, Registry, Runtime};
pub use value::Value;

#[cfg(test)]
mod vm_test;
