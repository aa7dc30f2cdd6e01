//! Backend of the Flow routing language: IR model and builder, CFG optimization
//! passes, stack-machine code generation, and the bytecode VM that runs
//! compiled handlers against host-provided native callbacks.

pub mod compiler;
pub mod config;
pub mod ir;
pub mod pass;
pub mod signature;
pub mod typ;
pub mod util;
pub mod val;
pub mod vm;

pub use compiler::{TargetCodeGenerator, compile};
pub use config::{CompilerConfig, FlowConfig, VmConfig};
pub use ir::{IRBuilder, IRHandler, IRProgram};
pub use pass::{HandlerPass, PassManager};
pub use signature::Signature;
pub use typ::{FlowNumber, FlowType, MatchClass};
pub use val::{Cidr, FlowRegex, Literal};
pub use vm::{NativeCallback, Params, Program, Registry, ResumeToken, Runner, RunnerState, Runtime};
