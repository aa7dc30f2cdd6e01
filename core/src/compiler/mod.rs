//! Code generation: lowers an optimized [`IRProgram`](crate::ir::IRProgram)
//! into a VM [`Program`](crate::vm::Program).

mod codegen;
mod driver;


pub use codegen::TargetCodeGenerator;
pub use driver::compile;
