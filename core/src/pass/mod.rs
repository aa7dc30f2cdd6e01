//! CFG rewrite passes run between IR construction and code generation.

mod empty_block;
mod instr_elim;
mod merge_block;
mod unused_block;

use anyhow::{Context, Result};
use tracing::debug;

use crate::ir::{IRHandler, IRProgram, PassContext};

pub use empty_block::EmptyBlockElimination;
pub use instr_elim::InstructionElimination;
pub use merge_block::MergeBlockPass;
pub use unused_block::UnusedBlockPass;

/// A rewrite over one handler's CFG.
///
/// Implementations iterate internally until they make no further change, so
/// running a pass twice in a row is a no-op the second time. On return the
/// handler must still satisfy [`IRHandler::verify`].
pub trait HandlerPass {
    fn name(&self) -> &str;

    /// Returns whether the handler was changed.
    fn run(&mut self, handler: &mut IRHandler, program: &PassContext<'_>) -> bool;
}

/// Ordered list of passes; each registered pass runs exactly once per
/// handler per [`PassManager::run`], in registration order.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn HandlerPass>>,
    verify: bool,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard optimization pipeline.
    pub fn with_default_passes() -> Self {
        let mut pm = Self::new();
        pm.register(Box::new(InstructionElimination));
        pm.register(Box::new(EmptyBlockElimination));
        pm.register(Box::new(MergeBlockPass));
        pm.register(Box::new(UnusedBlockPass));
        pm
    }

    /// Checks CFG invariants after every pass.
    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    pub fn register(&mut self, pass: Box<dyn HandlerPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    /// Runs every pass over every handler. Returns whether anything changed.
    pub fn run(&mut self, program: &mut IRProgram) -> Result<bool> {
        let (handlers, context) = program.split_mut();
        let mut changed = false;
        for handler in handlers {
            changed |= self.run_handler(handler, &context)?;
        }
        Ok(changed)
    }

    pub fn run_handler(&mut self, handler: &mut IRHandler, program: &PassContext<'_>) -> Result<bool> {
        let mut changed = false;
        for pass in &mut self.passes {
            let pass_changed = pass.run(handler, program);
            debug!(handler = handler.name(), pass = pass.name(), changed = pass_changed, "ran pass");
            if self.verify {
                handler
                    .verify()
                    .with_context(|| format!("{} left handler {} inconsistent", pass.name(), handler.name()))?;
            }
            changed |= pass_changed;
        }
        Ok(changed)
    }
}
