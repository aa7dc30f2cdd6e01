use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::{config::FlowConfig, ir::IRProgram, pass::PassManager, vm::Program};

use super::TargetCodeGenerator;

/// Optimizes `program` in place according to `config` and generates the
/// unlinked VM program for it.
///
/// All code generation errors are reported together.
pub fn compile(program: &mut IRProgram, config: &FlowConfig) -> Result<Program> {
    if config.compiler.optimization_level > 0 {
        let mut passes = PassManager::with_default_passes();
        passes.set_verify(config.compiler.verify_ir);
        let changed = passes.run(program)?;
        debug!(changed, "optimization passes finished");
    }

    if config.compiler.verify_ir {
        for handler in program.handlers() {
            handler
                .verify()
                .with_context(|| format!("handler {} failed verification", handler.name()))?;
        }
    }

    let mut generator = TargetCodeGenerator::new();
    let mut image = generator.generate(program);
    if !generator.errors().is_empty() {
        bail!("code generation failed:\n  {}", generator.errors().join("\n  "));
    }
    image.set_vm_config(config.vm.clone());

    info!(
        handlers = image.handler_count(),
        natives = image.constants().native_function_signatures().len() + image.constants().native_handler_signatures().len(),
        "compiled flow program"
    );
    Ok(image)
}
