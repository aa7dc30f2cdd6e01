//! Compiler and VM settings, loadable from TOML:
//!
//! ```toml
//! [compiler]
//! optimization_level = 1
//! verify_ir = true
//!
//! [vm]
//! stack_limit = 4096
//! ```
//!
//! Every field is optional and falls back to its default.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    pub compiler: CompilerConfig,
    pub vm: VmConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    /// 0 disables the optimization passes, anything else runs the default
    /// pipeline.
    pub optimization_level: u8,
    /// Verify CFG invariants after every pass and before code generation.
    pub verify_ir: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimization_level: 1,
            verify_ir: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Maximum operand-stack depth of one runner; exceeding it aborts.
    pub stack_limit: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { stack_limit: 4096 }
    }
}

impl FlowConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: FlowConfig = toml::from_str(input).context("invalid flow configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&input).with_context(|| format!("in {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.vm.stack_limit > 0, "vm.stack_limit must be positive");
        Ok(())
    }
}
