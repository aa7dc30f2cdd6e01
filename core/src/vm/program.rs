use std::{fmt, sync::Arc};

use anyhow::{Context, Result, anyhow, ensure};
use tracing::{debug, error};

use crate::{config::VmConfig, signature::Signature, typ::MatchClass};

use super::{
    constant_pool::{ConstantPool, HandlerDef},
    instruction::{Opcode, opcode, operand_a},
    matcher::Matcher,
    native::{NativeCallback, Userdata},
    runner::Runner,
    runtime::Runtime,
};

/// Compiled program: constant pool plus one bytecode body per handler.
///
/// A program is linked once against a [`Runtime`] and then shared read-only
/// (behind an `Arc`) by any number of concurrently executing [`Runner`]s.
pub struct Program {
    pool: ConstantPool,
    matchers: Vec<Matcher>,
    native_handlers: Vec<Option<Arc<NativeCallback>>>,
    native_functions: Vec<Option<Arc<NativeCallback>>>,
    unresolved: Vec<Signature>,
    linked: bool,
    vm_config: VmConfig,
}

impl Program {
    pub fn new(pool: ConstantPool) -> Self {
        let matchers = pool.match_defs().iter().map(|def| Matcher::new(def, &pool)).collect();
        Self {
            pool,
            matchers,
            native_handlers: Vec::new(),
            native_functions: Vec::new(),
            unresolved: Vec::new(),
            linked: false,
            vm_config: VmConfig::default(),
        }
    }

    /// Imports every referenced module and resolves every native signature.
    /// Each failure is logged; returns true only if there were none.
    pub fn link(&mut self, runtime: &mut dyn Runtime) -> bool {
        let mut errors = 0;
        self.unresolved.clear();

        let mut builtins = Vec::new();
        for (name, path) in self.pool.modules() {
            if !runtime.import(name, path, &mut builtins) {
                error!(module = %name, path = %path, "failed to import module");
                errors += 1;
            }
        }

        let (handlers, missing) = resolve(self.pool.native_handler_signatures(), runtime, "handler");
        errors += missing.len();
        self.unresolved.extend(missing);
        self.native_handlers = handlers;

        let (functions, missing) = resolve(self.pool.native_function_signatures(), runtime, "function");
        errors += missing.len();
        self.unresolved.extend(missing);
        self.native_functions = functions;

        self.linked = errors == 0;
        debug!(
            modules = self.pool.modules().len(),
            imported_builtins = builtins.len(),
            handlers = self.native_handlers.len(),
            functions = self.native_functions.len(),
            errors,
            "linked program"
        );
        self.linked
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Native signatures the last [`link`](Self::link) could not resolve.
    pub fn unresolved_symbols(&self) -> &[Signature] {
        &self.unresolved
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn set_vm_config(&mut self, config: VmConfig) {
        self.vm_config = config;
    }

    pub fn vm_config(&self) -> &VmConfig {
        &self.vm_config
    }

    pub fn handler_count(&self) -> usize {
        self.pool.handlers().len()
    }

    pub fn handler(&self, index: usize) -> &HandlerDef {
        self.pool.handler(index)
    }

    pub fn find_handler(&self, name: &str) -> Option<usize> {
        self.pool.handlers().iter().position(|h| h.name == name)
    }

    pub fn handler_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.pool.handlers().iter().map(|h| h.name.as_str())
    }

    pub(crate) fn matcher(&self, index: usize) -> &Matcher {
        &self.matchers[index]
    }

    pub(crate) fn native_function(&self, index: usize) -> &Arc<NativeCallback> {
        self.native_functions[index]
            .as_ref()
            .unwrap_or_else(|| panic!("native function #{index} is not linked"))
    }

    pub(crate) fn native_handler(&self, index: usize) -> &Arc<NativeCallback> {
        self.native_handlers[index]
            .as_ref()
            .unwrap_or_else(|| panic!("native handler #{index} is not linked"))
    }

    /// Creates a runner for handler `index`.
    ///
    /// # Panics
    ///
    /// If the program is not successfully linked.
    pub fn create_runner(self: &Arc<Self>, index: usize) -> Runner {
        self.create_runner_with(index, None, None)
    }

    pub fn create_runner_with(
        self: &Arc<Self>,
        index: usize,
        userdata1: Option<Userdata>,
        userdata2: Option<Userdata>,
    ) -> Runner {
        assert!(self.linked, "cannot run a program that is not linked");
        assert!(index < self.handler_count(), "handler #{index} does not exist");
        Runner::new(Arc::clone(self), index, [userdata1, userdata2])
    }

    /// Runs handler `name` on a throwaway runner. `Ok(false)` means the
    /// request was not handled or the run was suspended.
    ///
    /// The runner is dropped on return, so a run that suspends can never be
    /// resumed and any [`ResumeToken`](super::ResumeToken) a callback parked
    /// is dead. Hosts whose callbacks may suspend should keep the runner from
    /// [`create_runner_with`](Self::create_runner_with) instead.
    pub fn run(self: &Arc<Self>, name: &str, userdata1: Option<Userdata>, userdata2: Option<Userdata>) -> Result<bool> {
        ensure!(self.linked, "program is not linked");
        let index = self
            .find_handler(name)
            .ok_or_else(|| anyhow!("no handler named {name:?}"))?;
        let mut runner = self.create_runner_with(index, userdata1, userdata2);
        Ok(runner.run())
    }

    /// Human-readable listing of the constant pool and all handlers.
    pub fn dump(&self) -> String {
        self.to_string()
    }

    /// Serializes the unlinked image (constant pool and code) as JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.pool).context("failed to serialize program image")
    }

    /// Loads an image written by [`to_json`](Self::to_json). The result must
    /// be linked before it can run.
    pub fn from_json(json: &str) -> Result<Self> {
        let pool: ConstantPool = serde_json::from_str(json).context("failed to parse program image")?;
        validate(&pool)?;
        Ok(Program::new(pool))
    }
}

fn resolve(
    signatures: &[Signature],
    runtime: &dyn Runtime,
    what: &str,
) -> (Vec<Option<Arc<NativeCallback>>>, Vec<Signature>) {
    let mut missing = Vec::new();
    let resolved = signatures
        .iter()
        .map(|sig| {
            let found = runtime.find(sig);
            if found.is_none() {
                error!(signature = %sig, kind = what, "unresolved native {what} signature");
                missing.push(sig.clone());
            }
            found
        })
        .collect();
    (resolved, missing)
}

/// Checks an image so a corrupt file fails to load instead of aborting the
/// VM later: opcodes, every operand against its table or the code length,
/// match tables, and the operand-stack depth along every path.
fn validate(pool: &ConstantPool) -> Result<()> {
    for def in pool.match_defs() {
        let labels = match def.op {
            MatchClass::RegExp => pool.regexps().len(),
            _ => pool.strings().len(),
        } as u64;
        let handler = pool
            .handlers()
            .get(def.handler_id)
            .ok_or_else(|| anyhow!("match table refers to missing handler #{}", def.handler_id))?;
        let len = handler.code.len() as u64;
        ensure!(def.else_pc < len, "match else target {} out of range", def.else_pc);
        for case in &def.cases {
            ensure!(case.pc < len, "match case target {} out of range", case.pc);
            ensure!(case.label < labels, "match case label {} out of range", case.label);
        }
    }
    for (index, handler) in pool.handlers().iter().enumerate() {
        validate_operands(pool, index, handler)?;
        validate_stack(pool, handler)?;
    }
    Ok(())
}

fn validate_operands(pool: &ConstantPool, index: usize, handler: &HandlerDef) -> Result<()> {
    use Opcode::*;
    let name = &handler.name;
    let len = handler.code.len();
    for (ip, instr) in handler.code.iter().enumerate() {
        let op = Opcode::from_u8((*instr & 0xff) as u8)
            .ok_or_else(|| anyhow!("handler {name} has an invalid opcode at {ip}"))?;
        let (what, limit) = match op {
            JMP | JN | JZ => ("jump target", len),
            NLOAD => ("integer constant", pool.numbers().len()),
            SLOAD => ("string constant", pool.strings().len()),
            PLOAD => ("ipaddr constant", pool.ipaddrs().len()),
            CLOAD => ("cidr constant", pool.cidrs().len()),
            RLOAD | SREGMATCH => ("regex constant", pool.regexps().len()),
            SMATCHEQ | SMATCHBEG | SMATCHEND | SMATCHR => ("match table", pool.match_defs().len()),
            CALL => ("native function", pool.native_function_signatures().len()),
            HANDLER => ("native handler", pool.native_handler_signatures().len()),
            _ => continue,
        };
        let a = operand_a(*instr) as usize;
        ensure!(a < limit, "handler {name}: {what} {a} at {ip} out of range");
        if let SMATCHEQ | SMATCHBEG | SMATCHEND | SMATCHR = op {
            ensure!(
                pool.match_defs()[a].handler_id == index,
                "handler {name}: match table {a} at {ip} belongs to another handler"
            );
        }
    }
    let last = handler.code.last().map(|instr| opcode(*instr));
    ensure!(
        matches!(last, Some(EXIT | RET | JMP | SMATCHEQ | SMATCHBEG | SMATCHEND | SMATCHR)),
        "handler {name} does not end with a terminator"
    );
    Ok(())
}

/// Walks every reachable path, requiring each instruction to see the same
/// stack depth on all paths and never to pop or address below the bottom.
fn validate_stack(pool: &ConstantPool, handler: &HandlerDef) -> Result<()> {
    use Opcode::*;
    let name = &handler.name;
    let code = &handler.code;
    let mut depths: Vec<Option<usize>> = vec![None; code.len()];
    let mut pending = vec![(0, 0)];
    while let Some((ip, depth)) = pending.pop() {
        if let Some(seen) = depths[ip] {
            ensure!(seen == depth, "handler {name}: stack depth at {ip} is {depth} on one path and {seen} on another");
            continue;
        }
        depths[ip] = Some(depth);

        let instr = code[ip];
        let op = opcode(instr);
        let a = operand_a(instr) as usize;
        let (pops, pushes) = op.stack_effect(instr);
        ensure!(pops <= depth, "handler {name}: stack underflow at {ip}");
        match op {
            LOAD => ensure!(a < depth, "handler {name}: LOAD slot {a} at {ip} out of range"),
            STORE => ensure!(a + 1 < depth, "handler {name}: STORE slot {a} at {ip} out of range"),
            _ => {}
        }
        let depth = depth - pops + pushes;
        match op {
            EXIT | RET => {}
            JMP => pending.push((a, depth)),
            JN | JZ => pending.extend([(a, depth), (ip + 1, depth)]),
            SMATCHEQ | SMATCHBEG | SMATCHEND | SMATCHR => {
                let def = &pool.match_defs()[a];
                pending.push((def.else_pc as usize, depth));
                pending.extend(def.cases.iter().map(|case| (case.pc as usize, depth)));
            }
            _ => pending.push((ip + 1, depth)),
        }
    }
    Ok(())
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; Program")?;
        write!(f, "{}", self.pool)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("handlers", &self.handler_names().collect::<Vec<_>>())
            .field("linked", &self.linked)
            .finish_non_exhaustive()
    }
}
