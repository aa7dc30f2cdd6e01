use once_cell::sync::Lazy;
use tracing::trace;

use crate::{
    ir::{BinaryOp, BlockId, IRHandler, IRProgram, InstrId, InstrKind, UnaryOp, Value},
    typ::{FlowType, MatchClass},
    util::fast_map::{FastHashMap, fast_hash_map_new},
    val::Literal,
    vm::{ConstantPool, Instruction, MatchCaseDef, MatchDef, Opcode, Program, make_instruction, with_operand_a},
};

/// Conversion opcodes keyed by `(target, source)` type.
static CASTS: Lazy<FastHashMap<(FlowType, FlowType), Opcode>> = Lazy::new(|| {
    let mut casts = fast_hash_map_new();
    casts.insert((FlowType::String, FlowType::Number), Opcode::N2S);
    casts.insert((FlowType::String, FlowType::IPAddress), Opcode::P2S);
    casts.insert((FlowType::String, FlowType::Cidr), Opcode::C2S);
    casts.insert((FlowType::String, FlowType::RegExp), Opcode::R2S);
    casts.insert((FlowType::Number, FlowType::String), Opcode::S2N);
    casts
});

fn unary_opcode(op: UnaryOp) -> Opcode {
    match op {
        UnaryOp::INeg => Opcode::NNEG,
        UnaryOp::INot => Opcode::NNOT,
        UnaryOp::BNot => Opcode::BNOT,
        UnaryOp::SLen => Opcode::SLEN,
        UnaryOp::SIsEmpty => Opcode::SISEMPTY,
    }
}

fn binary_opcode(op: BinaryOp) -> Opcode {
    use BinaryOp::*;
    match op {
        IAdd => Opcode::NADD,
        ISub => Opcode::NSUB,
        IMul => Opcode::NMUL,
        IDiv => Opcode::NDIV,
        IRem => Opcode::NREM,
        IPow => Opcode::NPOW,
        IAnd => Opcode::NAND,
        IOr => Opcode::NOR,
        IXor => Opcode::NXOR,
        IShl => Opcode::NSHL,
        IShr => Opcode::NSHR,
        ICmpEQ => Opcode::NCMPEQ,
        ICmpNE => Opcode::NCMPNE,
        ICmpLE => Opcode::NCMPLE,
        ICmpGE => Opcode::NCMPGE,
        ICmpLT => Opcode::NCMPLT,
        ICmpGT => Opcode::NCMPGT,
        BAnd => Opcode::BAND,
        BOr => Opcode::BOR,
        BXor => Opcode::BXOR,
        SAdd => Opcode::SADD,
        SCmpEQ => Opcode::SCMPEQ,
        SCmpNE => Opcode::SCMPNE,
        SCmpLE => Opcode::SCMPLE,
        SCmpGE => Opcode::SCMPGE,
        SCmpLT => Opcode::SCMPLT,
        SCmpGT => Opcode::SCMPGT,
        SCmpRE => Opcode::SREGMATCH,
        SCmpBeg => Opcode::SCMPBEG,
        SCmpEnd => Opcode::SCMPEND,
        SIn => Opcode::SCONTAINS,
        PCmpEQ => Opcode::PCMPEQ,
        PCmpNE => Opcode::PCMPNE,
        PInCidr => Opcode::PINCIDR,
    }
}

fn match_opcode(class: MatchClass) -> Opcode {
    match class {
        MatchClass::Same => Opcode::SMATCHEQ,
        MatchClass::Head => Opcode::SMATCHBEG,
        MatchClass::Tail => Opcode::SMATCHEND,
        MatchClass::RegExp => Opcode::SMATCHR,
    }
}

#[derive(Clone, Copy)]
struct Cx<'a> {
    program: &'a IRProgram,
    handler: &'a IRHandler,
}

/// Lowers every handler of an [`IRProgram`] into linear stack-machine code.
///
/// A simulated operand stack mirrors what the VM stack will hold while the
/// code runs. Each slot remembers the instruction whose result it carries,
/// so operands already sitting on top of the stack for their last use are
/// consumed in place instead of reloaded. Variables (`alloca`) are hoisted
/// into fixed slots at the bottom of the stack and every block starts with
/// only those slots live; instruction results therefore never cross a block
/// boundary.
///
/// Branches are emitted with placeholder targets, recorded per target block,
/// and back-patched once every block's offset is known. Problems are
/// collected in [`errors`](Self::errors) instead of aborting generation.
#[derive(Default)]
pub struct TargetCodeGenerator {
    errors: Vec<String>,
    pool: ConstantPool,
    block_offsets: Vec<FastHashMap<BlockId, usize>>,

    handler_id: usize,
    handler_name: String,
    code: Vec<Instruction>,
    stack: Vec<Option<InstrId>>,
    n_vars: usize,
    max_stack: usize,
    var_slots: FastHashMap<InstrId, usize>,
    uses: FastHashMap<InstrId, usize>,
    offsets: FastHashMap<BlockId, usize>,
    pending_jumps: FastHashMap<BlockId, Vec<(usize, Opcode)>>,
    match_hints: Vec<(InstrId, usize)>,
}

impl TargetCodeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Start offset of `block` in the code of handler `handler`, as laid out by
    /// the last [`generate`](Self::generate).
    pub fn block_offset(&self, handler: usize, block: BlockId) -> Option<usize> {
        self.block_offsets.get(handler)?.get(&block).copied()
    }

    /// Generates code for every handler. The result must not be linked if
    /// [`errors`](Self::errors) is non-empty afterwards.
    pub fn generate(&mut self, program: &IRProgram) -> Program {
        self.errors.clear();
        self.block_offsets.clear();
        self.pool = ConstantPool::default();

        for (name, path) in program.modules() {
            self.pool.add_module(name, path);
        }
        for handler in program.handlers() {
            self.pool.make_handler(handler.name());
        }
        for handler in program.handlers() {
            self.generate_handler(Cx { program, handler });
        }
        Program::new(std::mem::take(&mut self.pool))
    }

    fn error(&mut self, message: impl std::fmt::Display) {
        self.errors.push(format!("{}: {message}", self.handler_name));
    }

    fn generate_handler(&mut self, cx: Cx<'_>) {
        self.handler_id = self.pool.make_handler(cx.handler.name());
        self.handler_name = cx.handler.name().to_owned();
        self.code.clear();
        self.stack.clear();
        self.max_stack = 0;
        self.var_slots.clear();
        self.uses.clear();
        self.offsets.clear();
        self.pending_jumps.clear();
        self.match_hints.clear();

        for (id, instr) in cx.handler.instructions() {
            for operand in &instr.operands {
                if let Value::Instr(used) = operand {
                    *self.uses.entry(*used).or_default() += 1;
                }
            }
            if instr.kind == InstrKind::Alloca {
                let slot = self.var_slots.len();
                self.var_slots.insert(id, slot);
            }
        }
        self.n_vars = self.var_slots.len();
        if self.n_vars > 0 {
            let n = self.operand(self.n_vars, "variable count");
            self.emit(Opcode::ALLOCA, n, 0, 0, None);
            for (id, slot) in &self.var_slots {
                self.stack[*slot] = Some(*id);
            }
        }

        let layout = cx.handler.blocks();
        if layout.is_empty() {
            self.error("handler has no blocks");
            self.emit(Opcode::EXIT, 0, 0, 0, None);
        }
        for &block in layout {
            self.offsets.insert(block, self.code.len());
            self.stack.truncate(self.n_vars);
            for &instr in cx.handler.block(block).instrs() {
                self.emit_instr(cx, block, instr);
            }
        }

        self.patch_jumps();
        self.patch_matches(cx);

        trace!(
            handler = %self.handler_name,
            instructions = self.code.len(),
            stack_size = self.max_stack,
            "generated handler"
        );
        let code = std::mem::take(&mut self.code);
        self.pool.set_handler(self.handler_id, code, self.max_stack);
        self.block_offsets.push(std::mem::take(&mut self.offsets));
    }

    fn patch_jumps(&mut self) {
        let pending: Vec<_> = self.pending_jumps.drain().collect();
        for (block, jumps) in pending {
            let Some(&target) = self.offsets.get(&block) else {
                self.error(format!("branch to {block}, which is not part of the handler"));
                continue;
            };
            let Ok(target) = u16::try_from(target) else {
                self.error(format!("branch target {target} exceeds the addressable code size"));
                continue;
            };
            for (pc, op) in jumps {
                debug_assert!(op.is_branch());
                self.code[pc] = with_operand_a(self.code[pc], target);
            }
        }
    }

    fn patch_matches(&mut self, cx: Cx<'_>) {
        for (instr, match_id) in std::mem::take(&mut self.match_hints) {
            let InstrKind::Match { cases, else_block, .. } = &cx.handler.instr(instr).kind else {
                continue;
            };
            let case_pcs: Vec<u64> = cases.iter().map(|(_, b)| self.offset_of(*b)).collect();
            let else_pc = else_block.map(|b| self.offset_of(b)).unwrap_or_default();
            let def = self.pool.match_def_mut(match_id);
            for (case, pc) in def.cases.iter_mut().zip(case_pcs) {
                case.pc = pc;
            }
            def.else_pc = else_pc;
        }
    }

    fn offset_of(&self, block: BlockId) -> u64 {
        self.offsets.get(&block).copied().unwrap_or_default() as u64
    }

    /// Narrows an operand to 16 bits, recording an error if it does not fit.
    fn operand(&mut self, value: usize, what: &str) -> u16 {
        u16::try_from(value).unwrap_or_else(|_| {
            self.error(format!("{what} {value} exceeds the 16-bit operand range"));
            0
        })
    }

    /// Appends one instruction and applies its stack effect to the simulated
    /// stack; the pushed value (if any) is attributed to `result`.
    fn emit(&mut self, op: Opcode, a: u16, b: u16, c: u16, result: Option<InstrId>) -> usize {
        let instr = make_instruction(op, a, b, c);
        let (pops, pushes) = op.stack_effect(instr);
        self.change_stack(pops, pushes, result);
        self.code.push(instr);
        self.code.len() - 1
    }

    fn change_stack(&mut self, pops: usize, pushes: usize, result: Option<InstrId>) {
        assert!(
            pops <= self.stack.len(),
            "{}: code generator popped {pops} of {} stack slots",
            self.handler_name,
            self.stack.len()
        );
        self.stack.truncate(self.stack.len() - pops);
        for i in 0..pushes {
            self.stack.push(if i + 1 == pushes { result } else { None });
        }
        self.max_stack = self.max_stack.max(self.stack.len());
    }

    fn emit_jump(&mut self, op: Opcode, target: BlockId) {
        let pc = self.emit(op, 0, 0, 0, None);
        self.pending_jumps.entry(target).or_default().push((pc, op));
    }

    fn emit_constant(&mut self, literal: &Literal) {
        match literal {
            Literal::Int(n) => match u16::try_from(*n) {
                Ok(small) => self.emit(Opcode::ILOAD, small, 0, 0, None),
                Err(_) => {
                    let index = self.pool.make_integer(*n);
                    let index = self.operand(index, "integer constant");
                    self.emit(Opcode::NLOAD, index, 0, 0, None)
                }
            },
            Literal::Boolean(b) => self.emit(Opcode::ILOAD, u16::from(*b), 0, 0, None),
            Literal::String(s) => {
                let index = self.pool.make_string(s);
                let index = self.operand(index, "string constant");
                self.emit(Opcode::SLOAD, index, 0, 0, None)
            }
            Literal::IP(ip) => {
                let index = self.pool.make_ipaddr(*ip);
                let index = self.operand(index, "IP constant");
                self.emit(Opcode::PLOAD, index, 0, 0, None)
            }
            Literal::Cidr(cidr) => {
                let index = self.pool.make_cidr(*cidr);
                let index = self.operand(index, "CIDR constant");
                self.emit(Opcode::CLOAD, index, 0, 0, None)
            }
            Literal::RegExp(re) => {
                let index = self.pool.make_regexp(re.clone());
                let index = self.operand(index, "regex constant");
                self.emit(Opcode::RLOAD, index, 0, 0, None)
            }
        };
    }

    fn use_once(&mut self, id: InstrId) -> usize {
        let remaining = self.uses.entry(id).or_default();
        *remaining = remaining.saturating_sub(1);
        *remaining
    }

    /// Pushes a copy of `value` for the next instruction to consume.
    fn emit_load(&mut self, cx: Cx<'_>, value: Value) {
        let id = match value {
            Value::Constant(c) => return self.emit_constant(cx.program.constant(c)),
            Value::Instr(id) => id,
        };
        if self.var_slots.contains_key(&id) {
            self.error(format!("variable {id} used as a value; it must be loaded first"));
            self.emit(Opcode::ILOAD, 0, 0, 0, None);
            return;
        }
        self.use_once(id);
        let found = self.stack[self.n_vars..]
            .iter()
            .rposition(|slot| *slot == Some(id))
            .map(|pos| pos + self.n_vars);
        match found {
            Some(pos) => {
                let pos = self.operand(pos, "stack slot");
                self.emit(Opcode::LOAD, pos, 0, 0, None);
            }
            None => {
                self.error(format!(
                    "{id} (`{}`) is used outside the block that defines it",
                    cx.handler.instr(id).mnemonic()
                ));
                self.emit(Opcode::ILOAD, 0, 0, 0, None);
            }
        }
    }

    /// Brings `values` to the top of the stack in order. A leading run of
    /// values that already are the topmost slots, each at its last use, is
    /// consumed in place; only the rest is loaded.
    fn emit_operands(&mut self, cx: Cx<'_>, values: &[Value]) {
        let reuse = (1..=values.len())
            .rev()
            .find(|&k| self.on_top(&values[..k]))
            .unwrap_or(0);
        for value in &values[..reuse] {
            if let Value::Instr(id) = value {
                self.use_once(*id);
            }
        }
        for value in &values[reuse..] {
            self.emit_load(cx, *value);
        }
    }

    fn on_top(&self, values: &[Value]) -> bool {
        let k = values.len();
        if self.stack.len() < self.n_vars + k {
            return false;
        }
        let top = &self.stack[self.stack.len() - k..];
        values.iter().zip(top).all(|(value, slot)| match value {
            Value::Instr(id) => *slot == Some(*id) && self.uses.get(id) == Some(&1),
            Value::Constant(_) => false,
        })
    }

    /// Drops everything above the variables except the top `keep` slots.
    fn cleanup(&mut self, keep: usize) {
        let mut garbage = self.stack.len() - self.n_vars - keep;
        if garbage == 0 {
            return;
        }
        if keep == 1 {
            let top = self.stack.last().copied().flatten();
            let base = self.operand(self.n_vars, "stack slot");
            self.emit(Opcode::STORE, base, 0, 0, None);
            self.stack[self.n_vars] = top;
            garbage -= 1;
        }
        if garbage > 0 {
            let n = self.operand(garbage, "discard count");
            self.emit(Opcode::DISCARD, n, 0, 0, None);
        }
    }

    fn variable_slot(&mut self, variable: Value) -> u16 {
        match variable.as_instr().and_then(|id| self.var_slots.get(&id).copied()) {
            Some(slot) => self.operand(slot, "variable slot"),
            None => {
                self.error(format!("{variable} is not a variable"));
                0
            }
        }
    }

    fn emit_instr(&mut self, cx: Cx<'_>, block: BlockId, id: InstrId) {
        let instr = cx.handler.instr(id);
        let ops = instr.operands.as_slice();
        let mut result = None;
        match &instr.kind {
            InstrKind::Nop | InstrKind::Alloca => {}
            InstrKind::Load => {
                let slot = self.variable_slot(ops[0]);
                self.emit(Opcode::LOAD, slot, 0, 0, Some(id));
                result = Some(id);
            }
            InstrKind::Store => {
                let slot = self.variable_slot(ops[0]);
                self.emit_operands(cx, &ops[1..2]);
                self.emit(Opcode::STORE, slot, 0, 0, None);
            }
            InstrKind::Phi => {
                self.error(format!("{id}: phi nodes must be lowered before code generation"));
                self.emit(Opcode::ILOAD, 0, 0, 0, Some(id));
                result = Some(id);
            }
            InstrKind::Cast => {
                let source = cx.program.type_of(cx.handler, ops[0]);
                self.emit_operands(cx, ops);
                if source == instr.ty {
                    self.change_stack(1, 1, Some(id));
                } else if (instr.ty, source) == (FlowType::Boolean, FlowType::Number) {
                    self.emit(Opcode::NCMPZ, 0, 0, 0, None);
                    self.emit(Opcode::BNOT, 0, 0, 0, Some(id));
                } else if let Some(op) = CASTS.get(&(instr.ty, source)) {
                    self.emit(*op, 0, 0, 0, Some(id));
                } else {
                    self.error(format!("{id}: no conversion from {source} to {}", instr.ty));
                    self.change_stack(1, 1, Some(id));
                }
                result = Some(id);
            }
            InstrKind::Unary(op) => {
                self.emit_operands(cx, ops);
                self.emit(unary_opcode(*op), 0, 0, 0, Some(id));
                result = Some(id);
            }
            InstrKind::Binary(BinaryOp::SCmpRE) => {
                let regex = ops[1].as_constant().map(|c| cx.program.constant(c));
                self.emit_operands(cx, &ops[..1]);
                match regex {
                    Some(Literal::RegExp(re)) => {
                        let index = self.pool.make_regexp(re.clone());
                        let index = self.operand(index, "regex constant");
                        self.emit(Opcode::SREGMATCH, index, 0, 0, Some(id));
                    }
                    _ => {
                        self.error(format!("{id}: regular expressions must be constant"));
                        self.change_stack(1, 1, Some(id));
                    }
                }
                result = Some(id);
            }
            InstrKind::Binary(op) => {
                self.emit_operands(cx, ops);
                self.emit(binary_opcode(*op), 0, 0, 0, Some(id));
                result = Some(id);
            }
            InstrKind::SubStr => {
                self.emit_operands(cx, ops);
                self.emit(Opcode::SSUBSTR, 0, 0, 0, Some(id));
                result = Some(id);
            }
            InstrKind::RegExpGroup => {
                self.emit_operands(cx, ops);
                self.emit(Opcode::SREGGROUP, 0, 0, 0, Some(id));
                result = Some(id);
            }
            InstrKind::Call(callee) => {
                let signature = &cx.program.builtin_function(*callee).signature;
                let index = self.pool.make_native_function(signature);
                let index = self.operand(index, "native function");
                let argc = self.operand(ops.len(), "argument count");
                let returns = signature.return_type() != FlowType::Void;
                self.emit_operands(cx, ops);
                self.emit(Opcode::CALL, index, argc, u16::from(returns), Some(id));
                if returns {
                    result = Some(id);
                }
            }
            InstrKind::HandlerCall(callee) => {
                let signature = &cx.program.builtin_handler(*callee).signature;
                let index = self.pool.make_native_handler(signature);
                let index = self.operand(index, "native handler");
                let argc = self.operand(ops.len(), "argument count");
                self.emit_operands(cx, ops);
                self.emit(Opcode::HANDLER, index, argc, 0, None);
            }
            InstrKind::Br { target } => {
                self.cleanup(0);
                if !cx.handler.is_followed_by(block, *target) {
                    self.emit_jump(Opcode::JMP, *target);
                }
            }
            InstrKind::CondBr { then_block, else_block } => {
                self.emit_operands(cx, ops);
                self.cleanup(1);
                if cx.handler.is_followed_by(block, *then_block) {
                    self.emit_jump(Opcode::JZ, *else_block);
                } else if cx.handler.is_followed_by(block, *else_block) {
                    self.emit_jump(Opcode::JN, *then_block);
                } else {
                    self.emit_jump(Opcode::JN, *then_block);
                    self.emit_jump(Opcode::JMP, *else_block);
                }
            }
            InstrKind::Match {
                class,
                cases,
                else_block,
            } => {
                assert!(
                    else_block.is_some(),
                    "{}: match instruction {id} has no else block",
                    self.handler_name
                );
                self.emit_operands(cx, ops);
                self.cleanup(1);
                let cases = cases
                    .iter()
                    .map(|(label, _)| {
                        let label = match cx.program.constant(*label) {
                            Literal::RegExp(re) => self.pool.make_regexp(re.clone()),
                            Literal::String(s) => self.pool.make_string(s),
                            other => {
                                self.error(format!("{id}: invalid match label {other}"));
                                0
                            }
                        };
                        MatchCaseDef {
                            label: label as u64,
                            pc: 0,
                        }
                    })
                    .collect();
                let match_id = self.pool.make_match_def(MatchDef {
                    handler_id: self.handler_id,
                    op: *class,
                    else_pc: 0,
                    cases,
                });
                let operand = self.operand(match_id, "match table");
                self.emit(match_opcode(*class), operand, 0, 0, None);
                self.match_hints.push((id, match_id));
            }
            InstrKind::Ret => match ops[0].as_constant().map(|c| cx.program.constant(c)) {
                Some(Literal::Boolean(handled)) => {
                    self.cleanup(0);
                    self.emit(Opcode::EXIT, u16::from(*handled), 0, 0, None);
                }
                _ => {
                    self.emit_operands(cx, ops);
                    self.cleanup(1);
                    self.emit(Opcode::RET, 0, 0, 0, None);
                }
            },
        }

        if let Some(id) = result
            && self.uses.get(&id).copied().unwrap_or(0) == 0
            && self.stack.last() == Some(&Some(id))
        {
            self.emit(Opcode::DISCARD, 1, 0, 0, None);
        }
    }
}
