use crate::{
    ir::{BlockId, IRHandler, Instr, InstrId, InstrKind, PassContext, Value},
    typ::FlowType,
};

use super::HandlerPass;

/// Local instruction rewrites, repeated until nothing changes:
///
/// - `condbr` whose arms coincide becomes `br`
/// - `condbr` on a constant boolean becomes `br` to the taken arm
/// - `br` to a block holding only `ret <constant>` becomes that `ret`
/// - unused results without side effects are deleted
pub struct InstructionElimination;

fn branch_to(target: BlockId) -> Instr {
    Instr::new(InstrKind::Br { target }, FlowType::Void, vec![])
}

fn rewrite_same_target_condbr(handler: &mut IRHandler, block: BlockId) -> bool {
    let Some(term) = handler.terminator(block) else {
        return false;
    };
    let InstrKind::CondBr { then_block, else_block } = handler.instr(term).kind else {
        return false;
    };
    if then_block != else_block {
        return false;
    }
    handler.replace_terminator(block, branch_to(then_block));
    true
}

fn fold_constant_condbr(handler: &mut IRHandler, block: BlockId, program: &PassContext<'_>) -> bool {
    let Some(term) = handler.terminator(block) else {
        return false;
    };
    let instr = handler.instr(term);
    let InstrKind::CondBr { then_block, else_block } = instr.kind else {
        return false;
    };
    let Some(cond) = program.constant_bool(instr.operands[0]) else {
        return false;
    };
    handler.replace_terminator(block, branch_to(if cond { then_block } else { else_block }));
    true
}

fn inline_branch_to_exit(handler: &mut IRHandler, block: BlockId) -> bool {
    let Some(term) = handler.terminator(block) else {
        return false;
    };
    let InstrKind::Br { target } = handler.instr(term).kind else {
        return false;
    };
    if target == block || handler.block(target).len() != 1 {
        return false;
    }
    let Some(exit) = handler.terminator(target) else {
        return false;
    };
    let ret = handler.instr(exit);
    // An instruction operand would be defined in another block.
    if ret.kind != InstrKind::Ret || !matches!(ret.operands[0], Value::Constant(_)) {
        return false;
    }
    let clone = Instr::new(InstrKind::Ret, FlowType::Void, ret.operands.clone());
    handler.replace_terminator(block, clone);
    true
}

fn remove_unused(handler: &mut IRHandler, program: &PassContext<'_>) -> bool {
    let mut uses: Vec<usize> = Vec::new();
    let mut candidates: Vec<InstrId> = Vec::new();
    for (id, instr) in handler.instructions() {
        for operand in &instr.operands {
            if let Value::Instr(used) = operand {
                if uses.len() <= used.index() {
                    uses.resize(used.index() + 1, 0);
                }
                uses[used.index()] += 1;
            }
        }
        if !instr.has_side_effects(|callee| program.is_side_effect_free(callee)) {
            candidates.push(id);
        }
    }
    let dead: Vec<InstrId> = candidates
        .into_iter()
        .filter(|id| uses.get(id.index()).copied().unwrap_or(0) == 0)
        .collect();
    let changed = !dead.is_empty();
    for id in dead {
        handler.remove_instr(id);
    }
    changed
}

impl HandlerPass for InstructionElimination {
    fn name(&self) -> &str {
        "instruction-elimination"
    }

    fn run(&mut self, handler: &mut IRHandler, program: &PassContext<'_>) -> bool {
        let mut changed = false;
        loop {
            let mut round = false;
            for block in handler.blocks().to_vec() {
                round |= rewrite_same_target_condbr(handler, block);
                round |= fold_constant_condbr(handler, block, program);
                round |= inline_branch_to_exit(handler, block);
            }
            round |= remove_unused(handler, program);
            if !round {
                return changed;
            }
            changed = true;
        }
    }
}
