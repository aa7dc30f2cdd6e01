use crate::ir::{BlockId, IRHandler, InstrKind, PassContext};

use super::HandlerPass;

/// Removes blocks consisting of a single unconditional branch by pointing
/// their predecessors straight at the branch target.
pub struct EmptyBlockElimination;

fn forwarding_target(handler: &IRHandler, block: BlockId) -> Option<BlockId> {
    if Some(block) == handler.entry_block() || handler.block(block).len() != 1 {
        return None;
    }
    let term = handler.terminator(block)?;
    match handler.instr(term).kind {
        InstrKind::Br { target } if target != block => Some(target),
        _ => None,
    }
}

impl HandlerPass for EmptyBlockElimination {
    fn name(&self) -> &str {
        "empty-block-elimination"
    }

    fn run(&mut self, handler: &mut IRHandler, _program: &PassContext<'_>) -> bool {
        let mut changed = false;
        loop {
            let candidate = handler
                .blocks()
                .iter()
                .find_map(|&b| forwarding_target(handler, b).map(|t| (b, t)));
            let Some((block, target)) = candidate else {
                break;
            };
            let mut preds = handler.block(block).predecessors().to_vec();
            preds.dedup();
            for pred in preds {
                handler.retarget(pred, block, target);
            }
            handler.remove_block(block);
            changed = true;
        }
        changed
    }
}
