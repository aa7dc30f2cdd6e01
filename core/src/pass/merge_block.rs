use crate::ir::{BlockId, IRHandler, InstrKind, PassContext};

use super::HandlerPass;

/// Merges `a -> b` when `a` ends in an unconditional branch to `b` and `b` has
/// no other predecessor.
pub struct MergeBlockPass;

fn mergeable(handler: &IRHandler, block: BlockId) -> Option<BlockId> {
    let term = handler.terminator(block)?;
    let InstrKind::Br { target } = handler.instr(term).kind else {
        return None;
    };
    let sole_pred = handler.block(target).predecessors() == [block];
    (target != block && Some(target) != handler.entry_block() && sole_pred).then_some(target)
}

impl HandlerPass for MergeBlockPass {
    fn name(&self) -> &str {
        "merge-block"
    }

    fn run(&mut self, handler: &mut IRHandler, _program: &PassContext<'_>) -> bool {
        let mut changed = false;
        loop {
            let candidate = handler
                .blocks()
                .iter()
                .find_map(|&b| mergeable(handler, b).map(|next| (b, next)));
            let Some((block, next)) = candidate else {
                break;
            };
            handler.merge_back(block, next);
            changed = true;
        }
        changed
    }
}
