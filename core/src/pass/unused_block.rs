use crate::{
    ir::{BlockId, IRHandler, PassContext},
    util::fast_map::{FastHashSet, fast_hash_set_new},
};

use super::HandlerPass;

/// Deletes blocks that cannot be reached from the entry block.
pub struct UnusedBlockPass;

pub(crate) fn reachable_blocks(handler: &IRHandler) -> FastHashSet<BlockId> {
    let mut seen = fast_hash_set_new();
    let Some(entry) = handler.entry_block() else {
        return seen;
    };
    let mut work = vec![entry];
    while let Some(block) = work.pop() {
        if seen.insert(block) {
            work.extend(handler.block(block).successors().iter().copied());
        }
    }
    seen
}

impl HandlerPass for UnusedBlockPass {
    fn name(&self) -> &str {
        "unused-block"
    }

    fn run(&mut self, handler: &mut IRHandler, _program: &PassContext<'_>) -> bool {
        let reachable = reachable_blocks(handler);
        let dead: Vec<BlockId> = handler
            .blocks()
            .iter()
            .copied()
            .filter(|b| !reachable.contains(b))
            .collect();
        if dead.is_empty() {
            return false;
        }
        // Dead blocks may branch to each other; cut every dead edge first.
        for &block in &dead {
            if let Some(term) = handler.terminator(block) {
                handler.remove_instr(term);
            }
        }
        for block in dead {
            handler.remove_block(block);
        }
        true
    }
}
