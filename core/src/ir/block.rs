use super::{BlockId, InstrId};

/// Straight-line instruction sequence ending in exactly one terminator.
///
/// Edges are plain ids into the owning handler's arena and are kept symmetric
/// by [`IRHandler::link_successor`](super::IRHandler::link_successor) and
/// [`IRHandler::unlink_successor`](super::IRHandler::unlink_successor). They
/// form a multiset: a `condbr` whose arms coincide contributes two edges.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub name: String,
    pub(crate) instrs: Vec<InstrId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
}

impl BasicBlock {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            instrs: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn instrs(&self) -> &[InstrId] {
        &self.instrs
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn back(&self) -> Option<InstrId> {
        self.instrs.last().copied()
    }
}
