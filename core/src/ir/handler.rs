use std::fmt;

use anyhow::{Result, bail, ensure};

use crate::{
    typ::FlowType,
    util::fast_map::{FastHashMap, fast_hash_map_new},
};

use super::{BasicBlock, BlockId, ConstantId, Instr, InstrId, InstrKind, Value};

/// One compiled entry point: a named CFG whose first block in layout order is
/// the entry. The handler is the sole owner of its blocks and instructions.
#[derive(Debug, Clone)]
pub struct IRHandler {
    name: String,
    blocks: Vec<Option<BasicBlock>>,
    instrs: Vec<Option<Instr>>,
    layout: Vec<BlockId>,
    names: FastHashMap<String, usize>,
}

impl IRHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            instrs: Vec::new(),
            layout: Vec::new(),
            names: fast_hash_map_new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    /// Live blocks in program order.
    pub fn blocks(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn block_count(&self) -> usize {
        self.layout.len()
    }

    pub fn contains_block(&self, id: BlockId) -> bool {
        matches!(self.blocks.get(id.index()), Some(Some(_)))
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.blocks
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{id} is not a live block of handler {}", self.name))
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        let name = &self.name;
        self.blocks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{id} is not a live block of handler {name}"))
    }

    pub fn instr(&self, id: InstrId) -> &Instr {
        self.instrs
            .get(id.index())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{id} is not a live instruction of handler {}", self.name))
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instr {
        let name = &self.name;
        self.instrs
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{id} is not a live instruction of handler {name}"))
    }

    /// Every live instruction, block by block in layout order.
    pub fn instructions(&self) -> impl Iterator<Item = (InstrId, &Instr)> + '_ {
        self.layout
            .iter()
            .flat_map(move |b| self.block(*b).instrs.iter().map(move |i| (*i, self.instr(*i))))
    }

    pub fn instr_count(&self) -> usize {
        self.instrs.iter().filter(|i| i.is_some()).count()
    }

    /// Returns `base` if unused in this handler, otherwise `base` with the
    /// lowest numeric suffix that is free.
    pub(crate) fn unique_name(&mut self, base: &str) -> String {
        let base = if base.is_empty() { "tmp" } else { base };
        let Some(&last) = self.names.get(base) else {
            self.names.insert(base.to_owned(), 0);
            return base.to_owned();
        };
        let mut n = last;
        let name = loop {
            n += 1;
            let candidate = format!("{base}{n}");
            if !self.names.contains_key(&candidate) {
                break candidate;
            }
        };
        self.names.insert(base.to_owned(), n);
        self.names.insert(name.clone(), 0);
        name
    }

    pub fn create_block(&mut self, name: &str) -> BlockId {
        let name = self.unique_name(name);
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Some(BasicBlock::new(name)));
        self.layout.push(id);
        id
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstrId> {
        self.block(block).back().filter(|i| self.instr(*i).is_terminator())
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.terminator(block).is_some()
    }

    /// Appends `instr` to `block`; a terminator also links its successors.
    ///
    /// # Panics
    ///
    /// If `block` already ends in a terminator.
    pub fn push_instr(&mut self, block: BlockId, mut instr: Instr) -> InstrId {
        assert!(
            !self.is_terminated(block),
            "cannot insert `{}` into block {} of handler {}: block is already terminated",
            instr.mnemonic(),
            self.block(block).name,
            self.name
        );
        instr.parent = block;
        let successors = instr.successors();
        let id = InstrId::new(self.instrs.len());
        self.instrs.push(Some(instr));
        self.block_mut(block).instrs.push(id);
        for succ in successors {
            self.link_successor(block, succ);
        }
        id
    }

    pub fn link_successor(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).successors.push(to);
        self.block_mut(to).predecessors.push(from);
    }

    /// Removes one `from -> to` edge from both sides.
    pub fn unlink_successor(&mut self, from: BlockId, to: BlockId) {
        let succs = &mut self.block_mut(from).successors;
        if let Some(pos) = succs.iter().position(|b| *b == to) {
            succs.remove(pos);
        }
        let preds = &mut self.block_mut(to).predecessors;
        if let Some(pos) = preds.iter().position(|b| *b == from) {
            preds.remove(pos);
        }
    }

    /// Detaches an instruction from its block; a terminator also drops its edges.
    pub fn remove_instr(&mut self, id: InstrId) -> Instr {
        debug_assert!(
            self.instr(id).is_terminator() || self.uses(id) == 0,
            "removing {id} while it is still used"
        );
        let parent = self.instr(id).parent;
        let successors = self.instr(id).successors();
        for succ in successors {
            self.unlink_successor(parent, succ);
        }
        self.block_mut(parent).instrs.retain(|i| *i != id);
        self.instrs[id.index()]
            .take()
            .unwrap_or_else(|| panic!("{id} removed twice"))
    }

    /// Swaps the terminator of `block` for `instr`, rewiring edges accordingly.
    pub fn replace_terminator(&mut self, block: BlockId, instr: Instr) -> InstrId {
        if let Some(old) = self.terminator(block) {
            self.remove_instr(old);
        }
        self.push_instr(block, instr)
    }

    /// Retargets every edge `block -> old` onto `new` in both the terminator
    /// and the edge lists.
    pub fn retarget(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let Some(term) = self.terminator(block) else {
            return;
        };
        let n = self.instr_mut(term).replace_successor(old, new);
        for _ in 0..n {
            self.unlink_successor(block, old);
            self.link_successor(block, new);
        }
    }

    pub fn add_match_case(&mut self, instr: InstrId, label: ConstantId, target: BlockId) {
        let parent = self.instr(instr).parent;
        match &mut self.instr_mut(instr).kind {
            InstrKind::Match { cases, .. } => cases.push((label, target)),
            other => panic!("add_match_case on non-match instruction {other:?}"),
        }
        self.link_successor(parent, target);
    }

    pub fn set_match_else(&mut self, instr: InstrId, target: BlockId) {
        let parent = self.instr(instr).parent;
        let previous = match &mut self.instr_mut(instr).kind {
            InstrKind::Match { else_block, .. } => else_block.replace(target),
            other => panic!("set_match_else on non-match instruction {other:?}"),
        };
        if let Some(previous) = previous {
            self.unlink_successor(parent, previous);
        }
        self.link_successor(parent, target);
    }

    /// Deletes a block and everything in it. Outgoing edges are dropped; the
    /// block must no longer have predecessors.
    pub fn remove_block(&mut self, id: BlockId) {
        if let Some(term) = self.terminator(id) {
            self.remove_instr(term);
        }
        assert!(
            self.block(id).predecessors.is_empty(),
            "removing block {} of handler {} that still has predecessors",
            self.block(id).name,
            self.name
        );
        let block = self.blocks[id.index()]
            .take()
            .unwrap_or_else(|| panic!("{id} removed twice"));
        for instr in block.instrs {
            self.instrs[instr.index()] = None;
        }
        self.layout.retain(|b| *b != id);
    }

    /// Appends `next` onto `block`, replacing `block`'s terminator. `next` must
    /// be reached only from `block`; it is removed afterwards.
    pub fn merge_back(&mut self, block: BlockId, next: BlockId) {
        debug_assert_eq!(self.block(next).predecessors, vec![block]);
        if let Some(term) = self.terminator(block) {
            self.remove_instr(term);
        }
        let moved = std::mem::take(&mut self.block_mut(next).instrs);
        for instr in &moved {
            self.instr_mut(*instr).parent = block;
        }
        self.block_mut(block).instrs.extend(moved);
        let successors = std::mem::take(&mut self.block_mut(next).successors);
        for succ in successors {
            let preds = &mut self.block_mut(succ).predecessors;
            if let Some(pos) = preds.iter().position(|b| *b == next) {
                preds[pos] = block;
            }
            self.block_mut(block).successors.push(succ);
        }
        self.blocks[next.index()] = None;
        self.layout.retain(|b| *b != next);
    }

    /// True if `next` is laid out immediately after `block`.
    pub fn is_followed_by(&self, block: BlockId, next: BlockId) -> bool {
        self.layout
            .iter()
            .position(|b| *b == block)
            .is_some_and(|pos| self.layout.get(pos + 1) == Some(&next))
    }

    /// Moves `block` to position `index` in the program order.
    pub fn move_block(&mut self, block: BlockId, index: usize) {
        self.layout.retain(|b| *b != block);
        let index = index.min(self.layout.len());
        self.layout.insert(index, block);
    }

    /// Number of operand references to the result of `id`.
    pub fn uses(&self, id: InstrId) -> usize {
        self.instructions()
            .map(|(_, instr)| instr.operands.iter().filter(|v| **v == Value::Instr(id)).count())
            .sum()
    }

    pub fn replace_all_uses(&mut self, old: Value, new: Value) -> usize {
        let mut n = 0;
        for instr in self.instrs.iter_mut().flatten() {
            for operand in instr.operands.iter_mut().filter(|v| **v == old) {
                *operand = new;
                n += 1;
            }
        }
        n
    }

    pub fn type_of_instr(&self, id: InstrId) -> FlowType {
        self.instr(id).ty
    }

    /// Checks the CFG invariants every pass must preserve.
    pub fn verify(&self) -> Result<()> {
        ensure!(!self.layout.is_empty(), "handler {} has no blocks", self.name);
        for &id in &self.layout {
            let block = self.block(id);
            ensure!(!block.is_empty(), "{}: block {} is empty", self.name, block.name);
            for (pos, &instr_id) in block.instrs.iter().enumerate() {
                let instr = self.instr(instr_id);
                ensure!(
                    instr.parent == id,
                    "{}: {instr_id} is listed in {} but parented to {}",
                    self.name,
                    block.name,
                    instr.parent
                );
                let last = pos + 1 == block.instrs.len();
                if instr.is_terminator() != last {
                    if last {
                        bail!("{}: block {} does not end with a terminator", self.name, block.name);
                    }
                    bail!(
                        "{}: block {} has terminator `{}` before its end",
                        self.name,
                        block.name,
                        instr.mnemonic()
                    );
                }
            }

            let mut expected = block
                .back()
                .map(|t| self.instr(t).successors())
                .unwrap_or_default();
            let mut actual = block.successors.clone();
            expected.sort();
            actual.sort();
            ensure!(
                expected == actual,
                "{}: successors of {} are {actual:?} but its terminator targets {expected:?}",
                self.name,
                block.name
            );

            for &succ in &block.successors {
                ensure!(
                    self.contains_block(succ),
                    "{}: block {} branches to removed {succ}",
                    self.name,
                    block.name
                );
                let forward = block.successors.iter().filter(|b| **b == succ).count();
                let backward = self.block(succ).predecessors.iter().filter(|b| **b == id).count();
                ensure!(
                    forward == backward,
                    "{}: edge {} -> {} is not symmetric",
                    self.name,
                    block.name,
                    self.block(succ).name
                );
            }
            for &pred in &block.predecessors {
                ensure!(
                    self.contains_block(pred) && self.block(pred).successors.contains(&id),
                    "{}: block {} lists stale predecessor {pred}",
                    self.name,
                    block.name
                );
            }
        }
        Ok(())
    }

    fn fmt_instr(&self, f: &mut fmt::Formatter<'_>, id: InstrId) -> fmt::Result {
        let instr = self.instr(id);
        let name_of = |b: &BlockId| self.block(*b).name.clone();
        f.write_str("    ")?;
        if instr.ty != FlowType::Void {
            write!(f, "{id} = ")?;
        }
        write!(f, "{}", instr.mnemonic())?;
        match &instr.kind {
            InstrKind::Alloca | InstrKind::Cast => write!(f, " {}", instr.ty)?,
            InstrKind::Call(callee) => write!(f, " {callee}")?,
            InstrKind::HandlerCall(callee) => write!(f, " {callee}")?,
            InstrKind::Br { target } => write!(f, " {}", name_of(target))?,
            _ => {}
        }
        for (i, operand) in instr.operands.iter().enumerate() {
            write!(f, "{}{operand}", if i == 0 { " " } else { ", " })?;
        }
        match &instr.kind {
            InstrKind::CondBr { then_block, else_block } => {
                write!(f, ", {}, {}", name_of(then_block), name_of(else_block))?
            }
            InstrKind::Match {
                class,
                cases,
                else_block,
            } => {
                write!(f, " {class}")?;
                for (label, target) in cases {
                    write!(f, " [{label} -> {}]", name_of(target))?;
                }
                match else_block {
                    Some(b) => write!(f, " else {}", name_of(b))?,
                    None => f.write_str(" else <unset>")?,
                }
            }
            _ => {}
        }
        if !instr.name.is_empty() {
            write!(f, " ; {}", instr.name)?;
        }
        writeln!(f)
    }
}

impl fmt::Display for IRHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".handler {} ; {} blocks", self.name, self.layout.len())?;
        for &id in &self.layout {
            let block = self.block(id);
            let preds: Vec<&str> = block.predecessors.iter().map(|b| self.block(*b).name.as_str()).collect();
            writeln!(f, "  {}: ; {id}, preds: [{}]", block.name, preds.join(", "))?;
            for &instr in &block.instrs {
                self.fmt_instr(f, instr)?;
            }
        }
        Ok(())
    }
}
