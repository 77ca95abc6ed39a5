//! §4.H — function: owns queues of blocks, padding-blocks, loops, entries,
//! exits, ranges and connected components, plus a call-graph node and a
//! link back to the function it was split out of (§4.I).

use crate::cfg::block::{Block, BlockId};
use crate::cfg::loop_::{Loop, LoopId};
use crate::interval::Interval;
use crate::pointer::InsnId;

/// Index of a [`Function`] within whatever arena the caller maintains
/// (disassembly and flow analysis, which populate functions in the first
/// place, are out of scope here — §1 — so this crate doesn't own that
/// arena itself; [`crate::cfg::extract::extract_function`] takes it as
/// `&mut Vec<Function>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub u32);

/// Placeholder for the call-graph node every function owns. Call-graph
/// construction itself is out of scope (§1); this exists only so synthetic
/// functions can be seen to attach one, matching every function
/// construction site in the modelled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallGraphNodeId(pub u32);

/// A maximal CFG connected component: its designated entry blocks (§4.I,
/// "Input: a function `f` with its component list populated"). The full
/// set of blocks it covers is not stored — it's exactly the set reachable
/// by DFS from `entries` over the owning function's current CFG, computed
/// on demand by [`crate::cfg::extract`]. The first component in
/// `Function::components` is always the *primary*, retained by the owning
/// function.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub entries: Vec<BlockId>,
}

impl Component {
    pub fn new(entries: Vec<BlockId>) -> Self {
        Component { entries }
    }
}

/// `{blocks, padding-blocks, loops, entries, exits, ranges,
/// connected-components, call-graph node, asmfile, original_function}`
/// (§3 "function"). `blocks`/`loops` are tombstoned (`Vec<Option<_>>`)
/// rather than plain `Vec`s: [`crate::cfg::extract`] needs to remove a
/// transplanted block or loop without shifting every later [`BlockId`]/
/// [`LoopId`] still held by a sibling's predecessor/successor list — the
/// same arena+stable-index trick [`crate::patch::PatchSession`] applies to
/// entries (Design Note §9).
#[derive(Debug, Clone)]
pub struct Function {
    id: u32,
    global_id: u32,
    name: String,
    first_insn: Option<InsnId>,
    original_function: Option<FunctionId>,
    blocks: Vec<Option<Block>>,
    loops: Vec<Option<Loop>>,
    padding_blocks: Vec<BlockId>,
    entries: Vec<BlockId>,
    exits: Vec<BlockId>,
    ranges: Vec<Interval>,
    components: Vec<Component>,
    call_graph_node: CallGraphNodeId,
}

impl Function {
    pub fn new(id: u32, global_id: u32, name: impl Into<String>, call_graph_node: CallGraphNodeId) -> Self {
        Function {
            id,
            global_id,
            name: name.into(),
            first_insn: None,
            original_function: None,
            blocks: Vec::new(),
            loops: Vec::new(),
            padding_blocks: Vec::new(),
            entries: Vec::new(),
            exits: Vec::new(),
            ranges: Vec::new(),
            components: Vec::new(),
            call_graph_node,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn global_id(&self) -> u32 {
        self.global_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn first_insn(&self) -> Option<InsnId> {
        self.first_insn
    }

    pub fn set_first_insn(&mut self, insn: InsnId) {
        self.first_insn = Some(insn);
    }

    pub fn original_function(&self) -> Option<FunctionId> {
        self.original_function
    }

    pub fn set_original_function(&mut self, f: Option<FunctionId>) {
        self.original_function = f;
    }

    pub fn call_graph_node(&self) -> CallGraphNodeId {
        self.call_graph_node
    }

    pub fn entries(&self) -> &[BlockId] {
        &self.entries
    }

    pub fn exits(&self) -> &[BlockId] {
        &self.exits
    }

    pub fn ranges(&self) -> &[Interval] {
        &self.ranges
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn padding_blocks(&self) -> &[BlockId] {
        &self.padding_blocks
    }

    pub fn set_entries(&mut self, entries: Vec<BlockId>) {
        self.entries = entries;
    }

    pub fn add_entry(&mut self, b: BlockId) {
        if !self.entries.contains(&b) {
            self.entries.push(b);
        }
    }

    pub fn add_exit(&mut self, b: BlockId) {
        if !self.exits.contains(&b) {
            self.exits.push(b);
        }
    }

    pub fn add_range(&mut self, range: Interval) {
        self.ranges.push(range);
    }

    pub fn set_components(&mut self, components: Vec<Component>) {
        self.components = components;
    }

    pub fn add_padding_block(&mut self, b: BlockId) {
        self.padding_blocks.push(b);
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize).and_then(|b| b.as_ref())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.0 as usize).and_then(|b| b.as_mut())
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.blocks.iter().enumerate().filter_map(|(i, b)| b.as_ref().map(|b| (BlockId(i as u32), b)))
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = (BlockId, &mut Block)> {
        self.blocks.iter_mut().enumerate().filter_map(|(i, b)| b.as_mut().map(|b| (BlockId(i as u32), b)))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_some()).count()
    }

    /// Appends `block` and returns its fresh, function-scoped id.
    pub fn push_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(block));
        id
    }

    /// Removes the block at `id`, leaving a tombstone so every other
    /// `BlockId` in this function stays valid.
    pub fn take_block(&mut self, id: BlockId) -> Option<Block> {
        self.blocks.get_mut(id.0 as usize).and_then(|slot| slot.take())
    }

    pub fn loop_(&self, id: LoopId) -> Option<&Loop> {
        self.loops.get(id.0 as usize).and_then(|l| l.as_ref())
    }

    pub fn loop_mut(&mut self, id: LoopId) -> Option<&mut Loop> {
        self.loops.get_mut(id.0 as usize).and_then(|l| l.as_mut())
    }

    pub fn loops(&self) -> impl Iterator<Item = (LoopId, &Loop)> {
        self.loops.iter().enumerate().filter_map(|(i, l)| l.as_ref().map(|l| (LoopId(i as u32), l)))
    }

    pub fn push_loop(&mut self, lp: Loop) -> LoopId {
        let id = LoopId(self.loops.len() as u32);
        self.loops.push(Some(lp));
        id
    }

    pub fn take_loop(&mut self, id: LoopId) -> Option<Loop> {
        self.loops.get_mut(id.0 as usize).and_then(|slot| slot.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_block_tombstones_without_shifting_others() {
        let mut f = Function::new(0, 0, "foo", CallGraphNodeId(0));
        let b0 = f.push_block(Block::new(0, 0x1000, 0x1010));
        let b1 = f.push_block(Block::new(1, 0x1010, 0x1020));
        f.take_block(b0);
        assert!(f.block(b0).is_none());
        assert!(f.block(b1).is_some());
        assert_eq!(f.block_count(), 1);
    }

    #[test]
    fn push_block_after_take_gets_a_new_id_not_a_reused_slot() {
        let mut f = Function::new(0, 0, "foo", CallGraphNodeId(0));
        let b0 = f.push_block(Block::new(0, 0x1000, 0x1010));
        f.take_block(b0);
        let b2 = f.push_block(Block::new(2, 0x2000, 0x2010));
        assert_ne!(b0, b2);
        assert_eq!(b2, BlockId(1));
    }
}
