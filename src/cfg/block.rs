//! §4.H — CFG block: a maximal straight-line instruction run, owning one
//! CFG graph node, one domination-tree node and one post-domination-tree
//! node (grounded on the original's `graph_node_t`/`cfg_node`, which carry
//! `in`/`out` edge lists directly on the block rather than a separate
//! graph structure).

use crate::cfg::loop_::LoopId;
use crate::pointer::InsnId;

/// Index of a [`Block`] within its owning [`crate::cfg::Function`]'s block
/// arena. Scoped to that one function, never file-wide (Design Note §9:
/// "Identifiers are unique ... per parent") — stable across the tombstoning
/// [`crate::cfg::Function::take_block`] does, so a sibling block's
/// predecessor/successor list never needs patching just because some other
/// block was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// `{first_insn, last_insn, predecessors, successors, loop, dom parent,
/// pdom parent}` (§4.H). A block with `first_insn == None` is a *virtual*
/// block (§4.I step 5): a synthetic join-point with no instructions.
#[derive(Debug, Clone)]
pub struct Block {
    global_id: u32,
    first_insn: Option<InsnId>,
    last_insn: Option<InsnId>,
    predecessors: Vec<BlockId>,
    successors: Vec<BlockId>,
    loop_id: Option<LoopId>,
    dom_parent: Option<BlockId>,
    pdom_parent: Option<BlockId>,
    /// Which padding-block group this block belongs to, if any — the
    /// original's padding flag, `-1` meaning "not a padding block"
    /// (§4.I step 5), represented here the way every other sentinel getter
    /// in this crate is: as `Option`.
    padding_group: Option<u32>,
}

impl Block {
    pub fn new(global_id: u32, first_insn: InsnId, last_insn: InsnId) -> Self {
        Block {
            global_id,
            first_insn: Some(first_insn),
            last_insn: Some(last_insn),
            predecessors: Vec::new(),
            successors: Vec::new(),
            loop_id: None,
            dom_parent: None,
            pdom_parent: None,
            padding_group: None,
        }
    }

    /// §4.I step 5: "Allocate a virtual block (no instructions, padding
    /// flag -1, fresh ids, new domination node, new CFG node)".
    pub fn new_virtual(global_id: u32) -> Self {
        Block {
            global_id,
            first_insn: None,
            last_insn: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
            loop_id: None,
            dom_parent: None,
            pdom_parent: None,
            padding_group: None,
        }
    }

    pub fn global_id(&self) -> u32 {
        self.global_id
    }

    pub fn is_virtual(&self) -> bool {
        self.first_insn.is_none()
    }

    pub fn first_insn(&self) -> Option<InsnId> {
        self.first_insn
    }

    pub fn last_insn(&self) -> Option<InsnId> {
        self.last_insn
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    pub fn predecessors_mut(&mut self) -> &mut Vec<BlockId> {
        &mut self.predecessors
    }

    pub fn successors_mut(&mut self) -> &mut Vec<BlockId> {
        &mut self.successors
    }

    pub fn add_successor(&mut self, to: BlockId) {
        if !self.successors.contains(&to) {
            self.successors.push(to);
        }
    }

    pub fn add_predecessor(&mut self, from: BlockId) {
        if !self.predecessors.contains(&from) {
            self.predecessors.push(from);
        }
    }

    pub fn remove_successor(&mut self, to: BlockId) {
        self.successors.retain(|&s| s != to);
    }

    pub fn remove_predecessor(&mut self, from: BlockId) {
        self.predecessors.retain(|&p| p != from);
    }

    pub fn loop_id(&self) -> Option<LoopId> {
        self.loop_id
    }

    pub fn set_loop_id(&mut self, loop_id: Option<LoopId>) {
        self.loop_id = loop_id;
    }

    pub fn dom_parent(&self) -> Option<BlockId> {
        self.dom_parent
    }

    pub fn set_dom_parent(&mut self, parent: Option<BlockId>) {
        self.dom_parent = parent;
    }

    pub fn pdom_parent(&self) -> Option<BlockId> {
        self.pdom_parent
    }

    pub fn set_pdom_parent(&mut self, parent: Option<BlockId>) {
        self.pdom_parent = parent;
    }

    pub fn padding_group(&self) -> Option<u32> {
        self.padding_group
    }

    pub fn set_padding_group(&mut self, group: Option<u32>) {
        self.padding_group = group;
    }

    /// Rewrites every `BlockId` this block references through `remap`,
    /// dropping references with no entry in it. Used when a block is
    /// transplanted into a new function's arena (§4.I step 4): its
    /// predecessors/successors/dom-tree parents were expressed in the old
    /// owning function's id space and must be translated to the new one.
    /// A dropped reference is exactly the "remove CFG edge ... to detach
    /// from f's virtual entry" case for edges *within* the moved block;
    /// the reverse edge (on the block staying behind) is cleaned up
    /// separately by the caller.
    pub fn remap_refs(&mut self, remap: &std::collections::HashMap<BlockId, BlockId>) {
        self.predecessors = self.predecessors.iter().filter_map(|b| remap.get(b).copied()).collect();
        self.successors = self.successors.iter().filter_map(|b| remap.get(b).copied()).collect();
        self.dom_parent = self.dom_parent.and_then(|b| remap.get(&b).copied());
        self.pdom_parent = self.pdom_parent.and_then(|b| remap.get(&b).copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_block_has_no_instructions() {
        let b = Block::new_virtual(7);
        assert!(b.is_virtual());
        assert_eq!(b.first_insn(), None);
        assert_eq!(b.padding_group(), None);
    }

    #[test]
    fn add_successor_is_idempotent() {
        let mut b = Block::new(0, 0x1000, 0x1010);
        b.add_successor(BlockId(3));
        b.add_successor(BlockId(3));
        assert_eq!(b.successors(), &[BlockId(3)]);
    }

    #[test]
    fn remap_refs_drops_unmapped_edges() {
        let mut b = Block::new(0, 0x1000, 0x1010);
        b.add_successor(BlockId(1));
        b.add_successor(BlockId(2));
        b.set_dom_parent(Some(BlockId(1)));
        let mut remap = std::collections::HashMap::new();
        remap.insert(BlockId(1), BlockId(10));
        b.remap_refs(&remap);
        assert_eq!(b.successors(), &[BlockId(10)]);
        assert_eq!(b.dom_parent(), Some(BlockId(10)));
    }
}
