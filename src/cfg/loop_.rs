//! §4.H — CFG loop: owns a set of blocks, its entry/exit block lists, the
//! paths through it, and a hierarchy-tree node.

use crate::cfg::block::BlockId;
use std::collections::HashMap;

/// Index of a [`Loop`] within its owning [`crate::cfg::Function`]'s loop
/// arena — scoped to that function, the same way [`BlockId`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(pub u32);

/// `{entries, exits, blocks, hierarchy node}` (§4.H). The hierarchy node is
/// a parent pointer (`Option<LoopId>`): nested loops form a tree, the same
/// representation chosen for the block domination tree, rather than a
/// general graph.
#[derive(Debug, Clone)]
pub struct Loop {
    global_id: u32,
    entries: Vec<BlockId>,
    exits: Vec<BlockId>,
    blocks: Vec<BlockId>,
    paths: Vec<Vec<BlockId>>,
    parent: Option<LoopId>,
}

impl Loop {
    pub fn new(global_id: u32) -> Self {
        Loop { global_id, entries: Vec::new(), exits: Vec::new(), blocks: Vec::new(), paths: Vec::new(), parent: None }
    }

    pub fn global_id(&self) -> u32 {
        self.global_id
    }

    pub fn entries(&self) -> &[BlockId] {
        &self.entries
    }

    pub fn exits(&self) -> &[BlockId] {
        &self.exits
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn paths(&self) -> &[Vec<BlockId>] {
        &self.paths
    }

    pub fn parent(&self) -> Option<LoopId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<LoopId>) {
        self.parent = parent;
    }

    pub fn add_block(&mut self, b: BlockId) {
        if !self.blocks.contains(&b) {
            self.blocks.push(b);
        }
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

    pub fn add_path(&mut self, path: Vec<BlockId>) {
        self.paths.push(path);
    }

    /// Rewrites every `BlockId` this loop references through `remap` — used
    /// when the loop is moved to a new function's arena during CC
    /// extraction (§4.I step 4) and its blocks get fresh, function-scoped
    /// ids there.
    pub fn remap_blocks(&mut self, remap: &HashMap<BlockId, BlockId>) {
        for b in self.entries.iter_mut().chain(self.exits.iter_mut()).chain(self.blocks.iter_mut()) {
            if let Some(&new_id) = remap.get(b) {
                *b = new_id;
            }
        }
        for path in self.paths.iter_mut() {
            for b in path.iter_mut() {
                if let Some(&new_id) = remap.get(b) {
                    *b = new_id;
                }
            }
        }
    }
}
