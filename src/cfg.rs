//! Control-flow graph construction.
//!
//! Recursive descent over a function's node chain, dispatched by node kind.
//! Blocks live in an arena; edges are arena indices. The builder registers
//! every placed node against the block it first landed in, so join points
//! and loop back edges link to the existing block instead of re-traversing.

use crate::block::{Block, BlockId};
use crate::contract::FunctionIr;
use crate::ir::{Node, NodeId, NodeKind};
use std::collections::BTreeMap;

/// Which outgoing edge of the current block a continuation attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    True,
    False,
}

/// The block graph of one function.
#[derive(Debug, Clone)]
pub struct Cfg {
    pub contract: String,
    pub function: String,
    head: BlockId,
    blocks: Vec<Block>,
    node_blocks: BTreeMap<NodeId, BlockId>,
}

impl Cfg {
    pub fn head(&self) -> BlockId {
        self.head
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block a node was first placed in.
    pub fn block_of(&self, node: NodeId) -> Option<BlockId> {
        self.node_blocks.get(&node).copied()
    }

    /// `(block, true successor, false successor)` for every block, in id order.
    pub fn edges(&self) -> Vec<(BlockId, Option<BlockId>, Option<BlockId>)> {
        self.blocks
            .iter()
            .map(|b| (b.id, b.true_path, b.false_path))
            .collect()
    }

    /// Walk the enclosing-loop chain of `block`, innermost first.
    pub fn loop_chain(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut cur = self.block(block).enclosing_loop;
        while let Some(l) = cur {
            out.push(l);
            cur = self.block(l).enclosing_loop;
        }
        out
    }

    /// Blocks nested, at any depth, inside the loop headed by `header`.
    pub fn loop_body(&self, header: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .map(|b| b.id)
            .filter(|&b| self.loop_chain(b).contains(&header))
            .collect()
    }

    /// Forget traversal state so the graph can be executed again.
    pub fn reset_traversal(&mut self) {
        for b in &mut self.blocks {
            b.visited = false;
            b.reachability.clear();
        }
    }
}

pub struct CfgBuilder<'a> {
    contract: String,
    function: &'a FunctionIr,
    blocks: Vec<Block>,
    visited_nodes: BTreeMap<NodeId, BlockId>,
}

impl<'a> CfgBuilder<'a> {
    pub fn new(contract: &str, function: &'a FunctionIr) -> Self {
        Self {
            contract: contract.to_string(),
            function,
            blocks: Vec::new(),
            visited_nodes: BTreeMap::new(),
        }
    }

    pub fn build(mut self) -> Cfg {
        let head = self.alloc(None, None);
        if let Some(first) = self.function.first_instruction() {
            self.build_recursive(first, head, Side::True, &[]);
        }
        log::debug!(
            "{}.{}: {} blocks",
            self.contract,
            self.function.name,
            self.blocks.len()
        );
        Cfg {
            contract: self.contract,
            function: self.function.name.clone(),
            head,
            blocks: self.blocks,
            node_blocks: self.visited_nodes,
        }
    }

    fn node(&self, id: NodeId) -> Option<&'a Node> {
        let function: &'a FunctionIr = self.function;
        function.node(id)
    }

    fn alloc(&mut self, prev: Option<BlockId>, enclosing: Option<BlockId>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block::new(id, prev, enclosing));
        id
    }

    fn new_block(&mut self, current: BlockId, side: Side, loops: &[BlockId]) -> BlockId {
        let id = self.alloc(Some(current), loops.last().copied());
        self.wire(current, id, side);
        id
    }

    fn ends_with_two_way(&self, block: BlockId) -> bool {
        self.blocks[block.0]
            .last_instruction()
            .and_then(|n| self.node(n))
            .is_some_and(|n| n.kind.is_two_way())
    }

    /// A false-side continuation only lands on the false edge when the block
    /// closes with a condition; otherwise it is the plain successor.
    fn wire(&mut self, from: BlockId, to: BlockId, side: Side) {
        let false_edge = side == Side::False && self.ends_with_two_way(from);
        let b = &mut self.blocks[from.0];
        if false_edge {
            b.false_path = Some(to);
        } else {
            b.true_path = Some(to);
        }
    }

    fn add_instruction(&mut self, block: BlockId, node: &Node) {
        let b = &mut self.blocks[block.0];
        b.instructions.push(node.id);
        for name in &node.storage_read {
            b.add_storage_read(name);
        }
        for name in &node.storage_written {
            b.add_storage_written(name);
        }
        self.visited_nodes.entry(node.id).or_insert(block);
    }

    /// Closure markers are shared between paths and never registered.
    fn add_marker(&mut self, block: BlockId, side: Side, node: NodeId) {
        if side == Side::False && self.ends_with_two_way(block) {
            return;
        }
        self.blocks[block.0].instructions.push(node);
    }

    fn build_recursive(&mut self, id: NodeId, block: BlockId, side: Side, loops: &[BlockId]) {
        let Some(node) = self.node(id) else {
            log::warn!("{}: dangling node id {id}", self.function.name);
            return;
        };
        match node.kind {
            NodeKind::Branch => self.handle_branch(node, block, side, loops),
            NodeKind::BranchEnd => self.handle_branch_end(node, block, side, loops),
            NodeKind::LoopStart => self.handle_loop_start(node, block, side, loops),
            NodeKind::LoopCondition => self.handle_loop_condition(node, block, loops),
            _ => self.handle_default(node, block, side, loops),
        }
    }

    /// Move on to `next`. A loop condition that was already placed is a
    /// back edge; any other placed node is a join. Otherwise continue in
    /// `block`, or in a fresh block when `split` is set.
    fn follow(&mut self, next: NodeId, block: BlockId, side: Side, loops: &[BlockId], split: bool) {
        let Some(node) = self.node(next) else {
            log::warn!("{}: dangling successor {next}", self.function.name);
            return;
        };
        if node.kind == NodeKind::BranchEnd {
            self.build_recursive(next, block, side, loops);
            return;
        }
        if let Some(&target) = self.visited_nodes.get(&next) {
            self.wire(block, target, side);
            if node.kind == NodeKind::LoopCondition {
                if let Some(end) = node.son_false().and_then(|e| self.node(e)) {
                    if end.kind == NodeKind::LoopEnd {
                        self.add_marker(block, side, end.id);
                    }
                }
            }
            return;
        }
        if split {
            let nb = self.new_block(block, side, loops);
            self.build_recursive(next, nb, Side::True, loops);
        } else {
            self.build_recursive(next, block, side, loops);
        }
    }

    fn handle_branch(&mut self, node: &'a Node, block: BlockId, side: Side, loops: &[BlockId]) {
        let block = if side == Side::False && self.ends_with_two_way(block) {
            self.new_block(block, side, loops)
        } else {
            block
        };
        self.add_instruction(block, node);

        if let Some(t) = node.son_true() {
            let true_block = self.new_block(block, Side::True, loops);
            self.follow(t, true_block, Side::True, loops, false);
        }

        let Some(f) = node.son_false() else {
            return;
        };
        match self.node(f).map(|n| n.kind) {
            // no else: the continuation hangs off the branch block's false edge
            Some(NodeKind::BranchEnd) => self.build_recursive(f, block, Side::False, loops),
            _ => {
                let false_block = self.new_block(block, Side::False, loops);
                self.follow(f, false_block, Side::False, loops, false);
            }
        }
    }

    fn handle_branch_end(&mut self, node: &'a Node, block: BlockId, side: Side, loops: &[BlockId]) {
        self.add_marker(block, side, node.id);
        if let Some(next) = node.first_son() {
            self.follow(next, block, side, loops, true);
        }
    }

    fn handle_loop_start(&mut self, node: &'a Node, block: BlockId, side: Side, loops: &[BlockId]) {
        let header = self.new_block(block, side, loops);
        self.add_instruction(header, node);

        if let Some(init) = node.fathers.first().and_then(|&f| self.node(f)) {
            if self.function.is_loop_init(init) {
                self.add_instruction(header, init);
            }
        }

        let mut inner = loops.to_vec();
        inner.push(header);
        if let Some(next) = node.first_son() {
            self.build_recursive(next, header, Side::True, &inner);
        }
    }

    fn handle_loop_condition(&mut self, node: &'a Node, block: BlockId, loops: &[BlockId]) {
        self.add_instruction(block, node);

        let mut inner = loops.to_vec();
        if loops.last() != Some(&block) {
            inner.push(block);
        }
        let outer = &inner[..inner.len() - 1];

        if let Some(t) = node.son_true() {
            let body = self.new_block(block, Side::True, &inner);
            self.follow(t, body, Side::True, &inner, false);
        }

        let Some(end) = node.son_false().and_then(|f| self.node(f)) else {
            return;
        };
        let exit = self.new_block(block, Side::False, outer);
        if end.kind == NodeKind::LoopEnd {
            self.add_instruction(exit, end);
            if let Some(next) = end.first_son() {
                self.follow(next, exit, Side::True, outer, false);
            }
        } else {
            self.follow(end.id, exit, Side::True, outer, false);
        }
    }

    fn handle_default(&mut self, node: &'a Node, block: BlockId, side: Side, loops: &[BlockId]) {
        // the loop header block carries its own initializer
        if self.function.is_loop_init(node) {
            if let Some(start) = node.first_son() {
                self.build_recursive(start, block, side, loops);
            }
            return;
        }

        self.add_instruction(block, node);
        if matches!(node.kind, NodeKind::LoopEnd | NodeKind::Return) {
            return;
        }
        if let Some(next) = node.first_son() {
            self.follow(next, block, side, loops, false);
        }
    }
}
