//! Basic blocks of the control-flow graph.

use crate::ir::NodeId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Arena index of a block; monotonic in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Outcome of one branch decision taken while traversing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reach {
    pub true_feasible: bool,
    pub false_feasible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub id: BlockId,
    pub instructions: Vec<NodeId>,
    pub storage_read: BTreeMap<String, usize>,
    pub storage_written: BTreeMap<String, usize>,
    pub true_path: Option<BlockId>,
    pub false_path: Option<BlockId>,
    pub prev_block: Option<BlockId>,
    /// Set once a loop header's body has been traversed.
    pub visited: bool,
    pub reachability: Vec<Reach>,
    /// Innermost loop header this block was created under.
    pub enclosing_loop: Option<BlockId>,
}

impl Block {
    pub fn new(id: BlockId, prev_block: Option<BlockId>, enclosing_loop: Option<BlockId>) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            storage_read: BTreeMap::new(),
            storage_written: BTreeMap::new(),
            true_path: None,
            false_path: None,
            prev_block,
            visited: false,
            reachability: Vec::new(),
            enclosing_loop,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.true_path.is_none() && self.false_path.is_none()
    }

    pub fn last_instruction(&self) -> Option<NodeId> {
        self.instructions.last().copied()
    }

    pub fn add_storage_read(&mut self, name: &str) {
        *self.storage_read.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn add_storage_written(&mut self, name: &str) {
        *self.storage_written.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Some path found the true edge satisfiable here.
    pub fn true_edge_ever_feasible(&self) -> bool {
        self.reachability.iter().any(|r| r.true_feasible)
    }

    /// Some path found the false edge satisfiable here.
    pub fn false_edge_ever_feasible(&self) -> bool {
        self.reachability.iter().any(|r| r.false_feasible)
    }
}
