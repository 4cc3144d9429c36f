//! Detected gas patterns.
//!
//! A [`Pattern`] holds live Z3 terms and is tied to its function's context;
//! [`Finding`] is the owned, serialisable rendering handed to the driver.

use crate::block::BlockId;
use crate::ir::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use z3::ast::Bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    RedundantCode,
    OpaquePredicate,
    ExpensiveOperationInLoop,
    LoopInvariantOperation,
    LoopInvariantCondition,
}

impl PatternKind {
    /// Catalogue number (3 was retired).
    pub fn number(self) -> u8 {
        match self {
            PatternKind::RedundantCode => 1,
            PatternKind::OpaquePredicate => 2,
            PatternKind::ExpensiveOperationInLoop => 4,
            PatternKind::LoopInvariantOperation => 5,
            PatternKind::LoopInvariantCondition => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PatternKind::RedundantCode => "REDUNDANT_CODE",
            PatternKind::OpaquePredicate => "OPAQUE_PREDICATE",
            PatternKind::ExpensiveOperationInLoop => "EXPENSIVE_OPERATION_IN_LOOP",
            PatternKind::LoopInvariantOperation => "LOOP_INVARIANT_OPERATION",
            PatternKind::LoopInvariantCondition => "LOOP_INVARIANT_CONDITION",
        }
    }

    /// Branch-level kinds; at most one of them is kept per block/instruction.
    pub fn is_branch_kind(self) -> bool {
        matches!(
            self,
            PatternKind::RedundantCode
                | PatternKind::OpaquePredicate
                | PatternKind::LoopInvariantCondition
        )
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One storage access flagged inside a loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccess {
    /// The access as written: `balances[msg.sender]`.
    pub raw_name: String,
    /// The storage variable behind it: `balances`.
    pub base_name: String,
    #[serde(skip)]
    pub index_refs: BTreeSet<String>,
}

/// One call to a loop-invariant pure function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub function: String,
    pub call_text: String,
    pub arguments: Vec<String>,
    #[serde(skip)]
    pub argument_refs: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub enum Detail<'ctx> {
    RedundantCode {
        condition: Bool<'ctx>,
        path_constraints: Vec<Bool<'ctx>>,
    },
    OpaquePredicate {
        condition: Bool<'ctx>,
        path_constraints: Vec<Bool<'ctx>>,
    },
    ExpensiveOperationInLoop {
        variables: Vec<StorageAccess>,
        loop_scope: BlockId,
    },
    LoopInvariantOperation {
        calls: Vec<CallSite>,
        loop_scope: BlockId,
    },
    LoopInvariantCondition {
        condition: Bool<'ctx>,
        condition_refs: BTreeSet<String>,
        loop_scope: BlockId,
    },
}

#[derive(Debug, Clone)]
pub struct Pattern<'ctx> {
    pub block: BlockId,
    pub instruction: NodeId,
    pub detail: Detail<'ctx>,
}

impl<'ctx> Pattern<'ctx> {
    pub fn kind(&self) -> PatternKind {
        match self.detail {
            Detail::RedundantCode { .. } => PatternKind::RedundantCode,
            Detail::OpaquePredicate { .. } => PatternKind::OpaquePredicate,
            Detail::ExpensiveOperationInLoop { .. } => PatternKind::ExpensiveOperationInLoop,
            Detail::LoopInvariantOperation { .. } => PatternKind::LoopInvariantOperation,
            Detail::LoopInvariantCondition { .. } => PatternKind::LoopInvariantCondition,
        }
    }

    pub fn loop_scope(&self) -> Option<BlockId> {
        match &self.detail {
            Detail::ExpensiveOperationInLoop { loop_scope, .. }
            | Detail::LoopInvariantOperation { loop_scope, .. }
            | Detail::LoopInvariantCondition { loop_scope, .. } => Some(*loop_scope),
            _ => None,
        }
    }

    /// Owned rendering; terms are printed in SMT-LIB form.
    pub fn to_finding(&self) -> Finding {
        let mut f = Finding {
            kind: self.kind(),
            pattern: self.kind().number(),
            block: self.block.0,
            instruction: self.instruction,
            source: None,
            condition: None,
            path_constraints: Vec::new(),
            variables: Vec::new(),
            calls: Vec::new(),
            loop_scope: self.loop_scope().map(|b| b.0),
        };
        match &self.detail {
            Detail::RedundantCode {
                condition,
                path_constraints,
            }
            | Detail::OpaquePredicate {
                condition,
                path_constraints,
            } => {
                f.condition = Some(condition.to_string());
                f.path_constraints = path_constraints.iter().map(|c| c.to_string()).collect();
            }
            Detail::ExpensiveOperationInLoop { variables, .. } => f.variables = variables.clone(),
            Detail::LoopInvariantOperation { calls, .. } => f.calls = calls.clone(),
            Detail::LoopInvariantCondition { condition, .. } => {
                f.condition = Some(condition.to_string())
            }
        }
        f
    }
}

impl fmt::Display for Pattern<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        writeln!(f, "-----PATTERN {}: {}-----", kind.number(), kind)?;
        writeln!(f, "Block: {}", self.block)?;
        writeln!(f, "Instruction: {}", self.instruction)?;
        match &self.detail {
            Detail::RedundantCode {
                condition,
                path_constraints,
            }
            | Detail::OpaquePredicate {
                condition,
                path_constraints,
            } => {
                writeln!(f, "Condition: {condition}")?;
                let pcs: Vec<String> = path_constraints.iter().map(|c| c.to_string()).collect();
                writeln!(f, "Path Constraints: [{}]", pcs.join(", "))
            }
            Detail::ExpensiveOperationInLoop { variables, loop_scope } => {
                let raw: Vec<&str> = variables.iter().map(|v| v.raw_name.as_str()).collect();
                writeln!(f, "Variables: [{}]", raw.join(", "))?;
                writeln!(f, "Current Scope: {loop_scope}")
            }
            Detail::LoopInvariantOperation { calls, loop_scope } => {
                let names: Vec<&str> = calls.iter().map(|c| c.call_text.as_str()).collect();
                writeln!(f, "Function calls: [{}]", names.join(", "))?;
                writeln!(f, "Current Scope: {loop_scope}")
            }
            Detail::LoopInvariantCondition {
                condition,
                loop_scope,
                ..
            } => {
                writeln!(f, "Condition: {condition}")?;
                writeln!(f, "Current Scope: {loop_scope}")
            }
        }
    }
}

/// Serialisable, context-free view of one pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: PatternKind,
    pub pattern: u8,
    pub block: usize,
    pub instruction: NodeId,
    /// Source text of the flagged node, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<StorageAccess>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallSite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_scope: Option<usize>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{} {} at B{}", self.pattern, self.kind, self.block)?;
        if let Some(src) = &self.source {
            write!(f, " `{src}`")?;
        }
        if !self.variables.is_empty() {
            let raw: Vec<&str> = self.variables.iter().map(|v| v.raw_name.as_str()).collect();
            write!(f, " storage: {}", raw.join(", "))?;
        }
        if !self.calls.is_empty() {
            let calls: Vec<&str> = self.calls.iter().map(|c| c.call_text.as_str()).collect();
            write!(f, " calls: {}", calls.join(", "))?;
        }
        if let Some(l) = self.loop_scope {
            write!(f, " (loop B{l})")?;
        }
        Ok(())
    }
}
