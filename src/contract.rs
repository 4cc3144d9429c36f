//! Contract- and function-level front-end context.
//!
//! Everything the engine needs to know beyond the node graph: parameters,
//! storage layout, struct fields, and a call summary per callable function.

use crate::ir::{Node, NodeId, NodeKind, TypeName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A named, typed slot: function parameter or struct field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeName,
}

impl Parameter {
    pub fn new(name: &str, ty: TypeName) -> Self {
        Self {
            name: name.to_string(),
            ty,
        }
    }
}

/// A contract storage declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeName,
    #[serde(default)]
    pub value: Option<crate::expr::Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Parameter>,
}

/// Which kinds of calls a function body performs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSummary {
    pub internal: bool,
    /// Builtins such as `keccak256` or `require`.
    pub solidity: bool,
    pub low_level: bool,
    pub high_level: bool,
    pub library: bool,
}

impl CallSummary {
    pub fn any(&self) -> bool {
        self.internal || self.solidity || self.low_level || self.high_level || self.library
    }
}

/// One function ready for analysis: validated node arena plus its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionIr {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub pure: bool,
    #[serde(default)]
    pub calls: CallSummary,
    pub entry: NodeId,
    pub nodes: Vec<Node>,
}

impl FunctionIr {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// First node past the entry marker, where block construction starts.
    pub fn first_instruction(&self) -> Option<NodeId> {
        self.node(self.entry).and_then(Node::first_son)
    }

    /// A declaration or assignment feeding straight into a loop header whose
    /// condition reads the written name: the loop counter initializer.
    pub fn is_loop_init(&self, node: &Node) -> bool {
        if !matches!(node.kind, NodeKind::VariableDeclaration | NodeKind::Expression) {
            return false;
        }
        let Some(name) = node.assigned_name() else {
            return false;
        };
        let Some(start) = node.first_son().and_then(|id| self.node(id)) else {
            return false;
        };
        if start.kind != NodeKind::LoopStart {
            return false;
        }
        start
            .first_son()
            .and_then(|id| self.node(id))
            .is_some_and(|cond| {
                cond.kind == NodeKind::LoopCondition && cond.referenced_names().contains(name)
            })
    }

    /// Pure and free of nested calls: a call to it cannot observe loop state.
    pub fn is_side_effect_free(&self) -> bool {
        self.pure && !self.calls.any()
    }
}

/// One contract: storage layout, struct declarations, and functions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractIr {
    pub name: String,
    #[serde(default)]
    pub storage: Vec<StorageVariable>,
    #[serde(default)]
    pub structs: Vec<StructDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionIr>,
}

impl ContractIr {
    pub fn function(&self, name: &str) -> Option<&FunctionIr> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The function a call site names, by full name or by the segment after
    /// the last `.` (`this.rate` resolves to `rate`).
    pub fn resolve_callee(&self, callee: &str) -> Option<&FunctionIr> {
        let short = callee.rsplit('.').next().unwrap_or(callee);
        self.function(callee).or_else(|| self.function(short))
    }

    pub fn storage_variable(&self, name: &str) -> Option<&StorageVariable> {
        self.storage.iter().find(|v| v.name == name)
    }

    pub fn is_storage(&self, name: &str) -> bool {
        self.storage_variable(name).is_some()
    }

    pub fn storage_names(&self) -> BTreeSet<String> {
        self.storage.iter().map(|v| v.name.clone()).collect()
    }

    /// Declared type of `field` on the struct named by `ty`.
    pub fn field_type(&self, ty: &TypeName, field: &str) -> Option<&TypeName> {
        let TypeName::UserDefined(name) = ty else {
            return None;
        };
        self.structs
            .iter()
            .find(|s| &s.name == name)?
            .fields
            .iter()
            .find(|f| f.name == field)
            .map(|f| &f.ty)
    }
}
