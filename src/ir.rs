//! Front-end intermediate representation.
//!
//! One function arrives as an arena of nodes in the shape a Solidity static
//! analyser emits: explicit branch/loop markers, successor and predecessor
//! ids, the storage variables each node touches, and, for conditions, a
//! typed three-address operation list.

use crate::expr::{BinaryOp, Expr, UnaryOp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Index of a node inside its function's arena.
pub type NodeId = usize;
/// Number of a three-address temporary (`TMP_n`).
pub type Temp = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Entry,
    /// `if (cond)`; successors are `[true, false]`.
    Branch,
    /// Closure of a branch (`END_IF`).
    BranchEnd,
    /// Loop header (`BEGIN_LOOP`); its predecessor may be the initializer.
    LoopStart,
    /// Loop guard (`IF_LOOP`); successors are `[body, closure]`.
    LoopCondition,
    /// Loop closure (`END_LOOP`).
    LoopEnd,
    VariableDeclaration,
    Expression,
    Return,
    Other,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Entry => "ENTRY_POINT",
            NodeKind::Branch => "IF",
            NodeKind::BranchEnd => "END_IF",
            NodeKind::LoopStart => "BEGIN_LOOP",
            NodeKind::LoopCondition => "IF_LOOP",
            NodeKind::LoopEnd => "END_LOOP",
            NodeKind::VariableDeclaration => "NEW VARIABLE",
            NodeKind::Expression => "EXPRESSION",
            NodeKind::Return => "RETURN",
            NodeKind::Other => "OTHER",
        }
    }

    /// Kinds whose node carries two ordered successors.
    pub fn is_two_way(self) -> bool {
        matches!(self, NodeKind::Branch | NodeKind::LoopCondition)
    }
}

/// Tag used by the symbolic table to decide how accesses are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Primitive,
    Array,
    Mapping,
}

/// Declared type of a variable, parameter, or struct field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeName {
    /// `uint256`, `bool`, `address`, `bytes32`, …
    Elementary(String),
    Array(Box<TypeName>),
    Mapping(Box<TypeName>, Box<TypeName>),
    /// A struct, enum, or contract type referenced by name.
    UserDefined(String),
}

impl TypeName {
    pub fn elementary(name: &str) -> Self {
        TypeName::Elementary(name.to_string())
    }

    pub fn uint() -> Self {
        TypeName::elementary("uint256")
    }

    pub fn array_of(inner: TypeName) -> Self {
        TypeName::Array(Box::new(inner))
    }

    pub fn mapping(key: TypeName, value: TypeName) -> Self {
        TypeName::Mapping(Box::new(key), Box::new(value))
    }

    pub fn symbol_type(&self) -> SymbolType {
        match self {
            TypeName::Array(_) => SymbolType::Array,
            TypeName::Mapping(..) => SymbolType::Mapping,
            _ => SymbolType::Primitive,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, TypeName::Elementary(n) if n == "bool")
    }

    /// Elementary value types whose uninitialised value is zero.
    pub fn has_zero_default(&self) -> bool {
        match self {
            TypeName::Elementary(n) => {
                n == "bool"
                    || n == "address"
                    || n.starts_with("uint")
                    || n.starts_with("int")
                    || (n.starts_with("bytes") && n.len() > 5)
            }
            _ => false,
        }
    }

    /// Element type for arrays, value type for mappings.
    pub fn element(&self) -> Option<&TypeName> {
        match self {
            TypeName::Array(inner) => Some(inner),
            TypeName::Mapping(_, value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Elementary(n) | TypeName::UserDefined(n) => write!(f, "{n}"),
            TypeName::Array(inner) => write!(f, "{inner}[]"),
            TypeName::Mapping(k, v) => write!(f, "mapping({k} => {v})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Three-address operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Temp(Temp),
    /// A literal (`Expr::Val` or `Expr::Bool`).
    Lit(Expr),
    Var(String),
}

impl Operand {
    pub fn var(name: &str) -> Self {
        Operand::Var(name.to_string())
    }

    pub fn num(v: u64) -> Self {
        Operand::Lit(Expr::val(v))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp(t) => write!(f, "TMP_{t}"),
            Operand::Lit(e) => write!(f, "{e}"),
            Operand::Var(v) => write!(f, "{v}"),
        }
    }
}

/// One three-address operation of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Binary {
        dest: Temp,
        operator: BinaryOp,
        lhs: Operand,
        rhs: Operand,
    },
    Unary {
        dest: Temp,
        operator: UnaryOp,
        operand: Operand,
    },
    Assign {
        dest: Temp,
        value: Operand,
    },
    /// Dereference `base[index]`.
    Index {
        dest: Temp,
        base: Operand,
        index: Operand,
    },
    /// Dereference `base.member`.
    Member {
        dest: Temp,
        base: Operand,
        member: String,
    },
    /// `base.length`
    Length {
        dest: Temp,
        base: Operand,
    },
    Call {
        dest: Temp,
        function: String,
        #[serde(default)]
        args: Vec<Operand>,
    },
    /// Marks the temporary holding the branch's boolean result.
    Condition {
        value: Operand,
    },
}

impl Operation {
    pub fn dest(&self) -> Option<Temp> {
        match self {
            Operation::Binary { dest, .. }
            | Operation::Unary { dest, .. }
            | Operation::Assign { dest, .. }
            | Operation::Index { dest, .. }
            | Operation::Member { dest, .. }
            | Operation::Length { dest, .. }
            | Operation::Call { dest, .. } => Some(*dest),
            Operation::Condition { .. } => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Binary { dest, operator, lhs, rhs } => {
                write!(f, "TMP_{dest} = {lhs} {} {rhs}", operator.symbol())
            }
            Operation::Unary { dest, operator, operand } => {
                write!(f, "TMP_{dest} = {} {operand}", operator.symbol())
            }
            Operation::Assign { dest, value } => write!(f, "TMP_{dest} := {value}"),
            Operation::Index { dest, base, index } => write!(f, "REF_{dest} -> {base}[{index}]"),
            Operation::Member { dest, base, member } => write!(f, "REF_{dest} -> {base}.{member}"),
            Operation::Length { dest, base } => write!(f, "REF_{dest} -> LENGTH {base}"),
            Operation::Call { dest, function, args } => {
                write!(f, "TMP_{dest} = INTERNAL_CALL {function}(")?;
                for (n, a) in args.iter().enumerate() {
                    if n > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Operation::Condition { value } => write!(f, "CONDITION {value}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeName,
    #[serde(default)]
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub sons: Vec<NodeId>,
    #[serde(default)]
    pub fathers: Vec<NodeId>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub declaration: Option<Declaration>,
    #[serde(default)]
    pub expression: Option<Expr>,
    #[serde(default)]
    pub storage_read: BTreeSet<String>,
    #[serde(default)]
    pub storage_written: BTreeSet<String>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            sons: Vec::new(),
            fathers: Vec::new(),
            operations: Vec::new(),
            declaration: None,
            expression: None,
            storage_read: BTreeSet::new(),
            storage_written: BTreeSet::new(),
        }
    }

    pub fn first_son(&self) -> Option<NodeId> {
        self.sons.first().copied()
    }

    pub fn son_true(&self) -> Option<NodeId> {
        self.sons.first().copied()
    }

    pub fn son_false(&self) -> Option<NodeId> {
        self.sons.get(1).copied()
    }

    /// Whether the node reads or writes the storage variable `name`.
    pub fn touches_storage(&self, name: &str) -> bool {
        self.storage_read.contains(name) || self.storage_written.contains(name)
    }

    /// Name a declaration or assignment statement writes.
    pub fn assigned_name(&self) -> Option<&str> {
        if let Some(decl) = &self.declaration {
            return Some(&decl.name);
        }
        match &self.expression {
            Some(Expr::Assign(_, lhs, _)) => lhs.base_identifier(),
            Some(Expr::Unary(UnaryOp::Increment | UnaryOp::Decrement, target)) => {
                target.base_identifier()
            }
            _ => None,
        }
    }

    /// Identifiers the node mentions, falling back to operation operands
    /// when no source expression was supplied.
    pub fn referenced_names(&self) -> BTreeSet<String> {
        if let Some(e) = &self.expression {
            return e.identifiers();
        }
        if let Some(v) = self.declaration.as_ref().and_then(|d| d.value.as_ref()) {
            return v.identifiers();
        }
        let mut out = BTreeSet::new();
        for op in &self.operations {
            let operands: Vec<&Operand> = match op {
                Operation::Binary { lhs, rhs, .. } => vec![lhs, rhs],
                Operation::Unary { operand, .. } => vec![operand],
                Operation::Assign { value, .. } | Operation::Condition { value } => vec![value],
                Operation::Index { base, index, .. } => vec![base, index],
                Operation::Member { base, .. } | Operation::Length { base, .. } => vec![base],
                Operation::Call { args, .. } => args.iter().collect(),
            };
            for o in operands {
                if let Operand::Var(v) = o {
                    out.insert(v.clone());
                }
            }
        }
        out
    }

    /// Source text of the statement or condition, when the node has one.
    pub fn source(&self) -> Option<String> {
        if let Some(decl) = &self.declaration {
            return Some(match &decl.value {
                Some(v) => format!("{} {} = {v}", decl.ty, decl.name),
                None => format!("{} {}", decl.ty, decl.name),
            });
        }
        self.expression.as_ref().map(|e| e.to_string())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.name())?;
        if let Some(src) = self.source() {
            write!(f, " {src}")?;
        }
        Ok(())
    }
}
