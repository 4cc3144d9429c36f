//! Structured statements → node graph.
//!
//! Lowers a nested statement body (`if`, `for`, `while`, declarations,
//! expression statements, returns) into the flat node arena the CFG builder
//! consumes, with branch/loop markers, `[true, false]` successor order on
//! two-way nodes, storage read/write sets, and three-address operations for
//! every condition.

use crate::expr::{AssignOp, Expr, UnaryOp};
use crate::ir::{Declaration, Node, NodeId, NodeKind, Operand, Operation, Temp, TypeName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A structured statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    Declare {
        name: String,
        #[serde(rename = "type")]
        ty: TypeName,
        #[serde(default)]
        value: Option<Expr>,
    },
    Expr(Expr),
    If {
        condition: Expr,
        #[serde(default)]
        then: Vec<Statement>,
        #[serde(default)]
        otherwise: Vec<Statement>,
    },
    For {
        #[serde(default)]
        init: Option<Box<Statement>>,
        condition: Expr,
        #[serde(default)]
        step: Option<Expr>,
        #[serde(default)]
        body: Vec<Statement>,
    },
    While {
        condition: Expr,
        #[serde(default)]
        body: Vec<Statement>,
    },
    Return(Option<Expr>),
}

/// Placeholder for a two-way successor slot not yet wired.
const UNLINKED: NodeId = usize::MAX;

/// Which successor slot of a node an edge occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Next,
    True,
    False,
}

type Exits = Vec<(NodeId, Edge)>;

struct Lowerer<'a> {
    storage: &'a BTreeSet<String>,
    nodes: Vec<Node>,
}

/// Lower a function body. Node 0 is the entry marker.
pub fn lower(statements: &[Statement], storage: &BTreeSet<String>) -> (NodeId, Vec<Node>) {
    let mut lw = Lowerer {
        storage,
        nodes: Vec::new(),
    };
    let entry = lw.push(NodeKind::Entry);
    lw.seq(statements, vec![(entry, Edge::Next)]);
    (entry, lw.nodes)
}

/// Flatten a condition into three-address operations ending in a
/// `Condition` marker.
pub fn lower_condition(condition: &Expr) -> Vec<Operation> {
    let mut ops = Vec::new();
    let mut next: Temp = 0;
    let value = operand(condition, &mut ops, &mut next);
    ops.push(Operation::Condition { value });
    ops
}

fn operand(e: &Expr, ops: &mut Vec<Operation>, next: &mut Temp) -> Operand {
    match e {
        Expr::Val(_) | Expr::Bool(_) => Operand::Lit(e.clone()),
        Expr::Atom(name) => Operand::Var(name.clone()),
        Expr::Index(base, index) => {
            let base = operand(base, ops, next);
            let index = operand(index, ops, next);
            let dest = fresh(next);
            ops.push(Operation::Index { dest, base, index });
            Operand::Temp(dest)
        }
        Expr::Member(base, member) => {
            let base = operand(base, ops, next);
            let dest = fresh(next);
            if member == "length" {
                ops.push(Operation::Length { dest, base });
            } else {
                ops.push(Operation::Member {
                    dest,
                    base,
                    member: member.clone(),
                });
            }
            Operand::Temp(dest)
        }
        Expr::Call(function, args) => {
            let args = args.iter().map(|a| operand(a, ops, next)).collect();
            let dest = fresh(next);
            ops.push(Operation::Call {
                dest,
                function: function.clone(),
                args,
            });
            Operand::Temp(dest)
        }
        Expr::Unary(op, inner) => {
            let operand = operand(inner, ops, next);
            let dest = fresh(next);
            ops.push(Operation::Unary {
                dest,
                operator: *op,
                operand,
            });
            Operand::Temp(dest)
        }
        Expr::Binary(op, l, r) => {
            let lhs = operand(l, ops, next);
            let rhs = operand(r, ops, next);
            let dest = fresh(next);
            ops.push(Operation::Binary {
                dest,
                operator: *op,
                lhs,
                rhs,
            });
            Operand::Temp(dest)
        }
        // An assignment used as a value yields its right-hand side.
        Expr::Assign(_, _, rhs) => {
            let value = operand(rhs, ops, next);
            let dest = fresh(next);
            ops.push(Operation::Assign { dest, value });
            Operand::Temp(dest)
        }
    }
}

fn fresh(next: &mut Temp) -> Temp {
    let t = *next;
    *next += 1;
    t
}

/// Storage variables read and written by an expression statement.
pub fn storage_effects(e: &Expr, storage: &BTreeSet<String>) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut read = BTreeSet::new();
    let mut written = BTreeSet::new();
    match e {
        Expr::Assign(op, lhs, rhs) => {
            read.extend(rhs.identifiers());
            for idx in lhs.access_indices() {
                read.extend(idx.identifiers());
            }
            if let Some(base) = lhs.base_identifier() {
                written.insert(base.to_string());
                if *op != AssignOp::Assign {
                    read.insert(base.to_string());
                }
            }
        }
        Expr::Unary(UnaryOp::Increment | UnaryOp::Decrement, target) => {
            read.extend(target.identifiers());
            if let Some(base) = target.base_identifier() {
                written.insert(base.to_string());
            }
        }
        _ => read.extend(e.identifiers()),
    }
    read.retain(|n| storage.contains(n));
    written.retain(|n| storage.contains(n));
    (read, written)
}

impl Lowerer<'_> {
    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new(id, kind);
        if kind.is_two_way() {
            node.sons = vec![UNLINKED, UNLINKED];
        }
        self.nodes.push(node);
        id
    }

    fn link(&mut self, (from, edge): (NodeId, Edge), to: NodeId) {
        match edge {
            Edge::Next => self.nodes[from].sons.push(to),
            Edge::True => self.nodes[from].sons[0] = to,
            Edge::False => self.nodes[from].sons[1] = to,
        }
        self.nodes[to].fathers.push(from);
    }

    fn link_all(&mut self, exits: Exits, to: NodeId) {
        for exit in exits {
            self.link(exit, to);
        }
    }

    fn seq(&mut self, statements: &[Statement], mut exits: Exits) -> Exits {
        for stmt in statements {
            exits = self.statement(stmt, exits);
        }
        exits
    }

    fn conditional(&mut self, kind: NodeKind, condition: &Expr) -> NodeId {
        let id = self.push(kind);
        let (read, _) = storage_effects(condition, self.storage);
        let node = &mut self.nodes[id];
        node.operations = lower_condition(condition);
        node.expression = Some(condition.clone());
        node.storage_read = read;
        id
    }

    fn statement(&mut self, stmt: &Statement, exits: Exits) -> Exits {
        match stmt {
            Statement::Declare { name, ty, value } => {
                let id = self.push(NodeKind::VariableDeclaration);
                let read = value
                    .as_ref()
                    .map(|v| storage_effects(v, self.storage).0)
                    .unwrap_or_default();
                let node = &mut self.nodes[id];
                node.declaration = Some(Declaration {
                    name: name.clone(),
                    ty: ty.clone(),
                    value: value.clone(),
                });
                node.storage_read = read;
                self.link_all(exits, id);
                vec![(id, Edge::Next)]
            }
            Statement::Expr(e) => {
                let id = self.expression(NodeKind::Expression, e);
                self.link_all(exits, id);
                vec![(id, Edge::Next)]
            }
            Statement::Return(value) => {
                let id = self.push(NodeKind::Return);
                if let Some(v) = value {
                    let (read, _) = storage_effects(v, self.storage);
                    self.nodes[id].expression = Some(v.clone());
                    self.nodes[id].storage_read = read;
                }
                self.link_all(exits, id);
                vec![]
            }
            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = self.conditional(NodeKind::Branch, condition);
                self.link_all(exits, branch);
                let mut joined = self.seq(then, vec![(branch, Edge::True)]);
                joined.extend(self.seq(otherwise, vec![(branch, Edge::False)]));
                let end = self.push(NodeKind::BranchEnd);
                self.link_all(joined, end);
                vec![(end, Edge::Next)]
            }
            Statement::For {
                init,
                condition,
                step,
                body,
            } => {
                let exits = match init {
                    Some(init) => self.statement(init, exits),
                    None => exits,
                };
                self.lower_loop(exits, condition, body, step.as_ref())
            }
            Statement::While { condition, body } => self.lower_loop(exits, condition, body, None),
        }
    }

    fn expression(&mut self, kind: NodeKind, e: &Expr) -> NodeId {
        let id = self.push(kind);
        let (read, written) = storage_effects(e, self.storage);
        let node = &mut self.nodes[id];
        node.expression = Some(e.clone());
        node.storage_read = read;
        node.storage_written = written;
        id
    }

    fn lower_loop(
        &mut self,
        exits: Exits,
        condition: &Expr,
        body: &[Statement],
        step: Option<&Expr>,
    ) -> Exits {
        let start = self.push(NodeKind::LoopStart);
        self.link_all(exits, start);
        let cond = self.conditional(NodeKind::LoopCondition, condition);
        self.link((start, Edge::Next), cond);

        let mut tail = self.seq(body, vec![(cond, Edge::True)]);
        if let Some(step) = step {
            let id = self.expression(NodeKind::Expression, step);
            self.link_all(tail, id);
            tail = vec![(id, Edge::Next)];
        }
        self.link_all(tail, cond);

        let end = self.push(NodeKind::LoopEnd);
        self.link((cond, Edge::False), end);
        vec![(end, Edge::Next)]
    }
}
