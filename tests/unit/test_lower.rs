//! Statement lowering: node shapes, successor order and storage sets.

use gasprobe::expr::{AssignOp, BinaryOp, Expr, UnaryOp};
use gasprobe::ir::{NodeKind, Operation, TypeName};
use gasprobe::lower::{lower, lower_condition, storage_effects, Statement};
use std::collections::BTreeSet;

fn storage(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_entry_is_node_zero() {
    let (entry, nodes) = lower(&[], &storage(&[]));
    assert_eq!(entry, 0);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].kind, NodeKind::Entry);
    assert!(nodes[0].sons.is_empty());
}

#[test]
fn test_if_else_joins_at_closure() {
    let body = vec![
        Statement::If {
            condition: Expr::atom("c"),
            then: vec![Statement::Expr(Expr::atom("a"))],
            otherwise: vec![Statement::Expr(Expr::atom("b"))],
        },
        Statement::Return(None),
    ];
    let (_, nodes) = lower(&body, &storage(&[]));
    let branch = &nodes[1];
    assert_eq!(branch.kind, NodeKind::Branch);
    let then = &nodes[branch.sons[0]];
    let otherwise = &nodes[branch.sons[1]];
    assert_eq!(then.sons, otherwise.sons);
    let end = &nodes[then.sons[0]];
    assert_eq!(end.kind, NodeKind::BranchEnd);
    assert_eq!(end.fathers.len(), 2);
    assert_eq!(nodes[end.sons[0]].kind, NodeKind::Return);
}

#[test]
fn test_return_in_branch_does_not_reach_closure() {
    let body = vec![Statement::If {
        condition: Expr::atom("c"),
        then: vec![Statement::Return(None)],
        otherwise: vec![],
    }];
    let (_, nodes) = lower(&body, &storage(&[]));
    let end = nodes.iter().find(|n| n.kind == NodeKind::BranchEnd).unwrap();
    // only the empty else arm flows into the closure
    assert_eq!(end.fathers, vec![1]);
}

#[test]
fn test_while_loop_shape() {
    let body = vec![Statement::While {
        condition: Expr::binary(BinaryOp::Gt, Expr::atom("n"), Expr::val(0)),
        body: vec![Statement::Expr(Expr::unary(UnaryOp::Decrement, Expr::atom("n")))],
    }];
    let (_, nodes) = lower(&body, &storage(&[]));
    let kinds: Vec<NodeKind> = nodes.iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NodeKind::Entry,
            NodeKind::LoopStart,
            NodeKind::LoopCondition,
            NodeKind::Expression,
            NodeKind::LoopEnd,
        ]
    );
    // body loops back to the guard
    assert_eq!(nodes[3].sons, vec![2]);
    assert_eq!(nodes[2].sons, vec![3, 4]);
    assert!(!nodes[2].operations.is_empty());
}

#[test]
fn test_declaration_records_storage_reads() {
    let body = vec![Statement::Declare {
        name: "x".into(),
        ty: TypeName::uint(),
        value: Some(Expr::binary(BinaryOp::Add, Expr::atom("cap"), Expr::atom("y"))),
    }];
    let (_, nodes) = lower(&body, &storage(&["cap"]));
    assert_eq!(nodes[1].storage_read, storage(&["cap"]));
    assert!(nodes[1].storage_written.is_empty());
    assert_eq!(nodes[1].assigned_name(), Some("x"));
}

#[test]
fn test_condition_with_call_and_index() {
    let cond = Expr::binary(
        BinaryOp::Eq,
        Expr::call("f", vec![Expr::index(Expr::atom("m"), Expr::atom("k"))]),
        Expr::val(1),
    );
    let ops = lower_condition(&cond);
    let rendered: Vec<String> = ops.iter().map(|o| o.to_string()).collect();
    assert_eq!(
        rendered,
        vec![
            "REF_0 -> m[k]",
            "TMP_1 = INTERNAL_CALL f(TMP_0)",
            "TMP_2 = TMP_1 == 1",
            "CONDITION TMP_2",
        ]
    );
    assert!(matches!(ops.last(), Some(Operation::Condition { .. })));
}

#[test]
fn test_storage_effects_of_plain_assignment() {
    let e = Expr::assign(
        AssignOp::Assign,
        Expr::index(Expr::atom("owners"), Expr::atom("slot")),
        Expr::atom("who"),
    );
    let (read, written) = storage_effects(&e, &storage(&["owners", "slot"]));
    // the index is read, the base is only written
    assert_eq!(read, storage(&["slot"]));
    assert_eq!(written, storage(&["owners"]));
}
