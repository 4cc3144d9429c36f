//! Pattern matcher: individual detectors, merging, dedup and pruning.

use gasprobe::block::{BlockId, Reach};
use gasprobe::cfg::{Cfg, CfgBuilder};
use gasprobe::contract::{ContractIr, FunctionIr};
use gasprobe::expr::Expr;
use gasprobe::ir::{Node, NodeKind, TypeName};
use gasprobe::lower::{lower, Statement};
use gasprobe::matcher::PatternMatcher;
use gasprobe::patterns::{Detail, PatternKind};
use gasprobe::symbolic::{Scope, SymbolicTable};
use std::collections::BTreeSet;
use z3::ast::{Ast, Bool, Dynamic, Int};
use z3::{Config, Context, SatResult};

fn names(set: &[&str]) -> BTreeSet<String> {
    set.iter().map(|s| s.to_string()).collect()
}

fn function(name: &str, pure: bool, body: Vec<Statement>) -> FunctionIr {
    let (entry, nodes) = lower(&body, &BTreeSet::new());
    FunctionIr {
        name: name.into(),
        parameters: vec![],
        pure,
        calls: Default::default(),
        entry,
        nodes,
    }
}

fn contract() -> ContractIr {
    ContractIr {
        name: "Vault".into(),
        functions: vec![
            function("rate", true, vec![Statement::Return(Some(Expr::val(3)))]),
            function("bump", false, vec![]),
        ],
        ..Default::default()
    }
}

fn one_block(f: &FunctionIr) -> Cfg {
    CfgBuilder::new("Vault", f).build()
}

fn call_node(id: usize) -> Node {
    Node::new(id, NodeKind::Expression)
}

#[test]
fn test_p5_resolves_qualified_callee() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let c = contract();
    let table = SymbolicTable::new(&ctx);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let loops = [BlockId(1)];

    let call = Expr::call("this.rate", vec![]);
    m.p5_loop_invariant_operation(BlockId(2), &call_node(4), &call, &table, &loops, &c);
    assert_eq!(m.patterns().len(), 1);
    let Detail::LoopInvariantOperation { calls, loop_scope } = &m.patterns()[0].detail else {
        panic!("expected P5");
    };
    assert_eq!(calls[0].function, "rate");
    assert_eq!(calls[0].call_text, "this.rate()");
    assert_eq!(*loop_scope, BlockId(1));
}

#[test]
fn test_p5_skips_impure_unknown_and_outside_loop() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let c = contract();
    let table = SymbolicTable::new(&ctx);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let node = call_node(4);

    m.p5_loop_invariant_operation(BlockId(2), &node, &Expr::call("bump", vec![]), &table, &[BlockId(1)], &c);
    m.p5_loop_invariant_operation(BlockId(2), &node, &Expr::call("keccak", vec![]), &table, &[BlockId(1)], &c);
    m.p5_loop_invariant_operation(BlockId(2), &node, &Expr::call("rate", vec![]), &table, &[], &c);
    assert!(m.patterns().is_empty());
    assert_eq!(m.candidate_count(), 0);
}

#[test]
fn test_p5_merges_calls_on_one_instruction() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let c = contract();
    let table = SymbolicTable::new(&ctx);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let node = call_node(4);
    let loops = [BlockId(1)];

    let a = Expr::call("rate", vec![Expr::atom("x")]);
    let b = Expr::call("rate", vec![Expr::atom("y")]);
    for call in [&a, &a, &b] {
        m.p5_loop_invariant_operation(BlockId(2), &node, call, &table, &loops, &c);
    }
    let patterns = m.into_patterns();
    assert_eq!(patterns.len(), 1);
    let Detail::LoopInvariantOperation { calls, .. } = &patterns[0].detail else {
        panic!("expected P5");
    };
    let texts: Vec<&str> = calls.iter().map(|c| c.call_text.as_str()).collect();
    assert_eq!(texts, vec!["rate(x)", "rate(y)"]);
}

#[test]
fn test_p6_sees_loop_term_behind_alias() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut table = SymbolicTable::new(&ctx);
    let header = BlockId(1);
    table.push_symbol("i", &TypeName::uint(), Scope::Loop(header));
    let i_term = Dynamic::from_ast(&Int::new_const(&ctx, "i!1"));
    table.havoc("i", i_term.clone());

    // `limit` was copied from `i` on some earlier path; the condition names
    // only `limit` but its term is the counter
    let cond = i_term.as_int().unwrap().gt(&Int::from_u64(&ctx, 3));
    let mut m = PatternMatcher::new(&ctx, 1_000);
    m.p6_loop_invariant_condition(BlockId(3), 7, &cond, &names(&["limit"]), &table, &[header]);
    assert!(m.patterns().is_empty());
}

#[test]
fn test_branch_kinds_dedup_per_block() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let table = SymbolicTable::new(&ctx);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let f = Bool::from_bool(&ctx, false);
    assert!(!m.p1_redundant_code(BlockId(4), 9, &f, &[], true));
    let cond = Int::new_const(&ctx, "cap").gt(&Int::from_u64(&ctx, 1));
    m.p6_loop_invariant_condition(BlockId(4), 9, &cond, &names(&["cap"]), &table, &[BlockId(1)]);
    assert_eq!(m.patterns().len(), 1);
    assert_eq!(m.patterns()[0].kind(), PatternKind::RedundantCode);
    assert_eq!(m.candidate_count(), 2);
}

#[test]
fn test_p1_unrecorded_probe() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let f = Bool::from_bool(&ctx, false);
    assert!(!m.p1_redundant_code(BlockId(0), 1, &f, &[], false));
    assert!(m.patterns().is_empty());
}

#[test]
fn test_p2_satisfiable_negation_is_not_opaque() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let x = Int::new_const(&ctx, "x");
    let pc = vec![x.gt(&Int::from_u64(&ctx, 1))];
    let cond = x.gt(&Int::from_u64(&ctx, 5));
    assert_eq!(m.p2_opaque_predicate(BlockId(0), 1, &cond, &pc, true), SatResult::Sat);
    assert!(m.patterns().is_empty());
}

#[test]
fn test_check_leaves_solver_clean() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let m = PatternMatcher::new(&ctx, 1_000);
    let x = Int::new_const(&ctx, "x");
    let pc = vec![x._eq(&Int::from_u64(&ctx, 1))];
    assert_eq!(m.check(&pc, &x._eq(&Int::from_u64(&ctx, 2))), SatResult::Unsat);
    // earlier assertions were popped
    assert_eq!(m.check(&[], &x._eq(&Int::from_u64(&ctx, 2))), SatResult::Sat);
}

#[test]
fn test_reachability_prunes_redundant_code() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let f = function("f", false, vec![Statement::Expr(Expr::atom("a"))]);
    let mut graph = one_block(&f);
    let head = graph.head();

    let mut m = PatternMatcher::new(&ctx, 1_000);
    let never = Bool::from_bool(&ctx, false);
    m.p1_redundant_code(head, 1, &never, &[], true);
    m.remove_false_positives(&graph);
    assert_eq!(m.patterns().len(), 1);

    // a later path found the true edge feasible
    graph.block_mut(head).reachability.push(Reach {
        true_feasible: true,
        false_feasible: false,
    });
    m.remove_false_positives(&graph);
    assert!(m.patterns().is_empty());
}

#[test]
fn test_reachability_prunes_opaque_predicate() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let f = function("f", false, vec![Statement::Expr(Expr::atom("a"))]);
    let mut graph = one_block(&f);
    let head = graph.head();

    let mut m = PatternMatcher::new(&ctx, 1_000);
    let always = Bool::from_bool(&ctx, true);
    assert_eq!(m.p2_opaque_predicate(head, 1, &always, &[], true), SatResult::Unsat);
    graph.block_mut(head).reachability.push(Reach {
        true_feasible: true,
        false_feasible: true,
    });
    m.remove_false_positives(&graph);
    assert!(m.patterns().is_empty());
}

#[test]
fn test_ledger_drops_only_stale_entries() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let f = function("f", false, vec![]);
    let graph = one_block(&f);
    let table = SymbolicTable::new(&ctx);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let loops = [BlockId(0)];

    let mut node = Node::new(5, NodeKind::Expression);
    node.storage_read = names(&["arr", "total"]);
    let by_j = Expr::index(Expr::atom("arr"), Expr::atom("j"));
    m.p4_expensive_operation_in_loop(BlockId(0), &node, &by_j, &table, &loops);
    m.p4_expensive_operation_in_loop(BlockId(0), &node, &Expr::atom("total"), &table, &loops);

    m.record_loop_binding(BlockId(0), "j");
    assert_eq!(m.ledger()[&BlockId(0)], names(&["j"]));
    m.remove_false_positives(&graph);

    let Detail::ExpensiveOperationInLoop { variables, .. } = &m.patterns()[0].detail else {
        panic!("expected P4");
    };
    let raw: Vec<&str> = variables.iter().map(|v| v.raw_name.as_str()).collect();
    assert_eq!(raw, vec!["total"]);
}

#[test]
fn test_display_lists_patterns() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut m = PatternMatcher::new(&ctx, 1_000);
    let x = Int::new_const(&ctx, "x");
    let cond = x.lt(&Int::from_u64(&ctx, 0)).not();
    let cond = Bool::or(&ctx, &[&cond, &x.lt(&Int::from_u64(&ctx, 0))]);
    m.p2_opaque_predicate(BlockId(2), 3, &cond, &[], true);
    let text = m.to_string();
    assert!(text.contains("*Patterns*"));
    assert!(text.contains("-----PATTERN 2: OPAQUE_PREDICATE-----"));
    assert!(text.contains("Block: B2"));
}
