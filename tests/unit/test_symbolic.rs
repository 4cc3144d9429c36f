//! Scoped symbolic table: registration, scoping, taint and forking.

use gasprobe::block::BlockId;
use gasprobe::ir::{SymbolType, TypeName};
use gasprobe::symbolic::{unconstrained, Scope, SymbolicTable};
use std::collections::BTreeSet;
use z3::ast::{Ast, Dynamic, Int};
use z3::{Config, Context};

fn refs(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn int<'ctx>(ctx: &'ctx Context, v: u64) -> Dynamic<'ctx> {
    Dynamic::from_ast(&Int::from_u64(ctx, v))
}

#[test]
fn test_scope_of_loop_stack() {
    assert_eq!(Scope::of(&[]), Scope::Global);
    assert_eq!(Scope::of(&[BlockId(1), BlockId(5)]), Scope::Loop(BlockId(5)));
    assert_eq!(Scope::Loop(BlockId(2)).as_loop(), Some(BlockId(2)));
    assert_eq!(Scope::Global.to_string(), "global");
    assert_eq!(Scope::Loop(BlockId(2)).to_string(), "loop B2");
}

#[test]
fn test_symbol_kinds_follow_declared_type() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    assert!(t.is_empty());
    t.push_symbol("arr", &TypeName::array_of(TypeName::uint()), Scope::Global);
    t.push_symbol(
        "owners",
        &TypeName::mapping(TypeName::elementary("address"), TypeName::elementary("bool")),
        Scope::Global,
    );
    t.push_symbol("n", &TypeName::uint(), Scope::Global);
    assert_eq!(t.len(), 3);
    assert_eq!(t.get_symbol("arr").unwrap().kind, SymbolType::Array);
    assert_eq!(t.get_symbol("owners").unwrap().kind, SymbolType::Mapping);
    assert_eq!(t.get_symbol("n").unwrap().kind, SymbolType::Primitive);
}

#[test]
fn test_update_of_unknown_name_creates_global_symbol() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    let taint = t.update_symbol("balances[0]", int(&ctx, 9), &refs(&[]), &[BlockId(3)]);
    assert_eq!(taint, None);
    let sym = t.get_symbol("balances[0]").unwrap();
    assert_eq!(sym.loop_scope, Scope::Global);
    assert_eq!(sym.value.as_int().unwrap().as_u64(), Some(9));
}

#[test]
fn test_taint_ignores_inactive_loops() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    // `i` belongs to a loop that has already been left
    t.push_symbol("i", &TypeName::uint(), Scope::Loop(BlockId(1)));
    t.push_symbol("x", &TypeName::uint(), Scope::Global);
    let taint = t.update_symbol("x", int(&ctx, 1), &refs(&["i"]), &[BlockId(6)]);
    assert_eq!(taint, None);
    assert!(!t.is_loop_bound("x", BlockId(6)));
}

#[test]
fn test_taint_propagates_transitively() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    let active = [BlockId(2)];
    t.push_symbol("i", &TypeName::uint(), Scope::Loop(BlockId(2)));
    t.push_symbol("j", &TypeName::uint(), Scope::Global);
    t.push_symbol("k", &TypeName::uint(), Scope::Global);
    t.update_symbol("j", int(&ctx, 0), &refs(&["i"]), &active);
    t.update_symbol("k", int(&ctx, 0), &refs(&["j"]), &active);
    assert_eq!(t.loop_bound_names(BlockId(2)), refs(&["i", "j", "k"]));
    assert_eq!(t.get_symbols_by_scope(BlockId(2)).len(), 1);
    assert_eq!(t.get_tainted_symbols_in_scope(BlockId(2)).len(), 2);
}

#[test]
fn test_untainted_update_clears_taint() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    t.push_symbol("i", &TypeName::uint(), Scope::Loop(BlockId(2)));
    t.push_symbol("x", &TypeName::uint(), Scope::Global);
    t.update_symbol("x", int(&ctx, 0), &refs(&["i"]), &[BlockId(2)]);
    assert!(t.is_loop_bound("x", BlockId(2)));
    // x = 4 no longer depends on the loop
    assert_eq!(t.update_symbol("x", int(&ctx, 4), &refs(&[]), &[BlockId(2)]), None);
    assert!(!t.is_loop_bound("x", BlockId(2)));
    assert!(t.get_tainted_symbols_in_scope(BlockId(2)).is_empty());
}

#[test]
fn test_fork_isolation() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    t.push_symbol("x", &TypeName::uint(), Scope::Global);
    let mut left = t.clone();
    let right = t.clone();
    left.update_symbol("x", int(&ctx, 1), &refs(&[]), &[]);
    left.push_symbol("y", &TypeName::uint(), Scope::Global);
    assert_eq!(left.get_symbol_value("x").as_int().unwrap().as_u64(), Some(1));
    assert!(right.get_symbol_value("x").as_int().unwrap().as_u64().is_none());
    assert!(right.get_symbol("y").is_none());
    assert_eq!(t.len(), 1);
}

#[test]
fn test_unconstrained_sorts() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    assert!(unconstrained(&ctx, "b", Some(&TypeName::elementary("bool"))).as_bool().is_some());
    assert!(unconstrained(&ctx, "u", Some(&TypeName::uint())).as_int().is_some());
    let a = unconstrained(&ctx, "x", None);
    let b = unconstrained(&ctx, "x", None);
    assert_eq!(a, b);
    assert_eq!(a.simplify().to_string(), "x");
}

#[test]
fn test_forget_rebinds_every_key_under_a_root() {
    let cfg = Config::new();
    let ctx = Context::new(&cfg);
    let mut t = SymbolicTable::new(&ctx);
    t.push_symbol("i", &TypeName::uint(), Scope::Loop(BlockId(1)));
    t.update_symbol("balances[0]", int(&ctx, 1), &BTreeSet::new(), &[]);
    t.update_symbol("x", int(&ctx, 0), &refs(&["i"]), &[BlockId(1)]);
    t.update_symbol("y", int(&ctx, 0), &BTreeSet::new(), &[]);
    t.push_symbol("done", &TypeName::elementary("bool"), Scope::Global);

    let forgotten = t.forget(&refs(&["balances", "x", "done"]), "exitB1");
    assert_eq!(forgotten, vec!["balances[0]", "done", "x"]);

    let x = t.get_symbol("x").unwrap();
    assert_eq!(x.value, Dynamic::from_ast(&Int::new_const(&ctx, "x!exitB1")));
    // scope and taint survive
    assert_eq!(x.taint_scope, Some(BlockId(1)));
    assert!(t.get_symbol("done").unwrap().is_bool());
    assert_eq!(
        t.get_symbol_value("balances[0]"),
        Dynamic::from_ast(&Int::new_const(&ctx, "balances[0]!exitB1"))
    );
    assert_eq!(t.get_symbol_value("y").as_int().unwrap().as_u64(), Some(0));
}
