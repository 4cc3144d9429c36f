//! Expression tree: queries, rendering and JSON shape.

use gasprobe::expr::{AssignOp, BinaryOp, Expr, UnaryOp};
use primitive_types::U256;

#[test]
fn test_expr_as_val() {
    assert_eq!(Expr::val(42).as_val(), Some(U256::from(42)));
    assert_eq!(Expr::atom("x").as_val(), None);
    assert_eq!(Expr::Bool(true).as_val(), None);
}

#[test]
fn test_is_access() {
    assert!(Expr::atom("x").is_access());
    assert!(Expr::index(Expr::atom("m"), Expr::atom("k")).is_access());
    assert!(Expr::member(Expr::atom("s"), "f").is_access());
    assert!(!Expr::call("f", vec![]).is_access());
    assert!(!Expr::val(1).is_access());
}

#[test]
fn test_base_identifier_of_non_access() {
    assert_eq!(Expr::call("f", vec![]).base_identifier(), None);
    assert_eq!(
        Expr::member(Expr::index(Expr::atom("orders"), Expr::atom("i")), "amount").base_identifier(),
        Some("orders")
    );
}

#[test]
fn test_identifiers_skip_callee_and_members() {
    let e = Expr::call("Math.max", vec![Expr::member(Expr::atom("cfg"), "cap"), Expr::val(3)]);
    let ids: Vec<String> = e.identifiers().into_iter().collect();
    assert_eq!(ids, vec!["cfg"]);
}

#[test]
fn test_contains() {
    let i = Expr::atom("i");
    let e = Expr::binary(BinaryOp::Add, Expr::index(Expr::atom("arr"), i.clone()), Expr::val(1));
    assert!(e.contains(&i));
    assert!(e.contains(&Expr::val(1)));
    assert!(!e.contains(&Expr::atom("j")));
}

#[test]
fn test_display_forms() {
    let e = Expr::assign(
        AssignOp::Add,
        Expr::index(Expr::atom("balances"), Expr::member(Expr::atom("msg"), "sender")),
        Expr::atom("fee"),
    );
    assert_eq!(e.to_string(), "balances[msg.sender] += fee");
    assert_eq!(Expr::unary(UnaryOp::Not, Expr::atom("done")).to_string(), "!done");
    assert_eq!(
        Expr::unary(UnaryOp::Not, Expr::binary(BinaryOp::Eq, Expr::atom("a"), Expr::val(0))).to_string(),
        "!(a == 0)"
    );
    assert_eq!(Expr::call("f", vec![Expr::val(1), Expr::atom("x")]).to_string(), "f(1, x)");
    assert_eq!(Expr::Val(U256::MAX).to_string(), format!("0x{:x}", U256::MAX));
}

#[test]
fn test_operator_metadata() {
    assert!(BinaryOp::Le.is_predicate());
    assert!(BinaryOp::And.is_predicate());
    assert!(!BinaryOp::Add.is_predicate());
    assert_eq!(AssignOp::Mod.arithmetic(), Some(BinaryOp::Mod));
    assert_eq!(AssignOp::Assign.arithmetic(), None);
    assert_eq!(UnaryOp::Decrement.symbol(), "--");
}

#[test]
fn test_json_shape() {
    let json = r#"{"binary": ["<", {"atom": "i"}, {"member": [{"atom": "arr"}, "length"]}]}"#;
    let e: Expr = serde_json::from_str(json).unwrap();
    assert_eq!(
        e,
        Expr::binary(BinaryOp::Lt, Expr::atom("i"), Expr::member(Expr::atom("arr"), "length"))
    );
    let out = serde_json::to_value(Expr::val(255)).unwrap();
    assert_eq!(out, serde_json::json!({"val": "0xff"}));
}
