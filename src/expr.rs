//! Typed source-level expression tree.
//!
//! The front end hands assignments, initializers and call sites over as a
//! tree rather than flattened text, so the term compiler never has to
//! re-derive structure from strings.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// -- Serde helpers for U256 --------------------------------------------------

mod u256_serde {
    use primitive_types::U256;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    /// Serialize a U256 as a hex string (e.g. `"0x1a2b"`).
    pub fn serialize<S: Serializer>(val: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{val:x}"))
    }

    /// Deserialize a U256 from a JSON integer, a decimal string, or a hex
    /// string with `0x` prefix.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        d.deserialize_any(U256Visitor)
    }

    struct U256Visitor;

    impl<'de> Visitor<'de> for U256Visitor {
        type Value = U256;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an unsigned integer or a numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<U256, E> {
            Ok(U256::from(v))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<U256, E> {
            match v.strip_prefix("0x") {
                Some(hex) => U256::from_str_radix(hex, 16).map_err(E::custom),
                None => U256::from_dec_str(v).map_err(E::custom),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "!")]
    Not,
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "~")]
    BitNot,
    #[serde(rename = "++")]
    Increment,
    #[serde(rename = "--")]
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
    #[serde(rename = "**")]
    Pow,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = "&")]
    BitAnd,
    #[serde(rename = "|")]
    BitOr,
    #[serde(rename = "^")]
    BitXor,
    #[serde(rename = "<<")]
    Shl,
    #[serde(rename = ">>")]
    Shr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
        }
    }

    /// `true` for operators whose result is a boolean.
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::And
                | BinaryOp::Or
        )
    }
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::BitNot => "~",
            UnaryOp::Increment => "++",
            UnaryOp::Decrement => "--",
        }
    }
}

/// Compound-assignment operator of an assignment expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "+=")]
    Add,
    #[serde(rename = "-=")]
    Sub,
    #[serde(rename = "*=")]
    Mul,
    #[serde(rename = "/=")]
    Div,
    #[serde(rename = "%=")]
    Mod,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Mod => "%=",
        }
    }

    /// The arithmetic operator applied to the previous value, if any.
    pub fn arithmetic(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
        }
    }
}

// ---------------------------------------------------------------------------
// Core expression type
// ---------------------------------------------------------------------------

/// A source-level expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Unsigned integer literal.
    Val(#[serde(with = "u256_serde")] U256),
    /// Boolean literal.
    Bool(bool),
    /// Identifier: local, parameter, storage variable, or global (`msg`).
    Atom(String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// `base.member`
    Member(Box<Expr>, String),
    /// `callee(args…)`; the callee may be qualified (`Lib.f`).
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    // -- Convenience constructors ------------------------------------------

    /// Create a value expression from a `u64`.
    pub fn val(v: u64) -> Self {
        Expr::Val(U256::from(v))
    }

    /// Create an identifier.
    pub fn atom(s: &str) -> Self {
        Expr::Atom(s.to_string())
    }

    pub fn index(base: Expr, index: Expr) -> Self {
        Expr::Index(Box::new(base), Box::new(index))
    }

    pub fn member(base: Expr, member: &str) -> Self {
        Expr::Member(Box::new(base), member.to_string())
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Self {
        Expr::Call(callee.to_string(), args)
    }

    pub fn unary(op: UnaryOp, e: Expr) -> Self {
        Expr::Unary(op, Box::new(e))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn assign(op: AssignOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Assign(op, Box::new(lhs), Box::new(rhs))
    }

    // -- Predicates --------------------------------------------------------

    /// Try to extract a concrete `U256`.
    pub fn as_val(&self) -> Option<U256> {
        match self {
            Expr::Val(v) => Some(*v),
            _ => None,
        }
    }

    /// `true` for identifiers, index and member accesses.
    pub fn is_access(&self) -> bool {
        matches!(self, Expr::Atom(_) | Expr::Index(..) | Expr::Member(..))
    }

    /// The root identifier of an access chain: `a` for `a[i].b`.
    pub fn base_identifier(&self) -> Option<&str> {
        match self {
            Expr::Atom(name) => Some(name),
            Expr::Index(base, _) | Expr::Member(base, _) => base.base_identifier(),
            _ => None,
        }
    }

    /// Index expressions along an access chain, outermost last.
    pub fn access_indices(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        let mut cur = self;
        loop {
            match cur {
                Expr::Index(base, idx) => {
                    out.push(idx.as_ref());
                    cur = base;
                }
                Expr::Member(base, _) => cur = base,
                _ => break,
            }
        }
        out.reverse();
        out
    }

    /// All identifiers the expression mentions, including those inside
    /// indices and call arguments.
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Val(_) | Expr::Bool(_) => {}
            Expr::Atom(name) => {
                out.insert(name.clone());
            }
            Expr::Index(base, idx) => {
                base.collect_identifiers(out);
                idx.collect_identifiers(out);
            }
            Expr::Member(base, _) => base.collect_identifiers(out),
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_identifiers(out)),
            Expr::Unary(_, e) => e.collect_identifiers(out),
            Expr::Binary(_, l, r) | Expr::Assign(_, l, r) => {
                l.collect_identifiers(out);
                r.collect_identifiers(out);
            }
        }
    }

    /// Check if this expression tree contains `target` anywhere.
    pub fn contains(&self, target: &Expr) -> bool {
        if self == target {
            return true;
        }
        match self {
            Expr::Index(b, i) => b.contains(target) || i.contains(target),
            Expr::Member(b, _) => b.contains(target),
            Expr::Call(_, args) => args.iter().any(|a| a.contains(target)),
            Expr::Unary(_, e) => e.contains(target),
            Expr::Binary(_, l, r) | Expr::Assign(_, l, r) => l.contains(target) || r.contains(target),
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Val(v) => {
                if *v <= U256::from(u64::MAX) {
                    write!(f, "{v}")
                } else {
                    write!(f, "0x{v:x}")
                }
            }
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Atom(s) => write!(f, "{s}"),
            Expr::Index(b, i) => write!(f, "{b}[{i}]"),
            Expr::Member(b, m) => write!(f, "{b}.{m}"),
            Expr::Call(callee, args) => {
                write!(f, "{callee}(")?;
                for (n, a) in args.iter().enumerate() {
                    if n > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Unary(op @ (UnaryOp::Increment | UnaryOp::Decrement), e) => {
                write!(f, "{e}{}", op.symbol())
            }
            Expr::Unary(op, e) => match e.as_ref() {
                Expr::Binary(..) => write!(f, "{}({e})", op.symbol()),
                _ => write!(f, "{}{e}", op.symbol()),
            },
            Expr::Binary(op, l, r) => {
                fmt_operand(f, l)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(f, r)
            }
            Expr::Assign(op, l, r) => write!(f, "{l} {} {r}", op.symbol()),
        }
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    match e {
        Expr::Binary(..) | Expr::Assign(..) => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}
