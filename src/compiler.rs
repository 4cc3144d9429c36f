//! Expression → Z3 term compiler.
//!
//! Two inputs: typed expression trees (assignments, initializers, call
//! sites) and the three-address operation lists attached to conditions.
//! Operation lists are folded back into a tree first, so both share one
//! code path. Alongside the term the compiler records every access read
//! (for storage-access reporting), every call site, and every identifier
//! the value was built from (for taint).
//!
//! Integer semantics are unbounded mathematical integers; bit operations
//! other than shifts by a literal are not modelled and become uninterpreted
//! terms over their operand values.

use crate::contract::ContractIr;
use crate::errors::CompileError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::ir::{Operand, Operation, Temp, TypeName};
use crate::symbolic::{unconstrained, SymbolicTable};
use primitive_types::U256;
use std::collections::{BTreeSet, HashMap};
use z3::ast::{Ast, Bool, Dynamic, Int};
use z3::Context;

/// Largest literal exponent expanded into repeated multiplication.
const MAX_POW_EXPONENT: u64 = 16;

/// A compiled term plus everything observed while building it.
#[derive(Debug, Clone)]
pub struct Compiled<'ctx> {
    pub term: Dynamic<'ctx>,
    /// Access expressions read by value, in evaluation order.
    pub accesses: Vec<Expr>,
    /// Call sites, in evaluation order.
    pub calls: Vec<Expr>,
    pub references: BTreeSet<String>,
    /// Sub-terms that could not be modelled and were replaced by fresh
    /// constants.
    pub errors: Vec<CompileError>,
}

/// Fold a three-address operation list back into the expression tree
/// rooted at its `Condition` marker.
pub fn fold_operations(ops: &[Operation]) -> Result<Expr, CompileError> {
    let mut temps: HashMap<Temp, Expr> = HashMap::new();
    let resolve = |temps: &HashMap<Temp, Expr>, o: &Operand| -> Result<Expr, CompileError> {
        match o {
            Operand::Temp(t) => temps.get(t).cloned().ok_or(CompileError::UndefinedTemporary(*t)),
            Operand::Lit(e) => Ok(e.clone()),
            Operand::Var(v) => Ok(Expr::Atom(v.clone())),
        }
    };

    for op in ops {
        let (dest, e) = match op {
            Operation::Binary { dest, operator, lhs, rhs } => (
                *dest,
                Expr::binary(*operator, resolve(&temps, lhs)?, resolve(&temps, rhs)?),
            ),
            Operation::Unary { dest, operator, operand } => {
                (*dest, Expr::unary(*operator, resolve(&temps, operand)?))
            }
            Operation::Assign { dest, value } => (*dest, resolve(&temps, value)?),
            Operation::Index { dest, base, index } => (
                *dest,
                Expr::index(resolve(&temps, base)?, resolve(&temps, index)?),
            ),
            Operation::Member { dest, base, member } => {
                (*dest, Expr::member(resolve(&temps, base)?, member))
            }
            Operation::Length { dest, base } => (*dest, Expr::member(resolve(&temps, base)?, "length")),
            Operation::Call { dest, function, args } => {
                let args = args
                    .iter()
                    .map(|a| resolve(&temps, a))
                    .collect::<Result<Vec<_>, _>>()?;
                (*dest, Expr::Call(function.clone(), args))
            }
            Operation::Condition { value } => return resolve(&temps, value),
        };
        temps.insert(dest, e);
    }
    Err(CompileError::MissingCondition)
}

pub fn to_bool<'ctx>(ctx: &'ctx Context, d: &Dynamic<'ctx>) -> Bool<'ctx> {
    if let Some(b) = d.as_bool() {
        return b;
    }
    match d.as_int() {
        Some(i) => i._eq(&Int::from_u64(ctx, 0)).not(),
        None => Bool::fresh_const(ctx, "coerce"),
    }
}

pub fn to_int<'ctx>(ctx: &'ctx Context, d: &Dynamic<'ctx>) -> Int<'ctx> {
    if let Some(i) = d.as_int() {
        return i;
    }
    match d.as_bool() {
        Some(b) => b.ite(&Int::from_u64(ctx, 1), &Int::from_u64(ctx, 0)),
        None => Int::fresh_const(ctx, "coerce"),
    }
}

fn literal<'ctx>(ctx: &'ctx Context, v: U256) -> Result<Int<'ctx>, CompileError> {
    if v <= U256::from(u64::MAX) {
        return Ok(Int::from_u64(ctx, v.low_u64()));
    }
    Int::from_str(ctx, &v.to_string()).ok_or_else(|| CompileError::UnrepresentableLiteral(v.to_string()))
}

pub struct TermCompiler<'a, 'ctx> {
    table: &'a SymbolicTable<'ctx>,
    contract: &'a ContractIr,
}

impl<'a, 'ctx> TermCompiler<'a, 'ctx> {
    pub fn new(table: &'a SymbolicTable<'ctx>, contract: &'a ContractIr) -> Self {
        Self { table, contract }
    }

    fn ctx(&self) -> &'ctx Context {
        self.table.ctx()
    }

    /// Compile an expression tree.
    pub fn compile_expr(&self, e: &Expr) -> Compiled<'ctx> {
        let mut out = Compiled {
            term: Dynamic::from_ast(&Int::from_u64(self.ctx(), 0)),
            accesses: Vec::new(),
            calls: Vec::new(),
            references: e.identifiers(),
            errors: Vec::new(),
        };
        out.term = self.term(e, &mut out);
        out
    }

    /// Compile a condition's operation list to a boolean term.
    pub fn compile_condition(&self, ops: &[Operation]) -> Result<Compiled<'ctx>, CompileError> {
        let root = fold_operations(ops)?;
        Ok(self.compile_predicate(&root))
    }

    /// Compile an expression and coerce it to a boolean term.
    pub fn compile_predicate(&self, e: &Expr) -> Compiled<'ctx> {
        let mut c = self.compile_expr(e);
        c.term = Dynamic::from_ast(&to_bool(self.ctx(), &c.term));
        c
    }

    /// Resolve the storage key of an access chain, compiling its indices.
    /// Index terms are part of the key, so `arr[i]` before and after `i++`
    /// name different cells.
    pub fn access_key(&self, e: &Expr, out: &mut Compiled<'ctx>) -> String {
        match e {
            Expr::Atom(name) => name.clone(),
            Expr::Index(base, idx) => {
                let base = self.access_key(base, out);
                let idx = self.term(idx, out).simplify();
                format!("{base}[{idx}]")
            }
            Expr::Member(base, member) => {
                let base = self.access_key(base, out);
                format!("{base}.{member}")
            }
            other => other.to_string(),
        }
    }

    /// Declared type of an access chain, when it can be derived.
    pub fn access_type(&self, e: &Expr) -> Option<TypeName> {
        match e {
            Expr::Atom(name) => self
                .table
                .get_symbol(name)
                .and_then(|s| s.ty.clone())
                .or_else(|| self.contract.storage_variable(name).map(|v| v.ty.clone())),
            Expr::Index(base, _) => self.access_type(base)?.element().cloned(),
            Expr::Member(_, member) if member == "length" => Some(TypeName::uint()),
            Expr::Member(base, member) => {
                let ty = self.access_type(base)?;
                self.contract.field_type(&ty, member).cloned()
            }
            _ => None,
        }
    }

    fn read(&self, e: &Expr, out: &mut Compiled<'ctx>) -> Dynamic<'ctx> {
        out.accesses.push(e.clone());
        let key = self.access_key(e, out);
        match self.table.get_symbol(&key) {
            Some(sym) => sym.value.clone(),
            None => unconstrained(self.ctx(), &key, self.access_type(e).as_ref()),
        }
    }

    /// An uninterpreted stand-in for a sub-term that cannot be modelled.
    /// `key` names the operation applied to the current operand terms, so
    /// equal operand values share the constant and changed ones do not.
    fn fallback(&self, key: String, err: CompileError, out: &mut Compiled<'ctx>) -> Dynamic<'ctx> {
        log::debug!("{err}; substituting an uninterpreted term");
        out.errors.push(err);
        Dynamic::from_ast(&Int::new_const(self.ctx(), format!("?{key}")))
    }

    /// Calls to pure, call-free functions are uninterpreted functions of
    /// their argument terms. Any other call yields a fresh value per site.
    fn call_term(&self, callee: &str, args: &[Dynamic<'ctx>]) -> Dynamic<'ctx> {
        let ctx = self.ctx();
        match self.contract.resolve_callee(callee) {
            Some(f) if f.is_side_effect_free() => {
                let args: Vec<String> = args.iter().map(|a| a.simplify().to_string()).collect();
                Dynamic::from_ast(&Int::new_const(ctx, format!("{callee}({})", args.join(", "))))
            }
            _ => Dynamic::from_ast(&Int::fresh_const(ctx, callee)),
        }
    }

    fn term(&self, e: &Expr, out: &mut Compiled<'ctx>) -> Dynamic<'ctx> {
        let ctx = self.ctx();
        match e {
            Expr::Val(v) => match literal(ctx, *v) {
                Ok(i) => Dynamic::from_ast(&i),
                Err(err) => self.fallback(e.to_string(), err, out),
            },
            Expr::Bool(b) => Dynamic::from_ast(&Bool::from_bool(ctx, *b)),
            Expr::Atom(_) | Expr::Index(..) | Expr::Member(..) => self.read(e, out),
            Expr::Call(callee, args) => {
                out.calls.push(e.clone());
                let args: Vec<Dynamic<'ctx>> = args.iter().map(|a| self.term(a, out)).collect();
                self.call_term(callee, &args)
            }
            Expr::Unary(op, inner) => {
                let v = self.term(inner, out);
                match op {
                    UnaryOp::Not => Dynamic::from_ast(&to_bool(ctx, &v).not()),
                    UnaryOp::Neg => Dynamic::from_ast(&to_int(ctx, &v).unary_minus()),
                    // as a value, `x++` reads the operand
                    UnaryOp::Increment | UnaryOp::Decrement => v,
                    UnaryOp::BitNot => {
                        let key = format!("(~ {})", v.simplify());
                        self.fallback(key, CompileError::UnsupportedExpression(e.to_string()), out)
                    }
                }
            }
            Expr::Binary(op, l, r) => {
                let lhs = self.term(l, out);
                let rhs = self.term(r, out);
                match self.binary(*op, &lhs, &rhs, r) {
                    Some(t) => t,
                    None => {
                        let key = format!("({} {} {})", op.symbol(), lhs.simplify(), rhs.simplify());
                        self.fallback(key, CompileError::UnsupportedExpression(e.to_string()), out)
                    }
                }
            }
            // an assignment used as a value yields the assigned value
            Expr::Assign(_, _, rhs) => self.term(rhs, out),
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        lhs: &Dynamic<'ctx>,
        rhs: &Dynamic<'ctx>,
        rhs_expr: &Expr,
    ) -> Option<Dynamic<'ctx>> {
        let ctx = self.ctx();
        let int = |d: &Dynamic<'ctx>| to_int(ctx, d);
        let boolean = |d: &Dynamic<'ctx>| to_bool(ctx, d);
        let t = match op {
            BinaryOp::Add => Dynamic::from_ast(&Int::add(ctx, &[&int(lhs), &int(rhs)])),
            BinaryOp::Sub => Dynamic::from_ast(&Int::sub(ctx, &[&int(lhs), &int(rhs)])),
            BinaryOp::Mul => Dynamic::from_ast(&Int::mul(ctx, &[&int(lhs), &int(rhs)])),
            BinaryOp::Div => Dynamic::from_ast(&int(lhs).div(&int(rhs))),
            BinaryOp::Mod => Dynamic::from_ast(&int(lhs).modulo(&int(rhs))),
            BinaryOp::Pow => {
                let n = rhs_expr.as_val().filter(|n| *n <= U256::from(MAX_POW_EXPONENT))?;
                let base = int(lhs);
                let mut acc = Int::from_u64(ctx, 1);
                for _ in 0..n.low_u64() {
                    acc = Int::mul(ctx, &[&acc, &base]);
                }
                Dynamic::from_ast(&acc)
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                let k = rhs_expr.as_val().filter(|k| *k < U256::from(256))?;
                let factor = literal(ctx, U256::one() << k.low_u64() as usize).ok()?;
                if op == BinaryOp::Shl {
                    Dynamic::from_ast(&Int::mul(ctx, &[&int(lhs), &factor]))
                } else {
                    Dynamic::from_ast(&int(lhs).div(&factor))
                }
            }
            BinaryOp::Lt => Dynamic::from_ast(&int(lhs).lt(&int(rhs))),
            BinaryOp::Le => Dynamic::from_ast(&int(lhs).le(&int(rhs))),
            BinaryOp::Gt => Dynamic::from_ast(&int(lhs).gt(&int(rhs))),
            BinaryOp::Ge => Dynamic::from_ast(&int(lhs).ge(&int(rhs))),
            BinaryOp::Eq | BinaryOp::Ne => {
                let eq = match (lhs.as_bool(), rhs.as_bool()) {
                    (Some(a), Some(b)) => a._eq(&b),
                    _ => int(lhs)._eq(&int(rhs)),
                };
                if op == BinaryOp::Eq {
                    Dynamic::from_ast(&eq)
                } else {
                    Dynamic::from_ast(&eq.not())
                }
            }
            BinaryOp::And => Dynamic::from_ast(&Bool::and(ctx, &[&boolean(lhs), &boolean(rhs)])),
            BinaryOp::Or => Dynamic::from_ast(&Bool::or(ctx, &[&boolean(lhs), &boolean(rhs)])),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => return None,
        };
        Some(t)
    }
}
