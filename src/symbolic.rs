//! Scoped symbolic store.
//!
//! Maps variable names to their current Z3 term on one path. Every symbol
//! belongs to a scope (global or the loop header that declared or
//! re-parented it) and may carry a taint scope: the innermost loop whose
//! values flowed into it. Backed by a persistent map, so cloning the table
//! at a fork is O(1) and both sides share structure until one writes.

use crate::block::BlockId;
use crate::ir::{SymbolType, TypeName};
use im::OrdMap;
use std::collections::BTreeSet;
use std::fmt;
use z3::ast::{Bool, Dynamic, Int};
use z3::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Global,
    Loop(BlockId),
}

impl Scope {
    pub fn of(loops: &[BlockId]) -> Self {
        loops.last().map_or(Scope::Global, |&l| Scope::Loop(l))
    }

    pub fn as_loop(self) -> Option<BlockId> {
        match self {
            Scope::Global => None,
            Scope::Loop(l) => Some(l),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Loop(l) => write!(f, "loop {l}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol<'ctx> {
    pub name: String,
    pub value: Dynamic<'ctx>,
    pub kind: SymbolType,
    /// Declared type, when the symbol came from a declaration.
    pub ty: Option<TypeName>,
    pub loop_scope: Scope,
    pub taint_scope: Option<BlockId>,
}

impl<'ctx> Symbol<'ctx> {
    pub fn is_bool(&self) -> bool {
        self.value.as_bool().is_some()
    }

    /// Declared in, or tainted by, `scope`.
    pub fn bound_to(&self, scope: BlockId) -> bool {
        self.loop_scope == Scope::Loop(scope) || self.taint_scope == Some(scope)
    }
}

/// A fresh, deterministic, unconstrained constant of the sort `ty` implies.
pub fn unconstrained<'ctx>(ctx: &'ctx Context, name: &str, ty: Option<&TypeName>) -> Dynamic<'ctx> {
    if ty.is_some_and(TypeName::is_bool) {
        Dynamic::from_ast(&Bool::new_const(ctx, name))
    } else {
        Dynamic::from_ast(&Int::new_const(ctx, name))
    }
}

fn root_of(key: &str) -> &str {
    key.split(|c| c == '[' || c == '.').next().unwrap_or(key)
}

#[derive(Debug, Clone)]
pub struct SymbolicTable<'ctx> {
    ctx: &'ctx Context,
    symbols: OrdMap<String, Symbol<'ctx>>,
}

impl<'ctx> SymbolicTable<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            ctx,
            symbols: OrdMap::new(),
        }
    }

    pub fn ctx(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Register `name` in `scope`, or re-parent it there if already known.
    pub fn push_symbol(&mut self, name: &str, ty: &TypeName, scope: Scope) {
        if let Some(sym) = self.symbols.get_mut(name) {
            sym.loop_scope = scope;
            return;
        }
        let value = unconstrained(self.ctx, name, Some(ty));
        self.symbols.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                value,
                kind: ty.symbol_type(),
                ty: Some(ty.clone()),
                loop_scope: scope,
                taint_scope: None,
            },
        );
    }

    /// Replace the term bound to `name`.
    ///
    /// `references` are the names the new value was built from. If one of
    /// them is bound to an active loop, or the update is self-referential
    /// while a loop is active, the symbol is tainted with the innermost such
    /// loop, which is returned. Otherwise any earlier taint is cleared: taint
    /// describes the current value only.
    pub fn update_symbol(
        &mut self,
        name: &str,
        value: Dynamic<'ctx>,
        references: &BTreeSet<String>,
        active: &[BlockId],
    ) -> Option<BlockId> {
        let mut innermost: Option<usize> = None;
        let position = |l: BlockId| active.iter().rposition(|a| *a == l);
        for r in references {
            if r == name {
                if !active.is_empty() {
                    innermost = innermost.max(Some(active.len() - 1));
                }
                continue;
            }
            if let Some(sym) = self.symbols.get(r) {
                for l in [sym.loop_scope.as_loop(), sym.taint_scope].into_iter().flatten() {
                    innermost = innermost.max(position(l));
                }
            }
        }
        let taint = innermost.map(|p| active[p]);

        match self.symbols.get_mut(name) {
            Some(sym) => {
                sym.value = value;
                sym.taint_scope = taint;
            }
            None => {
                self.symbols.insert(
                    name.to_string(),
                    Symbol {
                        name: name.to_string(),
                        value,
                        kind: SymbolType::Primitive,
                        ty: None,
                        loop_scope: Scope::Global,
                        taint_scope: taint,
                    },
                );
            }
        }
        taint
    }

    /// Overwrite the term without touching scope or taint.
    pub fn havoc(&mut self, name: &str, value: Dynamic<'ctx>) {
        if let Some(sym) = self.symbols.get_mut(name) {
            sym.value = value;
        }
    }

    /// Rebind every symbol rooted at one of `roots` to a fresh constant
    /// tagged with `tag`. A key's root is the text before its first `[` or
    /// `.`, so forgetting `balances` also forgets `balances[k]`. Scope and
    /// taint are kept. Returns the forgotten names.
    pub fn forget(&mut self, roots: &BTreeSet<String>, tag: &str) -> Vec<String> {
        let ctx = self.ctx;
        let forgotten: Vec<String> = self
            .symbols
            .keys()
            .filter(|name| roots.contains(root_of(name)))
            .cloned()
            .collect();
        for name in &forgotten {
            if let Some(sym) = self.symbols.get_mut(name) {
                let fresh = format!("{name}!{tag}");
                sym.value = if sym.is_bool() {
                    Dynamic::from_ast(&Bool::new_const(ctx, fresh))
                } else {
                    Dynamic::from_ast(&Int::new_const(ctx, fresh))
                };
            }
        }
        forgotten
    }

    pub fn get_symbol(&self, name: &str) -> Option<&Symbol<'ctx>> {
        self.symbols.get(name)
    }

    /// Current term of `name`; unknown names read as an unconstrained
    /// integer constant of the same name.
    pub fn get_symbol_value(&self, name: &str) -> Dynamic<'ctx> {
        match self.symbols.get(name) {
            Some(sym) => sym.value.clone(),
            None => unconstrained(self.ctx, name, None),
        }
    }

    pub fn get_symbols_by_scope(&self, scope: BlockId) -> Vec<&Symbol<'ctx>> {
        self.symbols
            .values()
            .filter(|s| s.loop_scope == Scope::Loop(scope))
            .collect()
    }

    pub fn get_tainted_symbols_in_scope(&self, scope: BlockId) -> Vec<&Symbol<'ctx>> {
        self.symbols
            .values()
            .filter(|s| s.taint_scope == Some(scope))
            .collect()
    }

    /// Names declared in, or tainted by, `scope`.
    pub fn loop_bound_names(&self, scope: BlockId) -> BTreeSet<String> {
        self.symbols
            .values()
            .filter(|s| s.bound_to(scope))
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn is_loop_bound(&self, name: &str, scope: BlockId) -> bool {
        self.symbols.get(name).is_some_and(|s| s.bound_to(scope))
    }
}
