//! Pattern detection over symbolic execution events.
//!
//! The engine reports branch decisions, storage accesses and call sites as it
//! walks each path; the matcher decides which of them are gas patterns,
//! merges repeats, and prunes false positives once every path is done.

use crate::block::BlockId;
use crate::cfg::Cfg;
use crate::contract::ContractIr;
use crate::expr::Expr;
use crate::ir::{Node, NodeId};
use crate::patterns::{CallSite, Detail, Pattern, PatternKind, StorageAccess};
use crate::symbolic::SymbolicTable;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use z3::ast::{Ast, Bool, Dynamic};
use z3::{Context, Params, SatResult, Solver};

/// Fixed seed so repeated runs agree on `unknown` boundaries.
const SOLVER_RANDOM_SEED: u32 = 42;

pub fn configure_solver(ctx: &Context, solver: &Solver, timeout_ms: u32) {
    let mut params = Params::new(ctx);
    params.set_u32("timeout", timeout_ms);
    params.set_u32("random_seed", SOLVER_RANDOM_SEED);
    solver.set_params(&params);
}

/// `needle` occurs somewhere inside `haystack`.
fn occurs<'ctx>(haystack: &Dynamic<'ctx>, needle: &Dynamic<'ctx>) -> bool {
    haystack == needle || haystack.children().iter().any(|c| occurs(c, needle))
}

/// A numeral or boolean literal after simplification.
fn is_literal(term: &Dynamic<'_>) -> bool {
    let t = term.simplify();
    t.as_int().is_some_and(|i| i.as_i64().is_some() || i.as_u64().is_some())
        || t.as_bool().is_some_and(|b| b.as_bool().is_some())
}

pub struct PatternMatcher<'ctx> {
    ctx: &'ctx Context,
    solver: Solver<'ctx>,
    patterns: Vec<Pattern<'ctx>>,
    candidates: usize,
    /// Names declared in, or tainted by, each loop on any path.
    ledger: BTreeMap<BlockId, BTreeSet<String>>,
}

impl<'ctx> PatternMatcher<'ctx> {
    pub fn new(ctx: &'ctx Context, solver_timeout_ms: u32) -> Self {
        let solver = Solver::new(ctx);
        configure_solver(ctx, &solver, solver_timeout_ms);
        Self {
            ctx,
            solver,
            patterns: Vec::new(),
            candidates: 0,
            ledger: BTreeMap::new(),
        }
    }

    pub fn patterns(&self) -> &[Pattern<'ctx>] {
        &self.patterns
    }

    pub fn into_patterns(self) -> Vec<Pattern<'ctx>> {
        self.patterns
    }

    /// Every candidate seen, including merged and later-pruned ones.
    pub fn candidate_count(&self) -> usize {
        self.candidates
    }

    pub fn ledger(&self) -> &BTreeMap<BlockId, BTreeSet<String>> {
        &self.ledger
    }

    pub fn record_loop_binding(&mut self, scope: BlockId, name: &str) {
        self.ledger.entry(scope).or_default().insert(name.to_string());
    }

    /// Satisfiability of the conjunction of `constraints` and `extra`.
    pub fn check(&self, constraints: &[Bool<'ctx>], extra: &Bool<'ctx>) -> SatResult {
        self.solver.push();
        for c in constraints {
            self.solver.assert(c);
        }
        self.solver.assert(extra);
        let result = self.solver.check();
        self.solver.pop(1);
        if result == SatResult::Unknown {
            log::debug!("solver returned unknown for {extra}");
        }
        result
    }

    fn is_duplicate(&self, block: BlockId, instruction: NodeId) -> bool {
        self.patterns.iter().any(|p| {
            p.kind().is_branch_kind() && (p.instruction == instruction || p.block == block)
        })
    }

    fn push_branch_pattern(&mut self, pattern: Pattern<'ctx>) {
        self.candidates += 1;
        if !self.is_duplicate(pattern.block, pattern.instruction) {
            self.patterns.push(pattern);
        }
    }

    fn find_mut(&mut self, instruction: NodeId, kind: PatternKind) -> Option<&mut Pattern<'ctx>> {
        self.patterns
            .iter_mut()
            .find(|p| p.instruction == instruction && p.kind() == kind)
    }

    /// PATTERN 1: the edge guarded by `condition` is unreachable under the
    /// path constraints. Returns whether the edge may be taken; `unknown`
    /// counts as reachable. `record` is off when probing the negated edge.
    pub fn p1_redundant_code(
        &mut self,
        block: BlockId,
        instruction: NodeId,
        condition: &Bool<'ctx>,
        path_constraints: &[Bool<'ctx>],
        record: bool,
    ) -> bool {
        let result = self.check(path_constraints, condition);
        if record && result == SatResult::Unsat {
            self.push_branch_pattern(Pattern {
                block,
                instruction,
                detail: Detail::RedundantCode {
                    condition: condition.clone(),
                    path_constraints: path_constraints.to_vec(),
                },
            });
        }
        result != SatResult::Unsat
    }

    /// PATTERN 2: the path constraints imply `condition`, so the branch
    /// always goes one way.
    pub fn p2_opaque_predicate(
        &mut self,
        block: BlockId,
        instruction: NodeId,
        condition: &Bool<'ctx>,
        path_constraints: &[Bool<'ctx>],
        record: bool,
    ) -> SatResult {
        let refs: Vec<&Bool<'ctx>> = path_constraints.iter().collect();
        let premise = Bool::and(self.ctx, &refs);
        let negated = premise.implies(condition).not();
        let result = self.check(&[], &negated);
        if record && result == SatResult::Unsat {
            self.push_branch_pattern(Pattern {
                block,
                instruction,
                detail: Detail::OpaquePredicate {
                    condition: condition.clone(),
                    path_constraints: path_constraints.to_vec(),
                },
            });
        }
        result
    }

    /// PATTERN 4: a storage access inside a loop that does not provably
    /// move with the loop. Repeats on one instruction merge.
    pub fn p4_expensive_operation_in_loop(
        &mut self,
        block: BlockId,
        node: &Node,
        access: &Expr,
        table: &SymbolicTable<'ctx>,
        loops: &[BlockId],
    ) {
        let Some(&scope) = loops.last() else {
            return;
        };
        let Some(base) = access.base_identifier() else {
            return;
        };
        if !node.touches_storage(base) {
            return;
        }

        let indices = access.access_indices();
        let mut index_refs = BTreeSet::new();
        for idx in &indices {
            index_refs.extend(idx.identifiers());
        }
        // a key declared in, or tainted by, this loop walks the collection
        if index_refs.iter().any(|n| table.is_loop_bound(n, scope)) {
            return;
        }

        self.candidates += 1;
        let variable = StorageAccess {
            raw_name: access.to_string(),
            base_name: base.to_string(),
            index_refs,
        };
        if let Some(existing) = self.find_mut(node.id, PatternKind::ExpensiveOperationInLoop) {
            if let Detail::ExpensiveOperationInLoop { variables, .. } = &mut existing.detail {
                if !variables.iter().any(|v| v.raw_name == variable.raw_name) {
                    variables.push(variable);
                }
            }
            return;
        }
        self.patterns.push(Pattern {
            block,
            instruction: node.id,
            detail: Detail::ExpensiveOperationInLoop {
                variables: vec![variable],
                loop_scope: scope,
            },
        });
    }

    /// PATTERN 5: a call to a side-effect-free function inside a loop whose
    /// arguments do not depend on the loop.
    pub fn p5_loop_invariant_operation(
        &mut self,
        block: BlockId,
        node: &Node,
        call: &Expr,
        table: &SymbolicTable<'ctx>,
        loops: &[BlockId],
        contract: &ContractIr,
    ) {
        let Some(&scope) = loops.last() else {
            return;
        };
        let Expr::Call(callee, args) = call else {
            return;
        };
        let Some(function) = contract.resolve_callee(callee) else {
            return;
        };
        if !function.is_side_effect_free() {
            return;
        }

        let argument_refs: BTreeSet<String> = args.iter().flat_map(|a| a.identifiers()).collect();
        if argument_refs.iter().any(|n| table.is_loop_bound(n, scope)) {
            return;
        }

        self.candidates += 1;
        let site = CallSite {
            function: function.name.clone(),
            call_text: call.to_string(),
            arguments: args.iter().map(|a| a.to_string()).collect(),
            argument_refs,
        };
        if let Some(existing) = self.find_mut(node.id, PatternKind::LoopInvariantOperation) {
            if let Detail::LoopInvariantOperation { calls, .. } = &mut existing.detail {
                if !calls.iter().any(|c| c.call_text == site.call_text) {
                    calls.push(site);
                }
            }
            return;
        }
        self.patterns.push(Pattern {
            block,
            instruction: node.id,
            detail: Detail::LoopInvariantOperation {
                calls: vec![site],
                loop_scope: scope,
            },
        });
    }

    /// PATTERN 6: a branch inside a loop whose condition mentions nothing
    /// the loop binds, neither by name nor by term.
    pub fn p6_loop_invariant_condition(
        &mut self,
        block: BlockId,
        instruction: NodeId,
        condition: &Bool<'ctx>,
        condition_refs: &BTreeSet<String>,
        table: &SymbolicTable<'ctx>,
        loops: &[BlockId],
    ) {
        let Some(&scope) = loops.last() else {
            return;
        };
        if condition_refs.iter().any(|n| table.is_loop_bound(n, scope)) {
            return;
        }
        let haystack = Dynamic::from_ast(condition);
        let bound_term = table
            .get_symbols_by_scope(scope)
            .into_iter()
            .chain(table.get_tainted_symbols_in_scope(scope))
            .any(|s| !is_literal(&s.value) && occurs(&haystack, &s.value));
        if bound_term {
            return;
        }

        self.push_branch_pattern(Pattern {
            block,
            instruction,
            detail: Detail::LoopInvariantCondition {
                condition: condition.clone(),
                condition_refs: condition_refs.clone(),
                loop_scope: scope,
            },
        });
    }

    /// Prune what only becomes visible once every path has run.
    ///
    /// P1 survives only if no path found the true edge feasible; P2 only if
    /// no path found the false edge feasible. Loop findings are re-checked
    /// against everything any path bound inside their loop. Idempotent.
    pub fn remove_false_positives(&mut self, cfg: &Cfg) {
        let ledger = &self.ledger;
        let stale = |scope: &BlockId, refs: &BTreeSet<String>| {
            ledger.get(scope).is_some_and(|bound| !bound.is_disjoint(refs))
        };

        self.patterns.retain_mut(|p| {
            let block = cfg.block(p.block);
            match &mut p.detail {
                Detail::RedundantCode { .. } => !block.true_edge_ever_feasible(),
                Detail::OpaquePredicate { .. } => !block.false_edge_ever_feasible(),
                Detail::ExpensiveOperationInLoop { variables, loop_scope } => {
                    variables.retain(|v| !stale(loop_scope, &v.index_refs));
                    !variables.is_empty()
                }
                Detail::LoopInvariantOperation { calls, loop_scope } => {
                    calls.retain(|c| !stale(loop_scope, &c.argument_refs));
                    !calls.is_empty()
                }
                Detail::LoopInvariantCondition {
                    condition_refs,
                    loop_scope,
                    ..
                } => !stale(loop_scope, condition_refs),
            }
        });
    }
}

impl fmt::Display for PatternMatcher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "                *Patterns*               ")?;
        writeln!(f)?;
        for p in &self.patterns {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}
