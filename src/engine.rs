//! Path-forking symbolic execution over the block graph.
//!
//! Each path carries its own symbol table, constraint list, loop-scope
//! stack and the set of loop headers whose body it has entered. The table
//! and constraints are persistent, so forking at a branch is cheap. Loops
//! are unrolled at most once: the first path to reach a header walks the
//! body, every path walks the exit, and a path that comes back to a header
//! it already iterated stops there. On the exit edge every variable the
//! body writes is rebound to a fresh constant, so code after the loop holds
//! for any number of iterations.

use crate::block::{BlockId, Reach};
use crate::cfg::Cfg;
use crate::compiler::{to_bool, Compiled, TermCompiler};
use crate::contract::{ContractIr, FunctionIr};
use crate::errors::{AnalysisError, DEFAULT_TIMEOUT_SECS, MAX_PATH_COUNT};
use crate::expr::{AssignOp, Expr, UnaryOp};
use crate::ir::{Node, NodeKind, TypeName};
use crate::matcher::PatternMatcher;
use crate::symbolic::{unconstrained, Scope, SymbolicTable};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use z3::ast::{Ast, Bool, Dynamic, Int};
use z3::{Context, SatResult};

/// Budgets for one function's exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorationLimits {
    pub max_paths: usize,
    pub timeout: Duration,
}

impl Default for ExplorationLimits {
    fn default() -> Self {
        Self {
            max_paths: MAX_PATH_COUNT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExplorationStats {
    /// Completed paths, including ones cut at a back edge.
    pub paths: usize,
    pub blocks_executed: usize,
}

#[derive(Clone)]
struct PathState<'ctx> {
    table: SymbolicTable<'ctx>,
    constraints: im::Vector<Bool<'ctx>>,
    loop_scopes: Vec<BlockId>,
    iterated: im::OrdSet<BlockId>,
}

impl<'ctx> PathState<'ctx> {
    fn constraint_list(&self) -> Vec<Bool<'ctx>> {
        self.constraints.iter().cloned().collect()
    }

    fn with_constraint(&self, c: Bool<'ctx>) -> Self {
        let mut next = self.clone();
        next.constraints.push_back(c);
        next
    }
}

pub struct SymbolicExecutionEngine<'a, 'ctx> {
    ctx: &'ctx Context,
    contract: &'a ContractIr,
    function: &'a FunctionIr,
    matcher: &'a mut PatternMatcher<'ctx>,
    limits: ExplorationLimits,
    started: Instant,
    stats: ExplorationStats,
    /// Roots written inside each loop, by header.
    loop_writes: BTreeMap<BlockId, BTreeSet<String>>,
}

impl<'a, 'ctx> SymbolicExecutionEngine<'a, 'ctx> {
    pub fn new(
        ctx: &'ctx Context,
        contract: &'a ContractIr,
        function: &'a FunctionIr,
        matcher: &'a mut PatternMatcher<'ctx>,
        limits: ExplorationLimits,
    ) -> Self {
        Self {
            ctx,
            contract,
            function,
            matcher,
            limits,
            started: Instant::now(),
            stats: ExplorationStats::default(),
            loop_writes: BTreeMap::new(),
        }
    }

    /// Explore every feasible path of `cfg`, feeding the matcher. Traversal
    /// state on the graph is reset first, so a graph can be run again.
    pub fn execute(&mut self, cfg: &mut Cfg) -> Result<ExplorationStats, AnalysisError> {
        cfg.reset_traversal();
        self.loop_writes.clear();
        self.started = Instant::now();
        self.stats = ExplorationStats::default();

        let mut work = vec![(cfg.head(), self.initial_state())];
        while let Some((block, state)) = work.pop() {
            if self.started.elapsed() > self.limits.timeout {
                log::warn!(
                    "{}.{}: exploration timed out after {} paths",
                    cfg.contract,
                    cfg.function,
                    self.stats.paths
                );
                return Err(AnalysisError::Timeout(self.limits.timeout.as_secs()));
            }
            self.stats.blocks_executed += 1;

            let successors = self.execute_block(cfg, block, state);
            if successors.is_empty() {
                self.stats.paths += 1;
                if self.stats.paths > self.limits.max_paths {
                    return Err(AnalysisError::PathLimitExceeded(
                        self.stats.paths,
                        self.limits.max_paths,
                    ));
                }
            }
            // first successor is explored first
            work.extend(successors.into_iter().rev());
        }

        log::debug!(
            "{}.{}: {} paths, {} block visits",
            cfg.contract,
            cfg.function,
            self.stats.paths,
            self.stats.blocks_executed
        );
        Ok(self.stats)
    }

    /// Storage variables and parameters, all in the global scope.
    fn initial_state(&self) -> PathState<'ctx> {
        let mut table = SymbolicTable::new(self.ctx);
        for var in &self.contract.storage {
            table.push_symbol(&var.name, &var.ty, Scope::Global);
            if let Some(init) = &var.value {
                let compiled = TermCompiler::new(&table, self.contract).compile_expr(init);
                let value = coerce(self.ctx, &compiled.term, Some(&var.ty));
                table.havoc(&var.name, value);
            }
        }
        for p in &self.function.parameters {
            table.push_symbol(&p.name, &p.ty, Scope::Global);
        }
        PathState {
            table,
            constraints: im::Vector::new(),
            loop_scopes: Vec::new(),
            iterated: im::OrdSet::new(),
        }
    }

    fn execute_block(
        &mut self,
        cfg: &mut Cfg,
        id: BlockId,
        mut state: PathState<'ctx>,
    ) -> Vec<(BlockId, PathState<'ctx>)> {
        let function: &'a FunctionIr = self.function;
        let instructions = cfg.block(id).instructions.clone();
        let is_header = instructions
            .first()
            .and_then(|&n| function.node(n))
            .is_some_and(|n| n.kind == NodeKind::LoopStart);
        if is_header && state.iterated.contains(&id) {
            return Vec::new();
        }

        for nid in instructions {
            let Some(node) = function.node(nid) else {
                continue;
            };
            match node.kind {
                NodeKind::Branch => return self.evaluate_branch(cfg, id, node, state),
                NodeKind::LoopCondition => return self.evaluate_loop_condition(cfg, id, node, state),
                NodeKind::LoopStart => state.loop_scopes.push(id),
                NodeKind::LoopEnd => {
                    state.loop_scopes.pop();
                }
                NodeKind::VariableDeclaration | NodeKind::Expression
                    if is_header && function.is_loop_init(node) =>
                {
                    self.loop_init(id, node, &mut state)
                }
                NodeKind::VariableDeclaration => self.declaration(id, node, &mut state),
                NodeKind::Expression => {
                    if let Some(e) = &node.expression {
                        self.expression(id, node, e, &mut state);
                    }
                }
                NodeKind::Return => {
                    if let Some(e) = &node.expression {
                        self.scan(id, node, e, &state);
                    }
                }
                NodeKind::Entry | NodeKind::BranchEnd | NodeKind::Other => {}
            }
        }

        match cfg.block(id).true_path {
            Some(next) => vec![(next, state)],
            None => Vec::new(),
        }
    }

    fn report(&mut self, id: BlockId, node: &Node, compiled: &Compiled<'ctx>, state: &PathState<'ctx>) {
        for access in &compiled.accesses {
            self.matcher
                .p4_expensive_operation_in_loop(id, node, access, &state.table, &state.loop_scopes);
        }
        for call in &compiled.calls {
            self.matcher.p5_loop_invariant_operation(
                id,
                node,
                call,
                &state.table,
                &state.loop_scopes,
                self.contract,
            );
        }
    }

    /// An expression evaluated only for its reads and calls.
    fn scan(&mut self, id: BlockId, node: &Node, e: &Expr, state: &PathState<'ctx>) {
        let compiled = TermCompiler::new(&state.table, self.contract).compile_expr(e);
        self.report(id, node, &compiled, state);
    }

    fn record_taint(&mut self, taint: Option<BlockId>, name: &str) {
        if let Some(l) = taint {
            self.matcher.record_loop_binding(l, name);
        }
    }

    fn declaration(&mut self, id: BlockId, node: &Node, state: &mut PathState<'ctx>) {
        let Some(decl) = &node.declaration else {
            return;
        };
        state
            .table
            .push_symbol(&decl.name, &decl.ty, Scope::of(&state.loop_scopes));
        if let Some(&l) = state.loop_scopes.last() {
            self.matcher.record_loop_binding(l, &decl.name);
        }

        match &decl.value {
            Some(init) => {
                let compiled = TermCompiler::new(&state.table, self.contract).compile_expr(init);
                self.report(id, node, &compiled, state);
                let value = coerce(self.ctx, &compiled.term, Some(&decl.ty));
                let taint =
                    state
                        .table
                        .update_symbol(&decl.name, value, &compiled.references, &state.loop_scopes);
                self.record_taint(taint, &decl.name);
            }
            None if decl.ty.has_zero_default() => {
                let zero = if decl.ty.is_bool() {
                    Dynamic::from_ast(&Bool::from_bool(self.ctx, false))
                } else {
                    Dynamic::from_ast(&Int::from_u64(self.ctx, 0))
                };
                state.table.havoc(&decl.name, zero);
            }
            None => {}
        }
    }

    fn expression(&mut self, id: BlockId, node: &Node, e: &Expr, state: &mut PathState<'ctx>) {
        match e {
            Expr::Assign(op, lhs, rhs) => self.assignment(id, node, *op, lhs, rhs, state),
            Expr::Unary(UnaryOp::Increment, target) => {
                self.assignment(id, node, AssignOp::Add, target, &Expr::val(1), state)
            }
            Expr::Unary(UnaryOp::Decrement, target) => {
                self.assignment(id, node, AssignOp::Sub, target, &Expr::val(1), state)
            }
            _ => self.scan(id, node, e, state),
        }
    }

    fn assignment(
        &mut self,
        id: BlockId,
        node: &Node,
        op: AssignOp,
        lhs: &Expr,
        rhs: &Expr,
        state: &mut PathState<'ctx>,
    ) {
        // the write itself
        self.matcher
            .p4_expensive_operation_in_loop(id, node, lhs, &state.table, &state.loop_scopes);

        let tc = TermCompiler::new(&state.table, self.contract);
        let value_expr = match op.arithmetic() {
            Some(bop) => Expr::binary(bop, lhs.clone(), rhs.clone()),
            None => rhs.clone(),
        };
        let mut compiled = tc.compile_expr(&value_expr);
        let key = tc.access_key(lhs, &mut compiled);
        let ty = tc.access_type(lhs);
        self.report(id, node, &compiled, state);

        if !lhs.is_access() {
            log::debug!("unresolved assignment target `{lhs}`");
            return;
        }
        let value = coerce(self.ctx, &compiled.term, ty.as_ref());
        let taint = state
            .table
            .update_symbol(&key, value, &compiled.references, &state.loop_scopes);
        self.record_taint(taint, &key);
    }

    /// The loop counter lives in the loop's scope and holds an arbitrary
    /// value there.
    fn loop_init(&mut self, id: BlockId, node: &Node, state: &mut PathState<'ctx>) {
        let Some(name) = node.assigned_name() else {
            return;
        };
        let ty = node
            .declaration
            .as_ref()
            .map(|d| d.ty.clone())
            .or_else(|| state.table.get_symbol(name).and_then(|s| s.ty.clone()))
            .unwrap_or_else(TypeName::uint);
        state.table.push_symbol(name, &ty, Scope::Loop(id));
        let fresh = unconstrained(self.ctx, &format!("{name}!{id}"), Some(&ty));
        state.table.havoc(name, fresh);
        self.matcher.record_loop_binding(id, name);
    }

    /// Compile a two-way node's condition, reporting its reads and calls.
    fn condition(
        &mut self,
        id: BlockId,
        node: &Node,
        state: &PathState<'ctx>,
    ) -> (Bool<'ctx>, BTreeSet<String>) {
        let tc = TermCompiler::new(&state.table, self.contract);
        let compiled = match tc.compile_condition(&node.operations) {
            Ok(c) => Some(c),
            Err(err) => {
                log::debug!("node {}: {err}", node.id);
                node.expression.as_ref().map(|e| tc.compile_predicate(e))
            }
        };
        match compiled {
            Some(c) => {
                self.report(id, node, &c, state);
                let cond = to_bool(self.ctx, &c.term).simplify();
                let mut refs = c.references;
                refs.extend(node.referenced_names());
                (cond, refs)
            }
            None => (
                Bool::new_const(self.ctx, format!("cond@{}", node.id)),
                node.referenced_names(),
            ),
        }
    }

    fn evaluate_branch(
        &mut self,
        cfg: &mut Cfg,
        id: BlockId,
        node: &Node,
        state: PathState<'ctx>,
    ) -> Vec<(BlockId, PathState<'ctx>)> {
        let (cond, refs) = self.condition(id, node, &state);
        let pc = state.constraint_list();

        let true_feasible = self.matcher.p1_redundant_code(id, node.id, &cond, &pc, true);
        let false_feasible =
            self.matcher.p2_opaque_predicate(id, node.id, &cond, &pc, true) != SatResult::Unsat;
        self.matcher
            .p6_loop_invariant_condition(id, node.id, &cond, &refs, &state.table, &state.loop_scopes);

        let block = cfg.block_mut(id);
        block.reachability.push(Reach {
            true_feasible,
            false_feasible,
        });

        let mut next = Vec::new();
        if let (true, Some(t)) = (true_feasible, block.true_path) {
            next.push((t, state.with_constraint(cond.clone())));
        }
        if let (true, Some(f)) = (false_feasible, block.false_path) {
            next.push((f, state.with_constraint(cond.not())));
        }
        next
    }

    /// Loop edges are taken without a feasibility check and add no
    /// constraint: one unrolled iteration says nothing about the guard.
    fn evaluate_loop_condition(
        &mut self,
        cfg: &mut Cfg,
        id: BlockId,
        node: &Node,
        mut state: PathState<'ctx>,
    ) -> Vec<(BlockId, PathState<'ctx>)> {
        self.condition(id, node, &state);
        let written = self.written_in_loop(cfg, id);

        let block = cfg.block_mut(id);
        let mut next = Vec::new();
        if !block.visited {
            block.visited = true;
            state.iterated.insert(id);
            if let Some(body) = block.true_path {
                next.push((body, state.clone()));
            }
        }
        if let Some(exit) = block.false_path {
            let forgotten = state.table.forget(&written, &format!("exit{id}"));
            if !forgotten.is_empty() {
                log::debug!("leaving loop {id}: forgetting {}", forgotten.join(", "));
            }
            next.push((exit, state));
        }
        next
    }

    /// Assignment targets and storage writes of every node nested in the
    /// loop headed by `header`.
    fn written_in_loop(&mut self, cfg: &Cfg, header: BlockId) -> BTreeSet<String> {
        if let Some(written) = self.loop_writes.get(&header) {
            return written.clone();
        }
        let function: &'a FunctionIr = self.function;
        let mut written = BTreeSet::new();
        for b in cfg.loop_body(header) {
            for node in cfg.block(b).instructions.iter().filter_map(|&n| function.node(n)) {
                written.extend(node.assigned_name().map(str::to_string));
                written.extend(node.storage_written.iter().cloned());
            }
        }
        self.loop_writes.insert(header, written.clone());
        written
    }
}

/// Fit a compiled value to the sort its declared type implies.
fn coerce<'ctx>(ctx: &'ctx Context, term: &Dynamic<'ctx>, ty: Option<&TypeName>) -> Dynamic<'ctx> {
    let term = if ty.is_some_and(TypeName::is_bool) {
        Dynamic::from_ast(&to_bool(ctx, term))
    } else {
        term.clone()
    };
    term.simplify()
}
