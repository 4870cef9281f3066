use crate::affine::{AffineExpr, IntegerSet};
use crate::analysis::loops::{constant_lower_bound, constant_upper_bound, step};
use crate::builder::Builder;
use crate::error::PerfectionError;
use crate::graph::{BlockId, Graph, OpId};
use crate::module::{Function, Module};
use crate::pass::Pass;
use crate::visitor::{walk_op, WalkOrder};

/// Loop nest perfection.
///
/// For every top-level `affine.for` of a function:
/// 1. Collect the chain of nested loops, innermost first. Every loop must be
///    the direct parent of the previous one.
/// 2. For every loop with statements before its inner loop, sink them into
///    the innermost body behind a guard that holds on the first iteration
///    of all loops in between.
/// 3. Statements after the inner loop are sunk behind a guard that holds on
///    the last iteration.
///
/// Statements producing results move unconditionally in front of their
/// guard, so their results may only feed ops that land in the innermost
/// body. A nest that cannot be rewritten is reported in [`errors`] and left
/// untouched.
///
/// [`errors`]: AffineLoopPerfection::errors
pub struct AffineLoopPerfection {
    errors: Vec<PerfectionError>,
    perfected: usize,
}

/// Statements of one loop level, with the loops they get guarded by.
struct Level {
    front: Vec<OpId>,
    back: Vec<OpId>,
    /// Loops nested inside this level, innermost first.
    inner: Vec<OpId>,
    /// First and last induction values of `inner`, filled only when the
    /// matching statement list is non-empty.
    first: Vec<i64>,
    last: Vec<i64>,
}

impl AffineLoopPerfection {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            perfected: 0,
        }
    }

    pub fn errors(&self) -> &[PerfectionError] {
        &self.errors
    }

    /// Number of nests that needed and received a rewrite.
    pub fn perfected(&self) -> usize {
        self.perfected
    }

    pub fn run_on_function(&mut self, func: &mut Function) {
        let graph = &func.graph;
        let top_level: Vec<OpId> = graph
            .region(func.body)
            .blocks
            .iter()
            .flat_map(|&block| graph.block(block).ops.iter().copied())
            .filter(|&op| graph.kind(op).is_affine_for())
            .collect();

        for root in top_level {
            match plan_nest(&func.graph, &func.name, root) {
                Ok(levels) if levels.is_empty() => {}
                Ok(levels) => {
                    let innermost = levels[0].inner[0];
                    for level in &levels {
                        rewrite_level(&mut func.graph, innermost, level);
                    }
                    self.perfected += 1;
                    log::debug!("perfected loop nest {:?} in '{}'", root, func.name);
                }
                Err(err) => {
                    log::error!("{}", err);
                    self.errors.push(err);
                }
            }
        }
    }
}

impl Default for AffineLoopPerfection {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for AffineLoopPerfection {
    fn name(&self) -> &str {
        "affine-loop-perfection"
    }

    fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on_function(func);
        }
    }
}

/// Checks the nest and gathers what moves where, without touching it.
/// Levels come innermost first; only levels with statements to sink are
/// returned.
fn plan_nest(graph: &Graph, function: &str, root: OpId) -> Result<Vec<Level>, PerfectionError> {
    let mut chain: Vec<OpId> = Vec::new();
    let mut parallel = false;
    walk_op(graph, root, WalkOrder::PostOrder, &mut |op| {
        if parallel || !graph.kind(op).is_affine_for() {
            return;
        }
        if let Some(&previous) = chain.last() {
            if graph.parent_op(previous) != Some(op) {
                parallel = true;
                return;
            }
        }
        chain.push(op);
    });
    if parallel {
        return Err(PerfectionError::ParallelInnerLoops {
            function: function.to_string(),
            root,
        });
    }

    let mut levels = Vec::new();
    for k in 1..chain.len() {
        let (outer, inner_loop) = (chain[k], chain[k - 1]);
        let ops = &graph.block(graph.for_body(outer)).ops;
        let split = graph.position_in_block(inner_loop);
        let front = ops[..split].to_vec();
        let back: Vec<OpId> = ops[split + 1..]
            .iter()
            .copied()
            .filter(|&op| !graph.kind(op).traits().is_terminator())
            .collect();
        if front.is_empty() && back.is_empty() {
            continue;
        }
        let inner = chain[..k].to_vec();
        let (mut first, mut last) = (Vec::new(), Vec::new());
        for &lp in &inner {
            if !front.is_empty() {
                let Some(lb) = constant_lower_bound(graph, lp) else {
                    return Err(PerfectionError::NonConstantLowerBound {
                        function: function.to_string(),
                        loop_op: lp,
                    });
                };
                first.push(lb);
            }
            if !back.is_empty() {
                last.push(last_iteration(graph, function, lp)?);
            }
        }
        levels.push(Level {
            front,
            back,
            inner,
            first,
            last,
        });
    }
    check_sunk_results(graph, function, &levels)?;
    Ok(levels)
}

/// Sunk results must only be used by ops that end up in the innermost body.
/// Bound operands of the loops being crossed do not.
fn check_sunk_results(graph: &Graph, function: &str, levels: &[Level]) -> Result<(), PerfectionError> {
    let Some(innermost) = levels.first().map(|level| level.inner[0]) else {
        return Ok(());
    };
    let sunk: Vec<OpId> = levels
        .iter()
        .flat_map(|level| level.front.iter().chain(&level.back).copied())
        .collect();
    for &op in &sunk {
        for &result in &graph.op(op).results {
            for user in graph.users(result) {
                let moves_along = graph.is_proper_ancestor(innermost, user)
                    || sunk.iter().any(|&s| graph.is_ancestor(s, user));
                if !moves_along {
                    return Err(PerfectionError::EscapingResult {
                        function: function.to_string(),
                        op,
                        user,
                    });
                }
            }
        }
    }
    Ok(())
}

/// The induction variable's value on the final iteration.
fn last_iteration(graph: &Graph, function: &str, lp: OpId) -> Result<i64, PerfectionError> {
    let Some(ub) = constant_upper_bound(graph, lp) else {
        return Err(PerfectionError::NonConstantUpperBound {
            function: function.to_string(),
            loop_op: lp,
        });
    };
    let step = step(graph, lp).unwrap_or(1);
    if step == 1 {
        return Ok(ub - 1);
    }
    let Some(lb) = constant_lower_bound(graph, lp) else {
        return Err(PerfectionError::NonConstantLowerBound {
            function: function.to_string(),
            loop_op: lp,
        });
    };
    Ok(lb + (ub - lb - 1).div_euclid(step) * step)
}

fn rewrite_level(graph: &mut Graph, innermost: OpId, level: &Level) {
    let body = graph.for_body(innermost);
    let ivs: Vec<_> = level.inner.iter().map(|&lp| graph.induction_var(lp)).collect();
    let n = level.inner.len() as u32;

    if !level.front.is_empty() {
        let exprs = level
            .first
            .iter()
            .enumerate()
            .map(|(i, &lb)| AffineExpr::dim(i as u32) - lb)
            .collect();
        let set = IntegerSet::new(n, 0, exprs, vec![true; n as usize]);
        let first = graph.block(body).ops[0];
        let guard = Builder::before(&mut *graph, first).affine_if(set, ivs.clone(), false);
        sink(graph, &level.front, guard.op, guard.then_block);
    }

    if !level.back.is_empty() {
        let exprs = level
            .last
            .iter()
            .enumerate()
            .map(|(i, &last)| AffineExpr::constant(last) - AffineExpr::dim(i as u32))
            .collect();
        let set = IntegerSet::new(n, 0, exprs, vec![true; n as usize]);
        let terminator = graph.yield_of(body);
        let guard = Builder::before(&mut *graph, terminator).affine_if(set, ivs, false);
        sink(graph, &level.back, guard.op, guard.then_block);
    }
}

fn sink(graph: &mut Graph, ops: &[OpId], guard: OpId, then_block: BlockId) {
    let then_yield = graph.yield_of(then_block);
    for &op in ops {
        if graph.op(op).results.is_empty() {
            graph.move_op_before(op, then_yield);
        } else {
            graph.move_op_before(op, guard);
        }
    }
}
