//! Exact-or-conservative dependence test between two affine accesses.
//!
//! The test builds the integer system "both accesses execute, touch the
//! same element, and the source comes first at the given loop depth" and
//! checks it for emptiness.
//!
//! Variables: one induction variable per enclosing loop on each side, one
//! shared variable per value defined outside both loop nests, one
//! unconstrained per-side variable for every other leaf, and a local
//! quotient per loop with a step other than one.

use crate::analysis::access::{compose_expr, LinearExpr, MemRefAccess};
use crate::analysis::constraints::FlatConstraints;
use crate::analysis::loops::{enclosing_loops, num_common_surrounding_loops};
use crate::graph::{BlockId, Graph, OpId, ValueDef, ValueId};
use crate::ops::OpKind;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependenceResult {
    NoDependence,
    HasDependence,
    /// The system could not be built (non-affine index or bound, or
    /// arithmetic overflow).
    Failure,
}

impl DependenceResult {
    pub fn has_dependence(self) -> bool {
        self != DependenceResult::NoDependence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Src,
    Dst,
    Shared,
}

/// Sparse row over system variables.
#[derive(Debug, Clone, Default)]
struct Row {
    terms: BTreeMap<usize, i64>,
    constant: i64,
}

impl Row {
    fn var(index: usize) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(index, 1);
        Row { terms, constant: 0 }
    }

    /// `self + scale * other`
    fn plus(&self, other: &Row, scale: i64) -> Option<Row> {
        let mut out = self.clone();
        out.constant = out
            .constant
            .checked_add(other.constant.checked_mul(scale)?)?;
        for (&k, &c) in &other.terms {
            let entry = out.terms.entry(k).or_insert(0);
            *entry = entry.checked_add(c.checked_mul(scale)?)?;
        }
        Some(out)
    }

    fn offset(mut self, by: i64) -> Option<Row> {
        self.constant = self.constant.checked_add(by)?;
        Some(self)
    }

    fn dense(&self, num_vars: usize) -> Vec<i64> {
        let mut row = vec![0; num_vars + 1];
        for (&k, &c) in &self.terms {
            row[k] = c;
        }
        row[num_vars] = self.constant;
        row
    }
}

struct SystemBuilder<'g> {
    graph: &'g Graph,
    fc: FlatConstraints,
    vars: HashMap<(Side, ValueId), usize>,
    src_loops: Vec<OpId>,
    dst_loops: Vec<OpId>,
}

impl<'g> SystemBuilder<'g> {
    fn loops(&self, side: Side) -> &[OpId] {
        match side {
            Side::Dst => &self.dst_loops,
            _ => &self.src_loops,
        }
    }

    /// Whether `value` is defined inside any loop of either nest.
    fn defined_in_nest(&self, value: ValueId) -> bool {
        let holder = match self.graph.value(value).def {
            ValueDef::OpResult { op, .. } => Some(op),
            ValueDef::BlockArg { block, .. } => self.graph.block_parent_op(block),
        };
        let Some(holder) = holder else {
            return false;
        };
        self.src_loops
            .iter()
            .chain(&self.dst_loops)
            .any(|&l| self.graph.is_ancestor(l, holder))
    }

    fn var(&mut self, side: Side, value: ValueId) -> usize {
        let is_iv = self
            .loops(side)
            .iter()
            .any(|&l| self.graph.induction_var(l) == value);
        let key = if !is_iv && !self.defined_in_nest(value) {
            (Side::Shared, value)
        } else {
            (side, value)
        };
        if let Some(&index) = self.vars.get(&key) {
            return index;
        }
        let index = self.fc.add_var();
        self.vars.insert(key, index);
        index
    }

    fn row(&mut self, side: Side, expr: &LinearExpr) -> Row {
        let mut row = Row {
            terms: BTreeMap::new(),
            constant: expr.constant,
        };
        for (&value, &coeff) in &expr.coeffs {
            let index = self.var(side, value);
            row.terms.insert(index, coeff);
        }
        row
    }

    fn add_ge(&mut self, row: &Row) {
        let dense = row.dense(self.fc.num_vars());
        self.fc.add_inequality(dense);
    }

    fn add_eq(&mut self, row: &Row) {
        let dense = row.dense(self.fc.num_vars());
        self.fc.add_equality(dense);
    }

    /// Bounds of every loop around one side. `None` if a bound is not affine.
    fn add_loop_bounds(&mut self, side: Side) -> Option<()> {
        let graph = self.graph;
        for l in self.loops(side).to_vec() {
            let OpKind::AffineFor { lower, upper, step } = graph.kind(l) else {
                continue;
            };
            let iv = Row::var(self.var(side, graph.induction_var(l)));
            let lower_ops = graph.for_lower_operands(l);
            let upper_ops = graph.for_upper_operands(l);

            let mut lower_rows = Vec::with_capacity(lower.num_results());
            for r in &lower.results {
                let e = compose_expr(graph, r, lower.num_dims, lower.num_symbols, lower_ops)?;
                let lb = self.row(side, &e);
                self.add_ge(&iv.plus(&lb, -1)?);
                lower_rows.push(lb);
            }
            for r in &upper.results {
                let e = compose_expr(graph, r, upper.num_dims, upper.num_symbols, upper_ops)?;
                let ub = self.row(side, &e);
                self.add_ge(&ub.plus(&iv, -1)?.offset(-1)?);
            }
            if *step > 1 {
                if let [lb] = lower_rows.as_slice() {
                    let q = Row::var(self.fc.add_var());
                    self.add_eq(&iv.plus(lb, -1)?.plus(&q, -*step)?);
                    self.add_ge(&q);
                }
            }
        }
        Some(())
    }

    /// Conditions of `affine.if` operations holding `op` in a `then` block.
    fn add_guards(&mut self, side: Side, op: OpId) {
        let graph = self.graph;
        let mut child = op;
        while let Some(parent) = graph.parent_op(child) {
            if graph.kind(parent).traits().is_affine_scope() {
                break;
            }
            if let OpKind::AffineIf { set } = graph.kind(parent) {
                if graph.parent_block(child) == graph.if_then_block(parent) {
                    let operands = &graph.op(parent).operands;
                    for (c, &is_eq) in set.constraints.iter().zip(&set.eq_flags) {
                        let Some(e) = compose_expr(graph, c, set.num_dims, set.num_symbols, operands)
                        else {
                            continue;
                        };
                        let row = self.row(side, &e);
                        if is_eq {
                            self.add_eq(&row);
                        } else {
                            self.add_ge(&row);
                        }
                    }
                }
            }
            child = parent;
        }
    }
}

/// Ancestors of `op` paired with the block holding each, innermost first.
fn ancestor_chain(graph: &Graph, op: OpId) -> Vec<(BlockId, OpId)> {
    let mut chain = vec![(graph.parent_block(op), op)];
    let mut current = op;
    while let Some(parent) = graph.parent_op(current) {
        chain.push((graph.parent_block(parent), parent));
        current = parent;
    }
    chain
}

/// Whether `src` executes before `dst` within the deepest block holding
/// ancestors of both. Answers `true` when this cannot be decided, which
/// includes one operation nesting the other.
fn src_appears_before_dst(graph: &Graph, src: OpId, dst: OpId) -> bool {
    let src_chain = ancestor_chain(graph, src);
    for (block, d) in ancestor_chain(graph, dst) {
        if let Some(&(_, s)) = src_chain.iter().find(|(b, _)| *b == block) {
            return s == d || graph.is_before_in_block(s, d);
        }
    }
    true
}

/// Checks whether `src` and `dst` may touch the same element with `src`
/// first, carried at `loop_depth` (1-based; `common + 1` means the
/// dependence is within one iteration of all common loops).
pub fn check_memref_access_dependence(
    graph: &Graph,
    src: &MemRefAccess,
    dst: &MemRefAccess,
    loop_depth: usize,
) -> DependenceResult {
    if src.memref != dst.memref || (!src.is_store && !dst.is_store) {
        return DependenceResult::NoDependence;
    }
    let num_common = num_common_surrounding_loops(graph, src.op, dst.op);
    if loop_depth > num_common && !src_appears_before_dst(graph, src.op, dst.op) {
        return DependenceResult::NoDependence;
    }
    if src.rank() != dst.rank() {
        return DependenceResult::Failure;
    }

    let mut builder = SystemBuilder {
        graph,
        fc: FlatConstraints::new(0),
        vars: HashMap::new(),
        src_loops: enclosing_loops(graph, src.op),
        dst_loops: enclosing_loops(graph, dst.op),
    };
    match build_system(&mut builder, src, dst, num_common, loop_depth) {
        Some(()) => {}
        None => return DependenceResult::Failure,
    }
    if builder.fc.is_empty() {
        DependenceResult::NoDependence
    } else {
        DependenceResult::HasDependence
    }
}

fn build_system(
    b: &mut SystemBuilder<'_>,
    src: &MemRefAccess,
    dst: &MemRefAccess,
    num_common: usize,
    loop_depth: usize,
) -> Option<()> {
    b.add_loop_bounds(Side::Src)?;
    b.add_loop_bounds(Side::Dst)?;
    b.add_guards(Side::Src, src.op);
    b.add_guards(Side::Dst, dst.op);

    for (s, d) in src.indices.iter().zip(&dst.indices) {
        let (s, d) = (s.as_ref()?, d.as_ref()?);
        let s = b.row(Side::Src, s);
        let d = b.row(Side::Dst, d);
        b.add_eq(&s.plus(&d, -1)?);
    }

    let graph = b.graph;
    for i in 0..num_common.min(loop_depth) {
        let iv = graph.induction_var(b.src_loops[i]);
        let s = Row::var(b.var(Side::Src, iv));
        let d = Row::var(b.var(Side::Dst, iv));
        let diff = d.plus(&s, -1)?;
        if i + 1 < loop_depth {
            b.add_eq(&diff);
        } else {
            b.add_ge(&diff.offset(-1)?);
        }
    }
    Some(())
}
