//! Queries over the `affine.for` nest surrounding an operation.

use crate::graph::{Graph, OpId};
use crate::ops::OpKind;

/// The closest proper ancestor of `op` that opens an affine scope, or
/// `None` when only the function body encloses it.
pub fn affine_scope(graph: &Graph, op: OpId) -> Option<OpId> {
    let mut current = graph.parent_op(op);
    while let Some(parent) = current {
        if graph.kind(parent).traits().is_affine_scope() {
            return Some(parent);
        }
        current = graph.parent_op(parent);
    }
    None
}

/// `affine.for` operations enclosing `op` within its affine scope,
/// outermost first.
pub fn enclosing_loops(graph: &Graph, op: OpId) -> Vec<OpId> {
    let mut loops = Vec::new();
    let mut current = graph.parent_op(op);
    while let Some(parent) = current {
        let kind = graph.kind(parent);
        if kind.traits().is_affine_scope() {
            break;
        }
        if kind.is_affine_for() {
            loops.push(parent);
        }
        current = graph.parent_op(parent);
    }
    loops.reverse();
    loops
}

/// Length of the common prefix of the loop nests around `a` and `b`.
pub fn num_common_surrounding_loops(graph: &Graph, a: OpId, b: OpId) -> usize {
    let (la, lb) = (enclosing_loops(graph, a), enclosing_loops(graph, b));
    la.iter().zip(lb.iter()).take_while(|(x, y)| x == y).count()
}

pub fn constant_lower_bound(graph: &Graph, for_op: OpId) -> Option<i64> {
    match graph.kind(for_op) {
        OpKind::AffineFor { lower, .. } => lower.single_constant_result(),
        _ => None,
    }
}

pub fn constant_upper_bound(graph: &Graph, for_op: OpId) -> Option<i64> {
    match graph.kind(for_op) {
        OpKind::AffineFor { upper, .. } => upper.single_constant_result(),
        _ => None,
    }
}

pub fn step(graph: &Graph, for_op: OpId) -> Option<i64> {
    match graph.kind(for_op) {
        OpKind::AffineFor { step, .. } => Some(*step),
        _ => None,
    }
}
