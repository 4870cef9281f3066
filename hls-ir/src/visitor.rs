//! Structural walks over regions.
//!
//! Walks borrow the graph immutably: passes collect the operations they
//! care about first and mutate afterwards.

use crate::graph::{Graph, OpId, RegionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    /// An operation before the operations nested in it.
    PreOrder,
    /// Nested operations before the operation holding them.
    PostOrder,
}

pub fn walk_region(graph: &Graph, region: RegionId, order: WalkOrder, f: &mut impl FnMut(OpId)) {
    for &block in &graph.region(region).blocks {
        for &op in &graph.block(block).ops {
            walk_op(graph, op, order, f);
        }
    }
}

/// Visits `op` and everything nested in it.
pub fn walk_op(graph: &Graph, op: OpId, order: WalkOrder, f: &mut impl FnMut(OpId)) {
    if order == WalkOrder::PreOrder {
        f(op);
    }
    for &region in &graph.op(op).regions {
        walk_region(graph, region, order, f);
    }
    if order == WalkOrder::PostOrder {
        f(op);
    }
}

/// Operations nested in `region` (at any depth) matching `pred`, in
/// pre-order.
pub fn collect_ops(graph: &Graph, region: RegionId, pred: impl Fn(&Graph, OpId) -> bool) -> Vec<OpId> {
    let mut out = Vec::new();
    walk_region(graph, region, WalkOrder::PreOrder, &mut |op| {
        if pred(graph, op) {
            out.push(op);
        }
    });
    out
}
