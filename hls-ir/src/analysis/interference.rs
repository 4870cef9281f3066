//! Whether some operation between two points may touch an access's memory.

use crate::analysis::access::MemRefAccess;
use crate::analysis::dependence::check_memref_access_dependence;
use crate::analysis::loops::{affine_scope, num_common_surrounding_loops};
use crate::effects::{is_locally_allocated, memory_effects, EffectKind};
use crate::graph::{BlockId, Graph, OpId, ValueId};
use hls_support::FastHashSet;

struct Checker<'g> {
    graph: &'g Graph,
    kind: EffectKind,
    start: OpId,
    end: &'g MemRefAccess,
    memref: ValueId,
    min_loops: usize,
}

impl<'g> Checker<'g> {
    /// Whether `op` (or anything nested in it) may have the effect on the
    /// end access's memory.
    fn check_operation(&self, op: OpId) -> bool {
        let graph = self.graph;
        let Some(effects) = memory_effects(graph, op) else {
            if graph.kind(op).traits().has_recursive_effects() {
                return graph.op(op).regions.iter().any(|&region| {
                    graph.region(region).blocks.iter().any(|&block| {
                        graph
                            .block(block)
                            .ops
                            .iter()
                            .any(|&inner| self.check_operation(inner))
                    })
                });
            }
            log::trace!("{:?} ({}) is opaque", op, graph.kind(op).name());
            return true;
        };

        for effect in effects.iter().filter(|e| e.kind == self.kind) {
            if let Some(value) = effect.value {
                if value != self.memref
                    && is_locally_allocated(graph, value)
                    && is_locally_allocated(graph, self.memref)
                {
                    continue;
                }
            }
            let kind = graph.kind(op);
            if !(kind.is_affine_load() || kind.is_affine_store()) {
                log::trace!("{:?} ({}) may interfere", op, kind.name());
                return true;
            }
            if graph.memref_operand(op) != Some(self.memref) {
                return false;
            }
            let scope = affine_scope(graph, op);
            if scope != affine_scope(graph, self.start) || scope != affine_scope(graph, self.end.op) {
                return true;
            }
            let Some(src) = MemRefAccess::from_op(graph, op) else {
                return true;
            };
            let ns_loops = num_common_surrounding_loops(graph, op, self.end.op);
            for depth in (self.min_loops + 1..=ns_loops + 1).rev() {
                let result = check_memref_access_dependence(graph, &src, self.end, depth);
                if result.has_dependence() {
                    log::trace!("{:?} depends on {:?} at depth {}: {:?}", op, self.end.op, depth, result);
                    return true;
                }
            }
            return false;
        }
        false
    }

    /// Checks every path from `from` to `until`; `from`'s region must
    /// enclose `until`'s.
    fn recur(&self, from: OpId, until: OpId) -> bool {
        let graph = self.graph;
        if graph.parent_region(from) != graph.parent_region(until) {
            let Some(parent) = graph.parent_op(until) else {
                return true;
            };
            // Paths from the parent to `until` are covered by checking the
            // whole parent.
            return self.recur(from, parent) || self.check_operation(parent);
        }

        let from_block = graph.parent_block(from);
        let ops = &graph.block(from_block).ops;
        let after = graph.position_in_block(from) + 1;
        for &op in ops[after..].iter().take_while(|&&op| op != until) {
            if self.check_operation(op) {
                return true;
            }
        }

        let mut todo: Vec<BlockId> = Vec::new();
        if graph.parent_block(until) != from_block {
            todo.extend(graph.block_successors(from_block));
        }
        let mut done = FastHashSet::default();
        while let Some(block) = todo.pop() {
            if !done.insert(block) {
                continue;
            }
            let term = graph.terminator(block);
            for &op in &graph.block(block).ops {
                if op == until {
                    break;
                }
                if self.check_operation(op) {
                    return true;
                }
                if Some(op) == term {
                    todo.extend(graph.block_successors(block));
                }
            }
        }
        false
    }
}

/// Whether any operation on a path from `start` to the access `end`, both
/// exclusive, may have an effect of `kind` on the memory `end` touches.
///
/// Different buffers are assumed not to alias. Answers `true` whenever the
/// question cannot be decided, including when `end` is not an affine access
/// or `start`'s region does not enclose `end`.
pub fn has_effect_between(graph: &Graph, kind: EffectKind, start: OpId, end: OpId) -> bool {
    let Some(access) = MemRefAccess::from_op(graph, end) else {
        return true;
    };
    if !graph.region_is_ancestor(graph.parent_region(start), graph.parent_region(end)) {
        return true;
    }
    let checker = Checker {
        graph,
        kind,
        start,
        end: &access,
        memref: access.memref,
        min_loops: num_common_surrounding_loops(graph, start, end),
    };
    checker.recur(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::{AffineExpr, AffineMap};
    use crate::builder::Builder;
    use crate::module::Function;
    use hls_core::Type;

    #[test]
    fn test_straight_line() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, ty, Type::INDEX, Type::F32], &[]);
        let args = func.arguments().to_vec();
        let (a, other, i, v) = (args[0], args[1], args[2], args[3]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let id = AffineMap::identity(1);
        let first = b.affine_store(v, a, id.clone(), vec![i]);
        b.affine_store(v, other, id.clone(), vec![i]);
        let shifted = b.affine_store(v, a, AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 1]), vec![i]);
        let ld = b.affine_load(a, id.clone(), vec![i]);
        let same = b.affine_store(v, a, id.clone(), vec![i]);
        let ld2 = b.affine_load(a, id, vec![i]);
        let g = &func.graph;
        let (ld, ld2) = (g.defining_op(ld).unwrap(), g.defining_op(ld2).unwrap());

        // other buffer and a provably different element do not interfere
        assert!(!has_effect_between(g, EffectKind::Write, first, ld));
        assert!(!has_effect_between(g, EffectKind::Write, shifted, ld));
        // same element written in between
        assert!(has_effect_between(g, EffectKind::Write, first, ld2));
        assert!(!has_effect_between(g, EffectKind::Write, same, ld2));
        assert!(has_effect_between(g, EffectKind::Read, first, same));
    }

    #[test]
    fn test_opaque_call_interferes() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::F32], &[]);
        let (a, i, v) = (func.arguments()[0], func.arguments()[1], func.arguments()[2]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let st = b.affine_store(v, a, AffineMap::identity(1), vec![i]);
        b.call("external", vec![], &[]);
        let ld = b.affine_load(a, AffineMap::identity(1), vec![i]);
        let g = &func.graph;
        assert!(has_effect_between(g, EffectKind::Write, st, g.defining_op(ld).unwrap()));
    }

    #[test]
    fn test_local_buffers_do_not_interfere() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[Type::INDEX, Type::F32], &[]);
        let (i, v) = (func.arguments()[0], func.arguments()[1]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let local = b.alloc(ty);
        let scratch = b.alloc(ty);
        let st = b.affine_store(v, local, AffineMap::identity(1), vec![i]);
        b.store(v, scratch, vec![i]);
        let ld = b.affine_load(local, AffineMap::identity(1), vec![i]);
        let g = &func.graph;
        assert!(!has_effect_between(g, EffectKind::Write, st, g.defining_op(ld).unwrap()));
    }

    #[test]
    fn test_loop_between() {
        // store a[0]; for j in 1..4 { a[j] = v }; load a[0]
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::F32], &[]);
        let (a, v) = (func.arguments()[0], func.arguments()[1]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let zero = AffineMap::constant(0);
        let st = b.affine_store(v, a, zero.clone(), vec![]);
        let lp = b.affine_for_const(1, 4, 1);
        b.set_insertion_point_to_body(lp.body);
        b.affine_store(v, a, AffineMap::identity(1), vec![lp.iv]);
        b.set_insertion_point_to_end(entry);
        let ld = b.affine_load(a, zero.clone(), vec![]);
        let wide = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(wide.body);
        b.affine_store(v, a, AffineMap::identity(1), vec![wide.iv]);
        b.set_insertion_point_to_end(entry);
        let ld2 = b.affine_load(a, zero, vec![]);
        let g = &func.graph;
        let (ld, ld2) = (g.defining_op(ld).unwrap(), g.defining_op(ld2).unwrap());
        assert!(!has_effect_between(g, EffectKind::Write, st, ld));
        assert!(has_effect_between(g, EffectKind::Write, ld, ld2));
    }

    #[test]
    fn test_into_nested_region() {
        // store a[i]; for j { load a[i] } with a write to a[i] before it
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::F32], &[]);
        let (a, i, v) = (func.arguments()[0], func.arguments()[1], func.arguments()[2]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let id = AffineMap::identity(1);
        let st = b.affine_store(v, a, id.clone(), vec![i]);
        let lp = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(lp.body);
        let ld = b.affine_load(a, id.clone(), vec![i]);
        let g = &func.graph;
        let ld = g.defining_op(ld).unwrap();
        assert!(!has_effect_between(g, EffectKind::Write, st, ld));

        let mut b = Builder::before(&mut func.graph, ld);
        b.affine_store(v, a, id, vec![i]);
        let g = &func.graph;
        assert!(has_effect_between(g, EffectKind::Write, st, ld));
    }
}
