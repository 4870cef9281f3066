use crate::analysis::access::MemRefAccess;
use crate::analysis::interference::has_effect_between;
use crate::builder::Builder;
use crate::dataflow::{DominanceInfo, PostDominanceInfo};
use crate::effects::{has_single_effect, EffectKind};
use crate::graph::{Graph, OpId, ValueId};
use crate::module::{Function, Module};
use crate::pass::Pass;
use crate::visitor::collect_ops;
use hls_support::FastHashSet;
use std::collections::BTreeSet;

/// Affine memory dataflow optimization.
///
/// This pass performs, per function:
/// 1. Store-to-load forwarding, including stores guarded by a single-branch
///    `affine.if` (rewritten into an unconditional store of an
///    `affine.select`)
/// 2. Redundant load elimination
/// 3. Dead store elimination
/// 4. Removal of local buffers that are only written and freed
///
/// Different buffers are assumed never to alias.
pub struct AffineStoreForward {
    stats: ForwardStats,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded_loads: usize,
    pub eliminated_loads: usize,
    pub dead_stores: usize,
    pub reaped_buffers: usize,
}

impl ForwardStats {
    pub fn total(&self) -> usize {
        self.forwarded_loads + self.eliminated_loads + self.dead_stores + self.reaped_buffers
    }
}

impl std::ops::AddAssign for ForwardStats {
    fn add_assign(&mut self, rhs: ForwardStats) {
        self.forwarded_loads += rhs.forwarded_loads;
        self.eliminated_loads += rhs.eliminated_loads;
        self.dead_stores += rhs.dead_stores;
        self.reaped_buffers += rhs.reaped_buffers;
    }
}

impl AffineStoreForward {
    pub fn new() -> Self {
        Self {
            stats: ForwardStats::default(),
        }
    }

    /// Totals over every function processed so far.
    pub fn stats(&self) -> ForwardStats {
        self.stats
    }

    pub fn run_on_function(&mut self, func: &mut Function) -> ForwardStats {
        let body = func.body;
        let mut rewriter = Rewriter {
            graph: &mut func.graph,
            dom: DominanceInfo::new(),
            pdom: PostDominanceInfo::new(),
            to_erase: Vec::new(),
            pending: FastHashSet::default(),
            memrefs_to_erase: BTreeSet::new(),
            stats: ForwardStats::default(),
        };

        let loads = collect_ops(rewriter.graph, body, |g, op| g.kind(op).is_affine_load());
        for load in loads {
            rewriter.process_load(load);
        }
        rewriter.flush();

        let stores = collect_ops(rewriter.graph, body, |g, op| g.kind(op).is_affine_store());
        for store in stores {
            rewriter.find_unused_store(store);
        }
        rewriter.flush();

        rewriter.reap_buffers();

        let stats = rewriter.stats;
        log::debug!("affine-store-forward on '{}': {:?}", func.name, stats);
        self.stats += stats;
        stats
    }
}

impl Default for AffineStoreForward {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for AffineStoreForward {
    fn name(&self) -> &str {
        "affine-store-forward"
    }

    fn run(&mut self, module: &mut Module) {
        for func in &mut module.functions {
            self.run_on_function(func);
        }
    }
}

enum Forward {
    /// No store could be forwarded.
    None,
    /// The load was replaced by the stored value.
    Done,
    /// A guarded store was forwarded through a select; the returned load
    /// is new and may itself be forwarded.
    Retry(OpId),
}

struct Rewriter<'g> {
    graph: &'g mut Graph,
    dom: DominanceInfo,
    pdom: PostDominanceInfo,
    to_erase: Vec<OpId>,
    pending: FastHashSet<OpId>,
    memrefs_to_erase: BTreeSet<ValueId>,
    stats: ForwardStats,
}

impl<'g> Rewriter<'g> {
    fn schedule_erase(&mut self, op: OpId) {
        if self.pending.insert(op) {
            self.to_erase.push(op);
        }
    }

    fn flush(&mut self) {
        for op in std::mem::take(&mut self.to_erase) {
            // Nested operations go with their erased parent.
            if self.graph.contains_op(op) {
                self.graph.erase_op(op);
            }
        }
        self.pending.clear();
        self.dom.invalidate();
        self.pdom.invalidate();
    }

    fn process_load(&mut self, load: OpId) {
        let mut current = load;
        loop {
            if !self.graph.contains_op(current) || self.pending.contains(&current) {
                return;
            }
            match self.forward_store_to_load(current) {
                Forward::Done => return,
                Forward::Retry(next) => current = next,
                Forward::None => {
                    self.load_cse(current);
                    return;
                }
            }
        }
    }

    /// The operation that stands for `store` when checking dominance: the
    /// enclosing single-branch conditional when the store is its only
    /// statement and the conditional's region encloses `region_of`.
    fn start_point(&self, store: OpId, region_of: OpId) -> OpId {
        let graph = &*self.graph;
        match graph.sole_guarding_if(store) {
            Some(if_op)
                if graph.region_is_ancestor(graph.parent_region(if_op), graph.parent_region(region_of)) =>
            {
                if_op
            }
            _ => store,
        }
    }

    fn forward_store_to_load(&mut self, load: OpId) -> Forward {
        let graph = &*self.graph;
        let Some(load_access) = MemRefAccess::from_op(graph, load) else {
            return Forward::None;
        };
        let memref = load_access.memref;

        let mut candidates = Vec::new();
        for user in graph.users(memref) {
            if !graph.kind(user).is_affine_store() {
                continue;
            }
            match MemRefAccess::from_op(graph, user) {
                Some(store_access) if store_access == load_access => {}
                _ => continue,
            }
            let start = self.start_point(user, load);
            if !self.dom.dominates(graph, start, load) {
                continue;
            }
            if has_effect_between(graph, EffectKind::Write, start, load) {
                continue;
            }
            candidates.push((user, start));
        }

        let (store, start) = match candidates.as_slice() {
            [] => return Forward::None,
            [only] => *only,
            _ => {
                debug_assert!(
                    false,
                    "{} stores can be forwarded to {:?}",
                    candidates.len(),
                    load
                );
                log::warn!(
                    "{} stores can be forwarded to {:?}; leaving it alone",
                    candidates.len(),
                    load
                );
                return Forward::None;
            }
        };

        let Some(stored) = graph.stored_value(store) else {
            return Forward::None;
        };
        let loaded = graph.result(load);
        if graph.value_type(stored) != graph.value_type(loaded) {
            return Forward::None;
        }

        if start == store {
            self.graph.replace_all_uses_with(loaded, stored);
            self.memrefs_to_erase.insert(memref);
            self.schedule_erase(load);
            self.stats.forwarded_loads += 1;
            log::debug!("forwarded {:?} into {:?}", store, load);
            return Forward::Done;
        }

        let new_load = self.forward_guarded(store, start, load);
        self.stats.forwarded_loads += 1;
        log::debug!("forwarded guarded {:?} into {:?} through a select", store, load);
        Forward::Retry(new_load)
    }

    /// `if (c) { A[i] = v }; .. = A[i]` becomes
    /// `%old = A[i]; A[i] = select(c, v, %old); .. = select`.
    fn forward_guarded(&mut self, store: OpId, if_op: OpId, load: OpId) -> OpId {
        let graph = &mut *self.graph;
        graph.move_op_before(store, if_op);

        let (stored, memref, map, indices) = graph.affine_store_parts(store);
        let (map, indices) = (map.clone(), indices.to_vec());
        let (set, if_operands) = graph.if_condition(if_op);
        let (set, if_operands) = (set.clone(), if_operands.to_vec());

        let mut b = Builder::before(&mut *graph, store);
        let new_load = b.affine_load_op(memref, map, indices);
        let old = b.graph().result(new_load);
        let select = b.affine_select(set, if_operands, stored, old);

        graph.set_operand(store, 0, select);
        graph.erase_op(if_op);
        let loaded = graph.result(load);
        graph.replace_all_uses_with(loaded, select);
        self.schedule_erase(load);
        self.dom.invalidate();
        self.pdom.invalidate();
        new_load
    }

    fn load_cse(&mut self, load_a: OpId) {
        let graph = &*self.graph;
        let Some(access_a) = MemRefAccess::from_op(graph, load_a) else {
            return;
        };
        let result_a = graph.result(load_a);

        let mut candidates = Vec::new();
        for user in graph.users(access_a.memref) {
            if user == load_a || !graph.kind(user).is_affine_load() || self.pending.contains(&user) {
                continue;
            }
            match MemRefAccess::from_op(graph, user) {
                Some(access_b) if access_b == access_a => {}
                _ => continue,
            }
            if graph.value_type(graph.result(user)) != graph.value_type(result_a) {
                continue;
            }
            if !self.dom.dominates(graph, user, load_a) {
                continue;
            }
            if has_effect_between(graph, EffectKind::Write, user, load_a) {
                continue;
            }
            candidates.push(user);
        }

        let mut chosen = None;
        for &c in &candidates {
            if candidates.iter().all(|&d| self.dom.dominates(graph, c, d)) {
                chosen = Some(c);
                break;
            }
        }
        let Some(chosen) = chosen else {
            return;
        };

        let replacement = graph.result(chosen);
        self.graph.replace_all_uses_with(result_a, replacement);
        self.schedule_erase(load_a);
        self.stats.eliminated_loads += 1;
        log::debug!("replaced {:?} by the equivalent {:?}", load_a, chosen);
    }

    fn find_unused_store(&mut self, write_a: OpId) {
        let graph = &*self.graph;
        if !graph.contains_op(write_a) || self.pending.contains(&write_a) {
            return;
        }
        let Some(access_a) = MemRefAccess::from_op(graph, write_a) else {
            return;
        };
        let memref = access_a.memref;
        let users = graph.users(memref);

        for &write_b in &users {
            if write_b == write_a || !graph.kind(write_b).is_affine_store() {
                continue;
            }
            match MemRefAccess::from_op(graph, write_b) {
                Some(access_b) if access_b == access_a => {}
                _ => continue,
            }

            let mut target_a = write_a;
            let mut target_b = write_b;
            let if_a = self.start_point(write_a, write_b);
            if if_a != write_a {
                target_a = if_a;
                if let Some(if_b) = graph.sole_guarding_if(write_b) {
                    let same_guard = graph.integer_set(if_a) == graph.integer_set(if_b)
                        && graph.op(if_a).operands == graph.op(if_b).operands;
                    if same_guard {
                        target_b = if_b;
                    }
                }
            }

            if graph.parent_region(target_a) != graph.parent_region(target_b) {
                continue;
            }
            if !self.pdom.post_dominates(graph, target_b, target_a) {
                continue;
            }
            if has_effect_between(graph, EffectKind::Read, target_a, write_b) {
                continue;
            }

            if self.pending.insert(target_a) {
                self.to_erase.push(target_a);
            }
            self.stats.dead_stores += 1;
            log::debug!("{:?} is overwritten by {:?}; erasing {:?}", write_a, write_b, target_a);
            break;
        }

        let only_written = users
            .iter()
            .all(|&u| graph.kind(u).is_affine_store() || has_single_effect(graph, u, EffectKind::Free, memref));
        if only_written {
            self.memrefs_to_erase.insert(memref);
        }
    }

    /// Deletes candidate buffers that are locally allocated and only
    /// written or freed.
    fn reap_buffers(&mut self) {
        for memref in std::mem::take(&mut self.memrefs_to_erase) {
            let graph = &*self.graph;
            if !graph.contains_value(memref) {
                continue;
            }
            let Some(def) = graph.defining_op(memref) else {
                continue;
            };
            if !has_single_effect(graph, def, EffectKind::Allocate, memref) {
                continue;
            }
            let users = graph.users(memref);
            let removable = users.iter().all(|&u| {
                graph.kind(u).is_affine_store() || has_single_effect(graph, u, EffectKind::Free, memref)
            });
            if !removable {
                continue;
            }
            for user in users {
                self.graph.erase_op(user);
            }
            self.graph.erase_op(def);
            self.stats.reaped_buffers += 1;
            log::debug!("removed write-only buffer {:?}", memref);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::{AffineExpr, AffineMap, IntegerSet};
    use crate::ops::OpKind;
    use hls_core::{Literal, Type};

    fn count(func: &Function, pred: impl Fn(&OpKind) -> bool) -> usize {
        collect_ops(&func.graph, func.body, |g, op| pred(g.kind(op))).len()
    }

    #[test]
    fn test_forward_direct() {
        // A[i] = x; v = A[i]; return v  ==>  return x
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::F32], &[Type::F32]);
        let (a, i, x) = (func.arguments()[0], func.arguments()[1], func.arguments()[2]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        b.affine_store(x, a, AffineMap::identity(1), vec![i]);
        let v = b.affine_load(a, AffineMap::identity(1), vec![i]);
        let ret = b.ret(vec![v]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.forwarded_loads, 1);
        assert_eq!(func.graph.op(ret).operands, vec![x]);
        assert_eq!(count(&func, OpKind::is_affine_load), 0);
        // the argument buffer is not local and keeps its store
        assert_eq!(count(&func, OpKind::is_affine_store), 1);
    }

    #[test]
    fn test_load_cse() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX], &[Type::F32]);
        let (a, i) = (func.arguments()[0], func.arguments()[1]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let first = b.affine_load(a, AffineMap::identity(1), vec![i]);
        let second = b.affine_load(a, AffineMap::identity(1), vec![i]);
        let sum = b.arith(crate::ops::ArithOp::AddF, first, second);
        let ret = b.ret(vec![sum]);
        let add = func.graph.defining_op(sum).unwrap();

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.eliminated_loads, 1);
        assert_eq!(func.graph.op(add).operands, vec![first, first]);
        assert_eq!(count(&func, OpKind::is_affine_load), 1);
        assert_eq!(func.graph.op(ret).operands, vec![sum]);
    }

    #[test]
    fn test_dead_store() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::F32, Type::F32], &[]);
        let args = func.arguments().to_vec();
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let first = b.affine_store(args[2], args[0], AffineMap::identity(1), vec![args[1]]);
        let second = b.affine_store(args[3], args[0], AffineMap::identity(1), vec![args[1]]);
        b.ret(vec![]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.dead_stores, 1);
        assert!(!func.graph.contains_op(first));
        assert!(func.graph.contains_op(second));
    }

    #[test]
    fn test_intervening_read_keeps_store() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::F32, Type::F32], &[Type::F32]);
        let args = func.arguments().to_vec();
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let first = b.affine_store(args[2], args[0], AffineMap::identity(1), vec![args[1]]);
        b.call("observe", vec![args[0]], &[]);
        b.affine_store(args[3], args[0], AffineMap::identity(1), vec![args[1]]);
        b.ret(vec![args[2]]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.dead_stores, 0);
        assert!(func.graph.contains_op(first));
    }

    #[test]
    fn test_reap_write_only_buffer() {
        let ty = Type::memref(&[4], Type::I32);
        let mut func = Function::new("f", &[Type::INDEX], &[Type::I32]);
        let i = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let buf = b.alloc(ty);
        let c = b.constant(Literal::I32(3));
        b.affine_store(c, buf, AffineMap::identity(1), vec![i]);
        let v = b.affine_load(buf, AffineMap::identity(1), vec![i]);
        b.dealloc(buf);
        b.ret(vec![v]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.forwarded_loads, 1);
        assert_eq!(stats.reaped_buffers, 1);
        assert!(!func.graph.contains_value(buf));
        assert_eq!(count(&func, |k| matches!(k, OpKind::Alloc | OpKind::Dealloc)), 0);
        assert_eq!(count(&func, OpKind::is_affine_store), 0);
    }

    #[test]
    fn test_residual_read_blocks_reaping() {
        // the second load reads a different element and survives
        let ty = Type::memref(&[4], Type::I32);
        let mut func = Function::new("f", &[Type::INDEX], &[Type::I32, Type::I32]);
        let i = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let buf = b.alloc(ty);
        let c = b.constant(Literal::I32(3));
        b.affine_store(c, buf, AffineMap::identity(1), vec![i]);
        let v = b.affine_load(buf, AffineMap::identity(1), vec![i]);
        let w = b.affine_load(buf, AffineMap::new(1, 0, vec![AffineExpr::dim(0) + 1]), vec![i]);
        b.ret(vec![v, w]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.forwarded_loads, 1);
        assert_eq!(stats.reaped_buffers, 0);
        assert!(func.graph.contains_value(buf));
    }

    #[test]
    fn test_forward_guarded_store() {
        // if (i == 0) { A[i] = x }; v = A[i]
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::F32], &[Type::F32]);
        let (a, i, x) = (func.arguments()[0], func.arguments()[1], func.arguments()[2]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let set = IntegerSet::new(1, 0, vec![AffineExpr::dim(0)], vec![true]);
        let guard = b.affine_if(set, vec![i], false);
        b.set_insertion_point_to_body(guard.then_block);
        let store = b.affine_store(x, a, AffineMap::identity(1), vec![i]);
        b.set_insertion_point_to_end(entry);
        let v = b.affine_load(a, AffineMap::identity(1), vec![i]);
        let ret = b.ret(vec![v]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.forwarded_loads, 1);
        let g = &func.graph;
        assert!(!g.contains_op(guard.op));
        assert_eq!(g.parent_block(store), entry);
        let select = g.op(ret).operands[0];
        let select_op = g.defining_op(select).unwrap();
        assert!(matches!(g.kind(select_op), OpKind::AffineSelect { .. }));
        assert_eq!(g.op(store).operands[0], select);
        assert_eq!(count(&func, OpKind::is_affine_if), 0);
        // the synthesized load feeding the select stays
        assert_eq!(count(&func, OpKind::is_affine_load), 1);
    }

    #[test]
    fn test_different_indices_untouched() {
        let ty = Type::memref(&[8], Type::F32);
        let mut func = Function::new("f", &[ty, Type::INDEX, Type::INDEX, Type::F32], &[Type::F32]);
        let args = func.arguments().to_vec();
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        b.affine_store(args[3], args[0], AffineMap::identity(1), vec![args[1]]);
        let v = b.affine_load(args[0], AffineMap::identity(1), vec![args[2]]);
        b.ret(vec![v]);

        let stats = AffineStoreForward::new().run_on_function(&mut func);
        assert_eq!(stats.total(), 0);
    }
}
