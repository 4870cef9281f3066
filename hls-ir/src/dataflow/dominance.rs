use crate::dataflow::cfg::ControlFlowGraph;
use crate::graph::{BlockId, Graph, OpId, RegionId, ValueDef, ValueId};
use hls_support::FastHashMap;
use std::collections::{HashMap, HashSet};

/// Dominance tree over a [`ControlFlowGraph`].
///
/// A node A dominates node B if all paths from entry to B pass through A.
/// Nodes unreachable from the entry are dominated by nothing.
#[derive(Debug, Clone)]
pub struct DominanceTree {
    idom: HashMap<usize, usize>,
    dominates: HashMap<usize, HashSet<usize>>,
    entry: usize,
}

impl DominanceTree {
    pub fn build(cfg: &ControlFlowGraph) -> Self {
        let mut tree = DominanceTree {
            idom: HashMap::new(),
            dominates: HashMap::new(),
            entry: cfg.entry,
        };
        if cfg.blocks.is_empty() {
            return tree;
        }
        tree.calculate_idom(cfg);
        tree.build_dominates_sets();
        tree
    }

    /// Iterative scheme of Cooper, Harvey and Kennedy, visiting nodes in
    /// reverse post-order and comparing them by their RPO number.
    fn calculate_idom(&mut self, cfg: &ControlFlowGraph) {
        let rpo = cfg.reverse_post_order();
        let order: HashMap<usize, usize> = rpo.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        self.idom.insert(self.entry, self.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let mut processed = cfg.blocks[node]
                    .preds
                    .iter()
                    .copied()
                    .filter(|p| self.idom.contains_key(p));
                let Some(first) = processed.next() else {
                    continue;
                };
                let new_idom = processed.fold(first, |acc, pred| self.intersect(&order, acc, pred));
                if self.idom.get(&node) != Some(&new_idom) {
                    self.idom.insert(node, new_idom);
                    changed = true;
                }
            }
        }
    }

    fn intersect(&self, order: &HashMap<usize, usize>, mut b1: usize, mut b2: usize) -> usize {
        while b1 != b2 {
            while order[&b1] > order[&b2] {
                b1 = self.idom[&b1];
            }
            while order[&b2] > order[&b1] {
                b2 = self.idom[&b2];
            }
        }
        b1
    }

    fn build_dominates_sets(&mut self) {
        for (&node, &idom) in &self.idom {
            self.dominates.entry(node).or_default().insert(node);
            if node == idom {
                continue;
            }
            let mut current = idom;
            loop {
                self.dominates.entry(current).or_default().insert(node);
                match self.idom.get(&current) {
                    Some(&next) if next != current => current = next,
                    _ => break,
                }
            }
        }
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn dominates(&self, dominator: usize, dominated: usize) -> bool {
        self.dominates
            .get(&dominator)
            .map(|set| set.contains(&dominated))
            .unwrap_or(false)
    }

    pub fn properly_dominates(&self, dominator: usize, dominated: usize) -> bool {
        dominator != dominated && self.dominates(dominator, dominated)
    }

    pub fn idom(&self, block: usize) -> Option<usize> {
        self.idom.get(&block).copied().filter(|&d| d != block)
    }

    pub fn is_reachable(&self, block: usize) -> bool {
        self.idom.contains_key(&block)
    }
}

#[derive(Debug, Clone)]
struct RegionTree {
    tree: DominanceTree,
    index: FastHashMap<BlockId, usize>,
}

/// Lazily built per-region block trees, forward or reversed.
#[derive(Debug, Clone, Default)]
struct RegionTrees {
    post: bool,
    trees: FastHashMap<RegionId, RegionTree>,
}

impl RegionTrees {
    fn tree(&mut self, graph: &Graph, region: RegionId) -> &RegionTree {
        let post = self.post;
        self.trees.entry(region).or_insert_with(|| {
            let (cfg, index) = ControlFlowGraph::for_region(graph, region);
            let tree = if post {
                DominanceTree::build(&cfg.reversed_with_exit().0)
            } else {
                DominanceTree::build(&cfg)
            };
            RegionTree { tree, index }
        })
    }

    fn properly_dominates_block(&mut self, graph: &Graph, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return false;
        }
        let region = graph.block(a).parent;
        if graph.block(b).parent != region {
            return false;
        }
        let rt = self.tree(graph, region);
        match (rt.index.get(&a), rt.index.get(&b)) {
            (Some(&x), Some(&y)) => rt.tree.properly_dominates(x, y),
            _ => false,
        }
    }

    /// Operation-level query. `b` is first lifted to its ancestor in `a`'s
    /// region; inside one block, order decides (reversed for post-dominance).
    fn properly_dominates(&mut self, graph: &Graph, a: OpId, b: OpId, enclosing_ok: bool) -> bool {
        if a == b {
            return false;
        }
        let region = graph.parent_region(a);
        let Some(lifted) = graph.find_ancestor_op_in_region(region, b) else {
            return false;
        };
        if lifted == a {
            return enclosing_ok;
        }
        let (block_a, block_b) = (graph.parent_block(a), graph.parent_block(lifted));
        if block_a == block_b {
            return if self.post {
                graph.is_before_in_block(lifted, a)
            } else {
                graph.is_before_in_block(a, lifted)
            };
        }
        self.properly_dominates_block(graph, block_a, block_b)
    }
}

/// Dominance between operations of a nested region graph.
///
/// Trees are cached per region; call [`DominanceInfo::invalidate`] after
/// changing a region's block structure.
#[derive(Debug, Clone, Default)]
pub struct DominanceInfo {
    trees: RegionTrees,
}

impl DominanceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.trees.trees.clear();
    }

    /// `a` properly dominates `b`. An operation properly dominates
    /// everything nested inside it.
    pub fn properly_dominates(&mut self, graph: &Graph, a: OpId, b: OpId) -> bool {
        self.trees.properly_dominates(graph, a, b, true)
    }

    pub fn dominates(&mut self, graph: &Graph, a: OpId, b: OpId) -> bool {
        a == b || self.properly_dominates(graph, a, b)
    }

    pub fn properly_dominates_block(&mut self, graph: &Graph, a: BlockId, b: BlockId) -> bool {
        self.trees.properly_dominates_block(graph, a, b)
    }

    /// Whether `value` is visible at `user`.
    pub fn value_dominates(&mut self, graph: &Graph, value: ValueId, user: OpId) -> bool {
        match graph.value(value).def {
            ValueDef::OpResult { op, .. } => self.trees.properly_dominates(graph, op, user, false),
            ValueDef::BlockArg { block, .. } => {
                let region = graph.block(block).parent;
                let Some(lifted) = graph.find_ancestor_op_in_region(region, user) else {
                    return false;
                };
                let holder = graph.parent_block(lifted);
                holder == block || self.trees.properly_dominates_block(graph, block, holder)
            }
        }
    }
}

/// Post-dominance between operations: `a` post-dominates `b` when every
/// path from `b` to the exit of the region passes through `a`.
#[derive(Debug, Clone)]
pub struct PostDominanceInfo {
    trees: RegionTrees,
}

impl Default for PostDominanceInfo {
    fn default() -> Self {
        Self {
            trees: RegionTrees {
                post: true,
                trees: FastHashMap::default(),
            },
        }
    }
}

impl PostDominanceInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.trees.trees.clear();
    }

    pub fn properly_post_dominates(&mut self, graph: &Graph, a: OpId, b: OpId) -> bool {
        self.trees.properly_dominates(graph, a, b, true)
    }

    pub fn post_dominates(&mut self, graph: &Graph, a: OpId, b: OpId) -> bool {
        a == b || self.properly_post_dominates(graph, a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::module::Function;
    use hls_core::Type;

    fn diamond() -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph::new();
        for _ in 0..4 {
            cfg.add_block();
        }
        cfg.add_edge(0, 1);
        cfg.add_edge(0, 2);
        cfg.add_edge(1, 3);
        cfg.add_edge(2, 3);
        cfg
    }

    #[test]
    fn test_diamond_dominance() {
        let tree = DominanceTree::build(&diamond());
        assert!(tree.dominates(0, 3));
        assert!(!tree.dominates(1, 3));
        assert!(!tree.dominates(2, 3));
        assert_eq!(tree.idom(3), Some(0));
        assert_eq!(tree.idom(0), None);
        assert!(tree.dominates(1, 1));
        assert!(!tree.properly_dominates(1, 1));
    }

    #[test]
    fn test_numbering_independent_of_indices() {
        // 0 -> 3 -> 1, 0 -> 2 -> 1; node 1 is the join
        let mut cfg = ControlFlowGraph::new();
        for _ in 0..4 {
            cfg.add_block();
        }
        cfg.add_edge(0, 3);
        cfg.add_edge(0, 2);
        cfg.add_edge(3, 1);
        cfg.add_edge(2, 1);
        let tree = DominanceTree::build(&cfg);
        assert_eq!(tree.idom(1), Some(0));
        assert!(!tree.dominates(3, 1));
        assert!(!tree.dominates(2, 1));
    }

    #[test]
    fn test_loop_dominance() {
        // 0 -> 1 -> 2 -> 1, 1 -> 3
        let mut cfg = ControlFlowGraph::new();
        for _ in 0..4 {
            cfg.add_block();
        }
        cfg.add_edge(0, 1);
        cfg.add_edge(1, 2);
        cfg.add_edge(2, 1);
        cfg.add_edge(1, 3);
        let tree = DominanceTree::build(&cfg);
        assert!(tree.dominates(1, 2));
        assert!(tree.dominates(1, 3));
        assert!(!tree.dominates(2, 3));
    }

    #[test]
    fn test_post_dominance_on_reversed_graph() {
        let (rev, exit) = diamond().reversed_with_exit();
        let tree = DominanceTree::build(&rev);
        assert!(tree.dominates(3, 0));
        assert!(!tree.dominates(1, 0));
        assert_eq!(tree.idom(3), Some(exit));
    }

    #[test]
    fn test_unreachable_node() {
        let mut cfg = diamond();
        let dead = cfg.add_block();
        cfg.add_edge(dead, 3);
        let tree = DominanceTree::build(&cfg);
        assert!(!tree.is_reachable(dead));
        assert!(!tree.dominates(0, dead));
        assert!(tree.dominates(0, 3));
    }

    #[test]
    fn test_op_dominance_through_nesting() {
        let mut func = Function::new("f", &[], &[]);
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let c = b.index_constant(0);
        let outer = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(outer.body);
        let inner = b.index_constant(1);
        b.set_insertion_point_to_end(entry);
        let after = b.index_constant(2);
        let g = &func.graph;
        let (c, inner, after) = (
            g.defining_op(c).unwrap(),
            g.defining_op(inner).unwrap(),
            g.defining_op(after).unwrap(),
        );

        let mut dom = DominanceInfo::new();
        assert!(dom.properly_dominates(g, c, inner));
        assert!(dom.properly_dominates(g, outer.op, inner));
        assert!(!dom.properly_dominates(g, inner, after));
        assert!(!dom.properly_dominates(g, inner, c));
        assert!(dom.dominates(g, c, c));

        let mut pdom = PostDominanceInfo::new();
        assert!(pdom.properly_post_dominates(g, after, inner));
        assert!(pdom.post_dominates(g, after, c));
        assert!(!pdom.post_dominates(g, c, after));
    }

    #[test]
    fn test_value_visibility() {
        let mut func = Function::new("f", &[Type::INDEX], &[]);
        let arg = func.arguments()[0];
        let entry = func.entry_block();
        let mut b = Builder::at_end(&mut func.graph, entry);
        let lp = b.affine_for_const(0, 4, 1);
        b.set_insertion_point_to_body(lp.body);
        let x = b.index_constant(3);
        b.set_insertion_point_to_end(entry);
        let after = b.index_constant(5);
        let g = &func.graph;
        let (x_op, after_op) = (g.defining_op(x).unwrap(), g.defining_op(after).unwrap());

        let mut dom = DominanceInfo::new();
        assert!(dom.value_dominates(g, arg, x_op));
        assert!(dom.value_dominates(g, lp.iv, x_op));
        assert!(!dom.value_dominates(g, lp.iv, after_op));
        assert!(!dom.value_dominates(g, x, after_op));
    }
}
