use crate::graph::{BlockId, Graph, RegionId};
use hls_support::FastHashMap;

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub index: usize,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

impl CfgNode {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }
}

/// Block-level control flow graph with `usize` node ids.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowGraph {
    pub blocks: Vec<CfgNode>,
    pub entry: usize,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            entry: 0,
        }
    }

    pub fn add_block(&mut self) -> usize {
        let index = self.blocks.len();
        self.blocks.push(CfgNode::new(index));
        index
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        if !self.blocks[from].succs.contains(&to) {
            self.blocks[from].succs.push(to);
        }
        if !self.blocks[to].preds.contains(&from) {
            self.blocks[to].preds.push(from);
        }
    }

    /// Builds the graph of `region`'s blocks from their terminators'
    /// successors. Node `i` is the region's `i`-th block; the entry is
    /// node 0.
    pub fn for_region(graph: &Graph, region: RegionId) -> (Self, FastHashMap<BlockId, usize>) {
        let blocks = &graph.region(region).blocks;
        let mut cfg = ControlFlowGraph::new();
        let mut index = FastHashMap::default();
        for &block in blocks {
            index.insert(block, cfg.add_block());
        }
        for &block in blocks {
            for succ in graph.block_successors(block) {
                if let Some(&to) = index.get(&succ) {
                    cfg.add_edge(index[&block], to);
                }
            }
        }
        (cfg, index)
    }

    /// The reverse graph with an extra exit node (the returned index) that
    /// every successor-less node flows into. The exit becomes the entry.
    pub fn reversed_with_exit(&self) -> (Self, usize) {
        let mut rev = ControlFlowGraph::new();
        for _ in 0..self.blocks.len() {
            rev.add_block();
        }
        let exit = rev.add_block();
        rev.entry = exit;
        for node in &self.blocks {
            if node.succs.is_empty() {
                rev.add_edge(exit, node.index);
            }
            for &succ in &node.succs {
                rev.add_edge(succ, node.index);
            }
        }
        (rev, exit)
    }

    /// Nodes reachable from the entry, in reverse post-order.
    pub fn reverse_post_order(&self) -> Vec<usize> {
        if self.blocks.is_empty() {
            return Vec::new();
        }
        let mut visited = vec![false; self.blocks.len()];
        let mut post = Vec::with_capacity(self.blocks.len());
        // (node, next successor to visit)
        let mut stack = vec![(self.entry, 0usize)];
        visited[self.entry] = true;
        while let Some(&mut (node, ref mut next)) = stack.last_mut() {
            if let Some(&succ) = self.blocks[node].succs.get(*next) {
                *next += 1;
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                post.push(node);
                stack.pop();
            }
        }
        post.reverse();
        post
    }
}
