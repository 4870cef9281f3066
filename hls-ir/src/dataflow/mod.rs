pub mod cfg;
pub mod dominance;

pub use cfg::ControlFlowGraph;
pub use dominance::{DominanceInfo, DominanceTree, PostDominanceInfo};
