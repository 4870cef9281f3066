// Containers shared by the IR crates

pub mod arena;
pub use arena::{Arena, EntityId};
pub mod hash;
pub use hash::{FastHashMap, FastHashSet};
