use ahash::{AHashMap, AHashSet};

pub type FastHashMap<K, V> = AHashMap<K, V>;
pub type FastHashSet<K> = AHashSet<K>;
