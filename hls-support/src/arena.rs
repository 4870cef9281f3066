use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A handle into an [`Arena`].
///
/// Handles are plain indices: they stay valid while other entities are
/// allocated or removed, and become dangling once their own slot is removed.
pub trait EntityId: Copy + Eq + Ord + Hash + fmt::Debug {
    fn new(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Declares a `u32` newtype implementing [`EntityId`].
#[macro_export]
macro_rules! entity_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident, $prefix:literal;) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        $vis struct $name(u32);

        impl $crate::arena::EntityId for $name {
            #[inline]
            fn new(index: usize) -> Self {
                $name(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

/// Slot arena with tombstones.
///
/// Removal leaves a hole so that every other handle keeps pointing at the
/// same entity. Slots are never reused.
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    live: usize,
    _marker: PhantomData<fn() -> I>,
}

impl<I: EntityId, T> Arena<I, T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            live: 0,
            _marker: PhantomData,
        }
    }

    pub fn alloc(&mut self, value: T) -> I {
        let id = I::new(self.slots.len());
        self.slots.push(Some(value));
        self.live += 1;
        id
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Removes the entity, returning it if it was still live.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let removed = self.slots.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live entities in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (I::new(i), v)))
    }

    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.iter().map(|(id, _)| id)
    }
}

impl<I: EntityId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: EntityId, T: Clone> Clone for Arena<I, T> {
    fn clone(&self) -> Self {
        Arena {
            slots: self.slots.clone(),
            live: self.live,
            _marker: PhantomData,
        }
    }
}

impl<I: EntityId, T: fmt::Debug> fmt::Debug for Arena<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<I: EntityId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("use of dangling handle {:?}", id),
        }
    }
}

impl<I: EntityId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("use of dangling handle {:?}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    crate::entity_id! {
        struct Node, "n";
    }

    #[test]
    fn arena_handles_survive_removal() {
        let mut a: Arena<Node, &str> = Arena::new();
        let x = a.alloc("x");
        let y = a.alloc("y");
        let z = a.alloc("z");
        assert_eq!(a.remove(y), Some("y"));
        assert_eq!(a[x], "x");
        assert_eq!(a[z], "z");
        assert!(!a.contains(y));
        assert_eq!(a.len(), 2);
        assert_eq!(a.ids().collect::<Vec<_>>(), vec![x, z]);
    }

    #[test]
    fn arena_remove_twice_is_none() {
        let mut a: Arena<Node, u32> = Arena::new();
        let x = a.alloc(1);
        assert_eq!(a.remove(x), Some(1));
        assert_eq!(a.remove(x), None);
        assert!(a.is_empty());
    }

    #[test]
    #[should_panic(expected = "dangling handle n0")]
    fn arena_index_dangling_panics() {
        let mut a: Arena<Node, u32> = Arena::new();
        let x = a.alloc(7);
        a.remove(x);
        let _ = a[x];
    }

    proptest! {
        #[test]
        fn arena_live_count_matches(ops in proptest::collection::vec(any::<(bool, u8)>(), 0..64)) {
            let mut a: Arena<Node, u8> = Arena::new();
            let mut handles = Vec::new();
            let mut expected = 0usize;
            for (remove, v) in ops {
                if remove && !handles.is_empty() {
                    let h = handles.swap_remove(v as usize % handles.len());
                    prop_assert!(a.remove(h).is_some());
                    expected -= 1;
                } else {
                    handles.push(a.alloc(v));
                    expected += 1;
                }
            }
            prop_assert_eq!(a.len(), expected);
            prop_assert_eq!(a.iter().count(), expected);
        }
    }
}
