//! Global type store for interning buffer type definitions.
//!
//! Equivalent `MemRefType`s map to identical `Type` handles across the
//! system, which keeps `Type` comparisons a plain integer compare.

use crate::r#type::{MemRefType, Type};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct TypeStore {
    memrefs: HashMap<MemRefType, u32>,
    rev_memrefs: Vec<MemRefType>,
}

impl TypeStore {
    fn intern_memref_impl(&mut self, memref: MemRefType) -> Type {
        if let Some(&id) = self.memrefs.get(&memref) {
            return Type::from_memref_id(id);
        }
        let id = self.rev_memrefs.len() as u32;
        self.rev_memrefs.push(memref.clone());
        self.memrefs.insert(memref, id);
        Type::from_memref_id(id)
    }

    fn lookup_memref_impl(&self, ty: Type) -> Option<MemRefType> {
        let id = ty.memref_id()?;
        self.rev_memrefs.get(id as usize).cloned()
    }
}

static TYPE_STORE: Lazy<RwLock<TypeStore>> = Lazy::new(|| RwLock::new(TypeStore::default()));

/// Intern a buffer type into the global type store.
pub fn intern_memref(memref: MemRefType) -> Type {
    let mut store = TYPE_STORE.write().unwrap();
    store.intern_memref_impl(memref)
}

/// Look up a buffer definition from an interned Type handle.
pub fn lookup_memref(ty: Type) -> Option<MemRefType> {
    let store = TYPE_STORE.read().unwrap();
    store.lookup_memref_impl(ty)
}

/// Attempts to lookup a buffer type without blocking.
/// Useful for Debug/Display implementations to avoid deadlocks.
pub fn try_lookup_memref(ty: Type) -> Option<MemRefType> {
    if let Ok(store) = TYPE_STORE.try_read() {
        store.lookup_memref_impl(ty)
    } else {
        None
    }
}
