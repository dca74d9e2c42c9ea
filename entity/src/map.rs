//! A map from dense entity keys to values, with an implicit default.

use crate::EntityRef;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

/// A mapping `K -> V` for keys that were allocated elsewhere (typically by a
/// [`PrimaryMap`](crate::PrimaryMap)).
///
/// Unlike `PrimaryMap`, a `SecondaryMap` can't allocate keys. It behaves as
/// though every key in `K`'s space already maps to `default`, growing its
/// backing vector lazily the first time a key past the current length is
/// written or read.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    /// Create a new empty map whose implicit default is `V::default()`.
    pub fn new() -> Self {
        Self::with_default(V::default())
    }
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    /// Create a new empty map with an explicit default value, for `V` that
    /// don't implement `Default`.
    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    /// Get the value at `k`, or the default if `k` hasn't been written to.
    pub fn get(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }

    /// Set the value at `k`, growing the backing storage with `default` as
    /// needed.
    pub fn set(&mut self, k: K, v: V) {
        *self.ensure_index(k) = v;
    }

    /// Number of explicitly-stored entries (not the size of the key space).
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Is the map empty of explicit entries?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Clear all explicit entries, reverting every key to the default.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Resize the backing storage to cover at least `n` keys.
    pub fn resize(&mut self, n: usize) {
        if n > self.elems.len() {
            self.elems.resize(n, self.default.clone());
        }
    }

    fn ensure_index(&mut self, k: K) -> &mut V {
        if k.index() >= self.elems.len() {
            self.elems.resize(k.index() + 1, self.default.clone());
        }
        &mut self.elems[k.index()]
    }

    /// Iterate over `(key, &value)` pairs that have been explicitly set.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.elems.iter().enumerate().map(|(i, v)| (K::new(i), v))
    }
}

impl<K, V> Default for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Index<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        self.get(k)
    }
}

impl<K, V> IndexMut<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        self.ensure_index(k)
    }
}
