//! Densely-numbered entity references.
//!
//! This crate provides the primitives on which the rest of the compiler is
//! built: instead of representing a function's Values, Insts, Blocks and so
//! on as a graph of `Rc`/`RefCell` nodes, every such entity is a small `Copy`
//! index type, and all state attached to entities lives in dense, append-only
//! tables indexed by that type.
//!
//! - [`EntityRef`] is the trait implemented by every index type (`entity_impl!`
//!   generates it).
//! - [`PrimaryMap`] owns a dense table and is the only way to allocate new
//!   keys: pushing a value returns the key that was assigned to it.
//! - [`SecondaryMap`] attaches auxiliary data to keys that were allocated by
//!   some other `PrimaryMap`; it has a default value for every key it hasn't
//!   seen yet, so it never needs to be "kept in sync" explicitly.
//! - [`EntitySet`] is a `SecondaryMap<K, bool>` specialization backed by a
//!   bitset.
//! - [`PackedOption`] stores `Option<K>` in the same width as `K` by
//!   reserving `K`'s maximum value as the niche for `None`.
//! - [`EntityList`] and [`ListPool`] store many small variable-length lists
//!   of entities in one shared arena, addressed by a `(offset, length)`
//!   handle, rather than giving every list its own heap allocation.

#![deny(missing_docs)]

mod keys;
mod list;
mod map;
mod packed_option;
mod primary;
mod set;

pub use keys::Keys;
pub use list::{EntityList, ListPool};
pub use map::SecondaryMap;
pub use packed_option::{PackedOption, ReservedValue};
pub use primary::PrimaryMap;
pub use set::EntitySet;

/// A type that can be used as an index into a dense, appendable entity table.
///
/// An implementor is a thin, `Copy` wrapper around a `u32` index. The
/// `entity_impl!` macro below is the idiomatic way to implement this trait:
/// it also derives `Display`/`Debug` in the `prefixNN` convention used
/// throughout this compiler's textual forms.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a small `usize` index.
    fn new(index: usize) -> Self;

    /// Get the index of this entity reference as a `usize`.
    fn index(self) -> usize;
}

/// Macro that generates the boilerplate of [`EntityRef`] for a `struct Foo(u32)`
/// newtype: `EntityRef`, `ReservedValue`, `Display`/`Debug` (as `prefixNN`),
/// and an inherent `as_u32`/`from_u32` pair used by encoders that want the
/// raw bit pattern.
#[macro_export]
macro_rules! entity_impl {
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::ReservedValue for $entity {
            #[inline]
            fn reserved_value() -> Self {
                $entity(u32::MAX)
            }

            #[inline]
            fn is_reserved_value(&self) -> bool {
                self.0 == u32::MAX
            }
        }

        impl $entity {
            /// Create an instance from a `u32`.
            #[inline]
            #[allow(dead_code)]
            pub fn from_u32(x: u32) -> Self {
                debug_assert!(x < u32::MAX);
                $entity(x)
            }

            /// Return the underlying index as a raw `u32`.
            #[inline]
            #[allow(dead_code)]
            pub fn as_u32(self) -> u32 {
                self.0
            }
        }
    };

    ($entity:ident, $display_prefix:expr) => {
        $crate::entity_impl!($entity);

        impl ::core::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                write!(f, concat!($display_prefix, "{}"), self.0)
            }
        }

        impl ::core::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                (self as &dyn ::core::fmt::Display).fmt(f)
            }
        }
    };
}
