//! Packed `Option`-like wrapper using a reserved sentinel value.

use core::fmt;

/// A type that has a distinguished value which stands in for "vacant" so an
/// `Option<Self>` can be represented without an extra discriminant byte.
///
/// Every [`EntityRef`](crate::EntityRef) produced by `entity_impl!` reserves
/// `u32::MAX` as its niche.
pub trait ReservedValue {
    /// Create an instance of the reserved value.
    fn reserved_value() -> Self;

    /// Is `self` the reserved value?
    fn is_reserved_value(&self) -> bool;
}

/// An `Option<T>` that occupies the same memory as `T`, for any `T: ReservedValue`.
///
/// Data structures that store a great many optional entity references (e.g.
/// per-`Value` definitions, per-`Inst` layout links) prefer this over
/// `Option<T>` to halve their footprint; call sites that aren't
/// space-sensitive should keep using plain `Option` and convert at the edges.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackedOption<T: ReservedValue>(T);

impl<T: ReservedValue> PackedOption<T> {
    /// Is this `None`?
    pub fn is_none(&self) -> bool {
        self.0.is_reserved_value()
    }

    /// Is this `Some`?
    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// Convert to a plain `Option<T>`.
    pub fn expand(self) -> Option<T> {
        if self.is_none() {
            None
        } else {
            Some(self.0)
        }
    }

    /// Unwrap, panicking with `msg` if this is `None`.
    pub fn unwrap(self) -> T {
        self.expand().expect("PackedOption is None")
    }

    /// Map the contained value, leaving `None` untouched.
    pub fn map<U: ReservedValue>(self, f: impl FnOnce(T) -> U) -> PackedOption<U> {
        self.expand().map(f).into()
    }
}

impl<T: ReservedValue> Default for PackedOption<T> {
    fn default() -> Self {
        Self(T::reserved_value())
    }
}

impl<T: ReservedValue> From<T> for PackedOption<T> {
    fn from(value: T) -> Self {
        debug_assert!(
            !value.is_reserved_value(),
            "cannot store the reserved value in a PackedOption"
        );
        Self(value)
    }
}

impl<T: ReservedValue> From<Option<T>> for PackedOption<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Self::default(),
        }
    }
}

impl<T: ReservedValue> From<PackedOption<T>> for Option<T> {
    fn from(value: PackedOption<T>) -> Self {
        value.expand()
    }
}

impl<T: ReservedValue + fmt::Debug> fmt::Debug for PackedOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.expand() {
            Some(v) => v.fmt(f),
            None => write!(f, "None"),
        }
    }
}
