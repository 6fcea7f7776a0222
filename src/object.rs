//! Shared object plumbing: ids, flag sets, refcounted-slot replacement,
//! and the property system.
//!
//! Elements, pads, and caps are shared through `Arc` handles; the last
//! clone to drop runs the release path exactly once. The helpers here cover
//! the pieces that `Arc` alone does not: small numeric ids, atomic flag
//! words, swapping a published `Arc` slot, and batched get/set of typed
//! properties.

use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Small numeric identity for objects inside a container.
///
/// The value `0xFF` is reserved as the "unset" sentinel; containers assign
/// a concrete id when an element with an unset id is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectId(pub u8);

impl ObjectId {
    /// Reserved "unset" id; containers replace it on add.
    pub const UNSET: Self = Self(0xFF);

    /// Check whether this id is the unset sentinel.
    #[inline]
    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::UNSET
    }
}

/// An atomically updated 32-bit flag word.
///
/// Used for object state bits that change independently of any lock, such
/// as a pad's renegotiate mark or an element's containment mark.
#[derive(Debug, Default)]
pub struct ObjectFlags(AtomicU32);

impl ObjectFlags {
    /// Create a flag word with no bits set.
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Set the given bits.
    #[inline]
    pub fn set(&self, bits: u32) {
        self.0.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear the given bits.
    #[inline]
    pub fn clear(&self, bits: u32) {
        self.0.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Check whether all of the given bits are set.
    #[inline]
    pub fn contains(&self, bits: u32) -> bool {
        self.0.load(Ordering::Acquire) & bits == bits
    }

    /// Set the given bits, returning whether they were all set before.
    #[inline]
    pub fn test_and_set(&self, bits: u32) -> bool {
        self.0.fetch_or(bits, Ordering::AcqRel) & bits == bits
    }
}

/// Replace the contents of a shared `Arc` slot, returning the old value.
///
/// The new reference is cloned before the old one is released, so the swap
/// is safe even when `new` aliases the slot's current value. Callers hold
/// whatever lock guards the slot; the helper only orders the clone against
/// the release.
pub fn replace<T: ?Sized>(slot: &mut Arc<T>, new: &Arc<T>) -> Arc<T> {
    std::mem::replace(slot, Arc::clone(new))
}

// ============================================================================
// Properties
// ============================================================================

/// A typed property value.
///
/// The key/value batches of [`Properties::set_properties`] carry these; the
/// variant must match what the element declares for the key.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean property.
    Bool(bool),
    /// Signed integer property.
    Int(i32),
    /// Unsigned integer property.
    Uint(u32),
    /// String property.
    Str(String),
    /// Caps property.
    Caps(Arc<crate::caps::Caps>),
}

impl PropertyValue {
    /// Get the unsigned integer value, if that is the variant.
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the boolean value, if that is the variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the caps value, if that is the variant.
    pub fn as_caps(&self) -> Option<&Arc<crate::caps::Caps>> {
        match self {
            Self::Caps(c) => Some(c),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        Self::Uint(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// Get/set access to an object's named properties.
///
/// The batch forms stop at the first error and return it; earlier entries
/// in the batch stay applied.
pub trait Properties {
    /// Set a single property.
    fn set_property(&self, key: &str, value: PropertyValue) -> Result<()>;

    /// Get a single property.
    fn get_property(&self, key: &str) -> Result<PropertyValue>;

    /// Set a batch of properties, stopping at the first error.
    fn set_properties(&self, props: &[(&str, PropertyValue)]) -> Result<()> {
        for (key, value) in props {
            self.set_property(key, value.clone())?;
        }
        Ok(())
    }

    /// Get a batch of properties, stopping at the first error.
    fn get_properties(&self, keys: &[&str]) -> Result<Vec<PropertyValue>> {
        keys.iter().map(|key| self.get_property(key)).collect()
    }
}

/// Standard "unknown property" error for implementations.
pub(crate) fn unknown_property(key: &str) -> Error {
    Error::UnknownProperty(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_sentinel() {
        assert!(ObjectId::UNSET.is_unset());
        assert!(!ObjectId(0).is_unset());
        assert_eq!(ObjectId::default(), ObjectId::UNSET);
    }

    #[test]
    fn test_flags_set_clear() {
        let flags = ObjectFlags::new();
        assert!(!flags.contains(0b01));

        flags.set(0b01);
        assert!(flags.contains(0b01));

        flags.set(0b10);
        assert!(flags.contains(0b11));

        flags.clear(0b01);
        assert!(!flags.contains(0b01));
        assert!(flags.contains(0b10));
    }

    #[test]
    fn test_flags_test_and_set() {
        let flags = ObjectFlags::new();
        assert!(!flags.test_and_set(0b100));
        assert!(flags.test_and_set(0b100));
    }

    #[test]
    fn test_replace_returns_old() {
        let mut slot = Arc::new(1u32);
        let new = Arc::new(2u32);
        let old = replace(&mut slot, &new);
        assert_eq!(*old, 1);
        assert_eq!(*slot, 2);
    }

    #[test]
    fn test_replace_self_alias() {
        let mut slot = Arc::new(7u32);
        let alias = Arc::clone(&slot);
        let old = replace(&mut slot, &alias);
        assert!(Arc::ptr_eq(&old, &slot));
        assert_eq!(*slot, 7);
    }

    struct Table;

    impl Properties for Table {
        fn set_property(&self, key: &str, _value: PropertyValue) -> Result<()> {
            if key == "known" {
                Ok(())
            } else {
                Err(unknown_property(key))
            }
        }

        fn get_property(&self, key: &str) -> Result<PropertyValue> {
            if key == "known" {
                Ok(PropertyValue::Uint(5))
            } else {
                Err(unknown_property(key))
            }
        }
    }

    #[test]
    fn test_property_batch_stops_at_first_error() {
        let t = Table;
        let err = t
            .set_properties(&[
                ("known", PropertyValue::Uint(1)),
                ("bogus", PropertyValue::Uint(2)),
                ("known", PropertyValue::Uint(3)),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::UnknownProperty(k) if k == "bogus"));

        let values = t.get_properties(&["known"]).unwrap();
        assert_eq!(values, vec![PropertyValue::Uint(5)]);
    }
}
