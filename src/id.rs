//! Stable node identity.
//!
//! Unlike a content-hash identity scheme (stable across separate *compilations*
//! of static content), a live session tree needs identity that survives
//! arbitrary edits to the same node across the session's lifetime. A
//! process-scoped monotonic counter gives every element a compact, unique id
//! the moment it is parsed; [`crate::diff`] later copies ids from matched old
//! nodes onto their new counterparts as it recurses, so the id an element was
//! first given keeps addressing it for as long as it lives in the tree,
//! across any number of renders.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Alphabet for the base-N encoding used in [`StableId::to_attr_value`].
///
/// 62 symbols (not 64) so the encoded id is safe to embed in an HTML
/// attribute value without escaping and reads as a normal identifier.
const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Process-wide, monotonically increasing id source.
///
/// Relaxed ordering is sufficient: uniqueness within a single committed tree
/// is what correctness depends on (spec §3), not a cross-thread happens-before
/// relationship between allocations.
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// A compact, opaque identifier assigned to an [`Element`](crate::node::Element)
/// at parse time.
///
/// Copy, 8 bytes, no heap allocation. `StableId::detached()` (the value `0`)
/// is reserved and never handed out by [`StableId::next`], so `Option<StableId>`
/// need not widen the type and a detached id can never collide with a real one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct StableId(u64);

impl StableId {
    /// Allocate the next id from the process-wide counter.
    ///
    /// Reentrant across concurrent parses: every call on every thread gets a
    /// distinct value.
    #[inline]
    pub fn next() -> Self {
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a `StableId` from a raw value.
    ///
    /// Intended for deserializing ids that came back over the wire (a
    /// `MoveChild` patch's `d` field, for instance), not for minting new ones.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw counter value.
    #[inline]
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// A placeholder id that addresses no real node.
    #[inline]
    pub const fn detached() -> Self {
        Self(0)
    }

    /// Whether this is the detached placeholder.
    #[inline]
    pub const fn is_detached(&self) -> bool {
        self.0 == 0
    }

    /// Base-62 encoding for the `data-dj-id` attribute and wire `d` field.
    ///
    /// Compact and monotonic-looking without being sequential-looking enough
    /// to invite guessing games; more importantly, it keeps ids short in
    /// documents with many thousands of elements.
    pub fn to_attr_value(self) -> String {
        if self.0 == 0 {
            return "0".to_string();
        }
        let mut n = self.0;
        let mut buf = Vec::with_capacity(11);
        while n > 0 {
            buf.push(ALPHABET[(n % 62) as usize]);
            n /= 62;
        }
        buf.reverse();
        // SAFETY: ALPHABET is ASCII.
        String::from_utf8(buf).unwrap()
    }

    /// Parse a base-62 `data-dj-id` value back into a `StableId`.
    pub fn from_attr_value(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        let mut n: u64 = 0;
        for b in s.bytes() {
            let digit = ALPHABET.iter().position(|&c| c == b)? as u64;
            n = n.checked_mul(62)?.checked_add(digit)?;
        }
        Some(Self(n))
    }
}

impl fmt::Debug for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_detached() {
            write!(f, "StableId(detached)")
        } else {
            write!(f, "StableId({})", self.to_attr_value())
        }
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_attr_value())
    }
}

impl Default for StableId {
    fn default() -> Self {
        Self::detached()
    }
}

impl serde::Serialize for StableId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_attr_value())
    }
}

impl<'de> serde::Deserialize<'de> for StableId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::from_attr_value(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid stable id: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = StableId::next();
        let b = StableId::next();
        assert!(b.as_raw() > a.as_raw());
    }

    #[test]
    fn detached_is_never_minted() {
        for _ in 0..100 {
            assert!(!StableId::next().is_detached());
        }
    }

    #[test]
    fn attr_value_roundtrips() {
        let id = StableId::from_raw(123456789);
        let s = id.to_attr_value();
        assert_eq!(StableId::from_attr_value(&s), Some(id));
    }

    #[test]
    fn detached_attr_value_is_zero() {
        assert_eq!(StableId::detached().to_attr_value(), "0");
    }

    #[test]
    fn serde_roundtrip() {
        let id = StableId::from_raw(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: StableId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
