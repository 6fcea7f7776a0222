//! Capability sets.
//!
//! [`Caps`] describe the data formats acceptable at a
//! [`Pad`](crate::pad::Pad): an ordered set of alternative
//! [`Structure`]s, or one of two sentinels - ANY (accepts everything) and
//! EMPTY (accepts nothing).
//!
//! Caps are the only negotiation entity that is shared between threads;
//! they travel as `Arc<Caps>` and are treated as immutable once published.
//! A pad swaps in a new `Arc` instead of editing caps in place
//! ([`Pad::set_caps`](crate::pad::Pad::set_caps)).

use crate::structure::Structure;
use std::fmt;
use std::sync::Arc;

/// An ordered set of alternative format structures.
///
/// # Sentinels
///
/// - [`Caps::any`]: matches everything; intersecting yields a copy of the
///   other operand.
/// - [`Caps::empty`]: matches nothing; intersections are always empty.
///
/// # Fixed caps
///
/// Caps are *fixed* when they hold exactly one structure whose fields are
/// all concrete primitives. Only fixed caps can be committed to a pad by a
/// caps event.
#[derive(Clone, Debug, PartialEq)]
pub struct Caps {
    any: bool,
    structures: Vec<Structure>,
}

impl Caps {
    /// Create ANY caps (accepts everything).
    pub fn any() -> Self {
        Self {
            any: true,
            structures: Vec::new(),
        }
    }

    /// Create EMPTY caps (accepts nothing).
    pub fn empty() -> Self {
        Self {
            any: false,
            structures: Vec::new(),
        }
    }

    /// Create caps holding a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        Self {
            any: false,
            structures: vec![structure],
        }
    }

    /// Create caps from a list of alternative structures.
    ///
    /// An empty list yields EMPTY caps.
    pub fn from_structures(structures: Vec<Structure>) -> Self {
        Self {
            any: false,
            structures,
        }
    }

    /// Check for the ANY sentinel.
    #[inline]
    pub fn is_any(&self) -> bool {
        self.any
    }

    /// Check for the EMPTY sentinel (not ANY, no structures).
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.any && self.structures.is_empty()
    }

    /// Check whether these caps are fixed: exactly one structure, every
    /// field a concrete primitive.
    pub fn is_fixed(&self) -> bool {
        !self.any && self.structures.len() == 1 && self.structures[0].is_fixed()
    }

    /// Get the alternative structures, best first.
    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    /// Get the first (preferred) structure.
    pub fn first(&self) -> Option<&Structure> {
        self.structures.first()
    }

    /// Intersect two caps.
    ///
    /// ANY short-circuits to a copy of the other operand. Otherwise every
    /// structure pair across the two sets is tried and each successful
    /// intersection is appended, preserving preference order. An EMPTY
    /// result means the caps cannot flow together.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.any {
            return other.clone();
        }
        if other.any {
            return self.clone();
        }

        let mut structures = Vec::new();
        for ours in &self.structures {
            for theirs in &other.structures {
                if let Some(hit) = ours.intersect(theirs) {
                    structures.push(hit);
                }
            }
        }
        Caps {
            any: false,
            structures,
        }
    }

    /// Check whether two caps have any common ground.
    ///
    /// This is the precondition for linking two pads.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        let hit = self.intersect(other);
        hit.any || !hit.structures.is_empty()
    }

    /// Reduce to fixed caps.
    ///
    /// Operates on the first structure only: every range or list field is
    /// replaced by its minimum element, other fields are kept unchanged,
    /// and the remaining alternatives are dropped. Returns `None` for ANY
    /// or EMPTY caps, which have no structure to fixate.
    pub fn fixate(&self) -> Option<Caps> {
        if self.any {
            return None;
        }
        let first = self.structures.first()?;
        Some(Caps::from_structure(first.fixate()))
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.any {
            write!(f, "ANY")
        } else if self.structures.is_empty() {
            write!(f, "EMPTY")
        } else {
            write!(f, "{} structure(s)", self.structures.len())
        }
    }
}

impl From<Structure> for Caps {
    fn from(structure: Structure) -> Self {
        Self::from_structure(structure)
    }
}

/// Shared caps handle used throughout negotiation.
pub type CapsRef = Arc<Caps>;
