//! The capability value lattice.
//!
//! A [`Value`] is one datum inside a capability
//! [`Structure`](crate::structure::Structure): a concrete scalar, a
//! gcd-normalized fraction, an inclusive stepped range, an ordered list of
//! alternatives, or an opaque object handle.
//!
//! Two operations drive negotiation:
//!
//! - [`Value::compare`] orders two values, reporting `Unordered` for
//!   compatible values without a total order (ranges, lists) and
//!   `Incomparable` for type-incompatible pairs.
//! - [`Value::intersect`] narrows two values to their common ground, or
//!   reports that none exists.
//!
//! Intersection is only attempted between type-compatible pairs: a static
//! mask pairs each variant with its base type and with ranges of the same
//! signedness. Signed and unsigned families never mix.
//!
//! # Examples
//!
//! ```rust
//! use riffle::value::{IntRange, Value};
//!
//! let a = Value::IntRange(IntRange::new(0, 10, 2));
//! let b = Value::IntRange(IntRange::new(5, 20, 3));
//!
//! // Overlap is [5, 10], step collapses to gcd(2, 3) = 1.
//! let narrowed = a.intersect(&b).unwrap();
//! assert_eq!(narrowed, Value::IntRange(IntRange::new(5, 10, 1)));
//! ```

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Fractions
// ============================================================================

fn gcd_u64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn gcd_u32(a: u32, b: u32) -> u32 {
    gcd_u64(a as u64, b as u64) as u32
}

fn gcd_i32(a: i32, b: i32) -> i32 {
    gcd_u64(a.unsigned_abs() as u64, b.unsigned_abs() as u64) as i32
}

fn lcm_u32(a: u32, b: u32) -> u32 {
    if a == 0 || b == 0 {
        return 0;
    }
    let l = (a as u64 / gcd_u64(a as u64, b as u64)) * b as u64;
    u32::try_from(l).unwrap_or(u32::MAX)
}

fn lcm_i32(a: i32, b: i32) -> i32 {
    i32::try_from(lcm_u32(a.unsigned_abs(), b.unsigned_abs())).unwrap_or(i32::MAX)
}

/// A signed fraction, gcd-reduced at construction.
///
/// The sign lives on the numerator; the denominator is always positive.
/// Comparison cross-multiplies in 64 bits, so framerates like 30000/1001
/// order correctly without overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fraction {
    num: i32,
    den: i32,
}

impl Fraction {
    /// Create a new fraction, normalizing via gcd.
    ///
    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: i32, den: i32) -> Self {
        assert!(den != 0, "fraction denominator must be non-zero");
        let sign = if (num < 0) != (den < 0) { -1 } else { 1 };
        let (num, den) = (num.unsigned_abs(), den.unsigned_abs());
        let g = gcd_u32(num, den).max(1);
        Self {
            num: sign * (num / g) as i32,
            den: (den / g) as i32,
        }
    }

    /// Get the (signed) numerator.
    #[inline]
    pub const fn num(self) -> i32 {
        self.num
    }

    /// Get the (positive) denominator.
    #[inline]
    pub const fn den(self) -> i32 {
        self.den
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        // Denominators are positive, so the cross product keeps the sign.
        let lhs = self.num as i64 * other.den as i64;
        let rhs = other.num as i64 * self.den as i64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// An unsigned fraction, gcd-reduced at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UFraction {
    num: u32,
    den: u32,
}

impl UFraction {
    /// Create a new fraction, normalizing via gcd.
    ///
    /// # Panics
    ///
    /// Panics if `den` is zero.
    pub fn new(num: u32, den: u32) -> Self {
        assert!(den != 0, "fraction denominator must be non-zero");
        let g = gcd_u32(num, den).max(1);
        Self {
            num: num / g,
            den: den / g,
        }
    }

    /// Get the numerator.
    #[inline]
    pub const fn num(self) -> u32 {
        self.num
    }

    /// Get the denominator.
    #[inline]
    pub const fn den(self) -> u32 {
        self.den
    }
}

impl PartialOrd for UFraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UFraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as u64 * other.den as u64;
        let rhs = other.num as u64 * self.den as u64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for UFraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

// ============================================================================
// Ranges
// ============================================================================

/// Inclusive signed integer range with a step hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IntRange {
    /// Smallest accepted value.
    pub min: i32,
    /// Largest accepted value.
    pub max: i32,
    /// Step between accepted values.
    pub step: i32,
}

impl IntRange {
    /// Create a new range.
    pub const fn new(min: i32, max: i32, step: i32) -> Self {
        Self { min, max, step }
    }

    /// Check whether a value lies within the closed bounds.
    #[inline]
    pub fn contains(&self, v: i32) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Inclusive unsigned integer range with a step hint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UintRange {
    /// Smallest accepted value.
    pub min: u32,
    /// Largest accepted value.
    pub max: u32,
    /// Step between accepted values.
    pub step: u32,
}

impl UintRange {
    /// Create a new range.
    pub const fn new(min: u32, max: u32, step: u32) -> Self {
        Self { min, max, step }
    }

    /// Check whether a value lies within the closed bounds.
    #[inline]
    pub fn contains(&self, v: u32) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Inclusive signed fraction range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FractionRange {
    /// Smallest accepted fraction.
    pub min: Fraction,
    /// Largest accepted fraction.
    pub max: Fraction,
    /// Step between accepted fractions.
    pub step: Fraction,
}

impl FractionRange {
    /// Create a new range.
    pub const fn new(min: Fraction, max: Fraction, step: Fraction) -> Self {
        Self { min, max, step }
    }

    /// Check whether a fraction lies within the closed bounds.
    #[inline]
    pub fn contains(&self, v: Fraction) -> bool {
        v >= self.min && v <= self.max
    }
}

/// Inclusive unsigned fraction range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UFractionRange {
    /// Smallest accepted fraction.
    pub min: UFraction,
    /// Largest accepted fraction.
    pub max: UFraction,
    /// Step between accepted fractions.
    pub step: UFraction,
}

impl UFractionRange {
    /// Create a new range.
    pub const fn new(min: UFraction, max: UFraction, step: UFraction) -> Self {
        Self { min, max, step }
    }

    /// Check whether a fraction lies within the closed bounds.
    #[inline]
    pub fn contains(&self, v: UFraction) -> bool {
        v >= self.min && v <= self.max
    }
}

// ============================================================================
// Handle
// ============================================================================

/// An opaque shared object reference inside a value.
///
/// Handles compare by identity and never intersect; they carry attachments
/// (a pool, a context) through a structure without giving the lattice any
/// insight into them.
#[derive(Clone)]
pub struct Handle(Arc<dyn Any + Send + Sync>);

impl Handle {
    /// Wrap a shared object.
    pub fn new(obj: Arc<dyn Any + Send + Sync>) -> Self {
        Self(obj)
    }

    /// Try to downcast the handle to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Check whether two handles point at the same object.
    pub fn same(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:p})", Arc::as_ptr(&self.0))
    }
}

// ============================================================================
// Value
// ============================================================================

/// One capability datum: a scalar, range, list, or object handle.
///
/// Lists own their nested values; handles share theirs. A value never
/// aliases another value's storage.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Boolean scalar.
    Bool(bool),
    /// Enumerated media constant (opaque id, equality only).
    Enum(u32),
    /// Signed integer scalar.
    Int(i32),
    /// Unsigned integer scalar.
    Uint(u32),
    /// Signed fraction scalar.
    Fraction(Fraction),
    /// Unsigned fraction scalar.
    UFraction(UFraction),
    /// Signed integer range.
    IntRange(IntRange),
    /// Unsigned integer range.
    UintRange(UintRange),
    /// Signed fraction range.
    FractionRange(FractionRange),
    /// Unsigned fraction range.
    UFractionRange(UFractionRange),
    /// Ordered list of alternative values.
    List(Vec<Value>),
    /// Opaque shared object reference.
    Handle(Handle),
}

/// Result of comparing two values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueOrder {
    /// Left sorts before right.
    Less,
    /// The values are equal.
    Equal,
    /// Left sorts after right.
    Greater,
    /// Compatible types without a total order (ranges, lists, handles).
    Unordered,
    /// Type-incompatible values; intersection is never attempted.
    Incomparable,
}

/// Variant discriminator used by the compatibility mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Bool,
    Enum,
    Int,
    Uint,
    Fraction,
    UFraction,
    IntRange,
    UintRange,
    FractionRange,
    UFractionRange,
    List,
    Handle,
}

impl Kind {
    /// Bitmask of kinds this kind may intersect with. Lists are handled
    /// elementwise before the mask applies.
    fn compat_mask(self) -> u16 {
        const BOOL: u16 = 1 << Kind::Bool as u16;
        const ENUM: u16 = 1 << Kind::Enum as u16;
        const INT: u16 = 1 << Kind::Int as u16;
        const UINT: u16 = 1 << Kind::Uint as u16;
        const FRAC: u16 = 1 << Kind::Fraction as u16;
        const UFRAC: u16 = 1 << Kind::UFraction as u16;
        const INT_R: u16 = 1 << Kind::IntRange as u16;
        const UINT_R: u16 = 1 << Kind::UintRange as u16;
        const FRAC_R: u16 = 1 << Kind::FractionRange as u16;
        const UFRAC_R: u16 = 1 << Kind::UFractionRange as u16;

        match self {
            Kind::Bool => BOOL,
            Kind::Enum => ENUM,
            Kind::Int => INT | INT_R,
            Kind::Uint => UINT | UINT_R,
            Kind::Fraction => FRAC | FRAC_R,
            Kind::UFraction => UFRAC | UFRAC_R,
            Kind::IntRange => INT | INT_R,
            Kind::UintRange => UINT | UINT_R,
            Kind::FractionRange => FRAC | FRAC_R,
            Kind::UFractionRange => UFRAC | UFRAC_R,
            // Lists defer to their elements. Handles pair only with
            // handles, and even then never intersect.
            Kind::List => u16::MAX,
            Kind::Handle => 1 << Kind::Handle as u16,
        }
    }

    fn compatible(self, other: Kind) -> bool {
        if self == Kind::List || other == Kind::List {
            return true;
        }
        self.compat_mask() & (1 << other as u16) != 0
    }
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Enum(_) => Kind::Enum,
            Value::Int(_) => Kind::Int,
            Value::Uint(_) => Kind::Uint,
            Value::Fraction(_) => Kind::Fraction,
            Value::UFraction(_) => Kind::UFraction,
            Value::IntRange(_) => Kind::IntRange,
            Value::UintRange(_) => Kind::UintRange,
            Value::FractionRange(_) => Kind::FractionRange,
            Value::UFractionRange(_) => Kind::UFractionRange,
            Value::List(_) => Kind::List,
            Value::Handle(_) => Kind::Handle,
        }
    }

    /// Check whether this value is a concrete primitive (not a range or
    /// list). Fixed values survive fixation unchanged.
    pub fn is_fixed(&self) -> bool {
        !matches!(
            self,
            Value::IntRange(_)
                | Value::UintRange(_)
                | Value::FractionRange(_)
                | Value::UFractionRange(_)
                | Value::List(_)
        )
    }

    /// Compare two values.
    ///
    /// Scalars of the same kind order totally. Compatible values without a
    /// total order (ranges, lists, handles) report `Unordered` unless they
    /// are equal. Type-incompatible pairs report `Incomparable`.
    pub fn compare(&self, other: &Value) -> ValueOrder {
        if !self.kind().compatible(other.kind()) {
            return ValueOrder::Incomparable;
        }

        let ord = match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Enum(a), Value::Enum(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Uint(a), Value::Uint(b)) => a.cmp(b),
            (Value::Fraction(a), Value::Fraction(b)) => a.cmp(b),
            (Value::UFraction(a), Value::UFraction(b)) => a.cmp(b),
            _ => {
                return if self == other {
                    ValueOrder::Equal
                } else {
                    ValueOrder::Unordered
                };
            }
        };

        match ord {
            Ordering::Less => ValueOrder::Less,
            Ordering::Equal => ValueOrder::Equal,
            Ordering::Greater => ValueOrder::Greater,
        }
    }

    /// Intersect two values, producing their common ground.
    ///
    /// Returns a narrower concrete value, a narrower range, or a filtered
    /// list; `None` means the values cannot flow together.
    pub fn intersect(&self, other: &Value) -> Option<Value> {
        if !self.kind().compatible(other.kind()) {
            return None;
        }

        // Lists distribute over the other operand before any scalar rule.
        if let Value::List(items) = self {
            return list_intersect(items, other);
        }
        if let Value::List(items) = other {
            return list_intersect(items, self);
        }

        match (self, other) {
            // Primitive vs primitive: equal or nothing.
            (Value::Bool(a), Value::Bool(b)) if a == b => Some(self.clone()),
            (Value::Enum(a), Value::Enum(b)) if a == b => Some(self.clone()),
            (Value::Int(a), Value::Int(b)) if a == b => Some(self.clone()),
            (Value::Uint(a), Value::Uint(b)) if a == b => Some(self.clone()),
            (Value::Fraction(a), Value::Fraction(b)) if a == b => Some(self.clone()),
            (Value::UFraction(a), Value::UFraction(b)) if a == b => Some(self.clone()),

            // Range vs primitive: the primitive, if the bounds admit it.
            (Value::IntRange(r), Value::Int(v)) | (Value::Int(v), Value::IntRange(r)) => {
                r.contains(*v).then_some(Value::Int(*v))
            }
            (Value::UintRange(r), Value::Uint(v)) | (Value::Uint(v), Value::UintRange(r)) => {
                r.contains(*v).then_some(Value::Uint(*v))
            }
            (Value::FractionRange(r), Value::Fraction(v))
            | (Value::Fraction(v), Value::FractionRange(r)) => {
                r.contains(*v).then_some(Value::Fraction(*v))
            }
            (Value::UFractionRange(r), Value::UFraction(v))
            | (Value::UFraction(v), Value::UFractionRange(r)) => {
                r.contains(*v).then_some(Value::UFraction(*v))
            }

            // Range vs range: bounds overlap, steps collapse to gcd.
            (Value::IntRange(a), Value::IntRange(b)) => {
                if a.min > b.max || b.min > a.max {
                    return None;
                }
                let (min, max) = (a.min.max(b.min), a.max.min(b.max));
                if min == max {
                    return Some(Value::Int(min));
                }
                Some(Value::IntRange(IntRange::new(
                    min,
                    max,
                    gcd_i32(a.step, b.step),
                )))
            }
            (Value::UintRange(a), Value::UintRange(b)) => {
                if a.min > b.max || b.min > a.max {
                    return None;
                }
                let (min, max) = (a.min.max(b.min), a.max.min(b.max));
                if min == max {
                    return Some(Value::Uint(min));
                }
                Some(Value::UintRange(UintRange::new(
                    min,
                    max,
                    gcd_u32(a.step, b.step),
                )))
            }

            // Fraction range vs fraction range: the step keeps every grid
            // point of both sides (gcd of numerators, lcm of denominators).
            (Value::FractionRange(a), Value::FractionRange(b)) => {
                if a.min > b.max || b.min > a.max {
                    return None;
                }
                let (min, max) = (a.min.max(b.min), a.max.min(b.max));
                if min == max {
                    return Some(Value::Fraction(min));
                }
                let step = Fraction::new(
                    gcd_i32(a.step.num(), b.step.num()),
                    lcm_i32(a.step.den(), b.step.den()),
                );
                Some(Value::FractionRange(FractionRange::new(min, max, step)))
            }
            (Value::UFractionRange(a), Value::UFractionRange(b)) => {
                if a.min > b.max || b.min > a.max {
                    return None;
                }
                let (min, max) = (a.min.max(b.min), a.max.min(b.max));
                if min == max {
                    return Some(Value::UFraction(min));
                }
                let step = UFraction::new(
                    gcd_u32(a.step.num(), b.step.num()),
                    lcm_u32(a.step.den(), b.step.den()),
                );
                Some(Value::UFractionRange(UFractionRange::new(min, max, step)))
            }

            _ => None,
        }
    }

    /// Reduce a range or list to one concrete value.
    ///
    /// Ranges yield their minimum; lists yield their first element,
    /// recursively fixated. Already-fixed values are returned unchanged.
    pub fn fixate(&self) -> Value {
        match self {
            Value::IntRange(r) => Value::Int(r.min),
            Value::UintRange(r) => Value::Uint(r.min),
            Value::FractionRange(r) => Value::Fraction(r.min),
            Value::UFractionRange(r) => Value::UFraction(r.min),
            Value::List(items) => match items.first() {
                Some(first) => first.fixate(),
                None => Value::List(Vec::new()),
            },
            fixed => fixed.clone(),
        }
    }
}

/// Intersect every list element with `other` and collect the survivors.
fn list_intersect(items: &[Value], other: &Value) -> Option<Value> {
    let mut hits = Vec::new();
    for item in items {
        if let Some(hit) = item.intersect(other) {
            match hit {
                // Flatten nested hits so list-vs-list stays a flat list.
                Value::List(sub) => hits.extend(sub),
                v => hits.push(v),
            }
        }
    }
    if hits.is_empty() {
        None
    } else {
        Some(Value::List(hits))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Uint(v)
    }
}

impl From<Fraction> for Value {
    fn from(v: Fraction) -> Self {
        Value::Fraction(v)
    }
}

impl From<UFraction> for Value {
    fn from(v: UFraction) -> Self {
        Value::UFraction(v)
    }
}
