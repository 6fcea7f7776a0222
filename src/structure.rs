//! Media-typed field maps.
//!
//! A [`Structure`] is one alternative inside a
//! [`Caps`](crate::caps::Caps): a media-type id plus an ordered,
//! unique-key map from [`FieldId`] to [`Value`]. Structures own their
//! values.
//!
//! Intersection requires equal media types. Fields present on both sides
//! must intersect; a field present on only one side passes through, the
//! missing side being treated as an unconstrained wildcard.

use crate::value::Value;
use smallvec::SmallVec;

/// Identifier of a capability field inside a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FieldId(pub u16);

/// Identifier of a media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MediaType(pub u8);

/// Well-known field ids used by the built-in elements and tests.
pub mod fields {
    use super::FieldId;

    /// Frame width in pixels.
    pub const WIDTH: FieldId = FieldId(0x01);
    /// Frame height in pixels.
    pub const HEIGHT: FieldId = FieldId(0x02);
    /// Frame rate as a fraction.
    pub const FRAMERATE: FieldId = FieldId(0x03);
    /// Sample or pixel format constant.
    pub const FORMAT: FieldId = FieldId(0x04);
    /// Audio channel count.
    pub const CHANNELS: FieldId = FieldId(0x05);
    /// Audio sample rate in Hz.
    pub const RATE: FieldId = FieldId(0x06);
    /// Explicit buffer size in bytes.
    pub const BLOCK_SIZE: FieldId = FieldId(0x07);
}

/// Well-known media type ids used by the built-in elements and tests.
pub mod media {
    use super::MediaType;

    /// Uncompressed video frames.
    pub const VIDEO_RAW: MediaType = MediaType(0x01);
    /// Uncompressed audio samples.
    pub const AUDIO_RAW: MediaType = MediaType(0x02);
    /// Untyped bytes.
    pub const BYTES: MediaType = MediaType(0x03);
}

type FieldVec = SmallVec<[(FieldId, Value); 4]>;

/// A media-typed set of field constraints.
///
/// Field insertion order is preserved (it decides fixation order), but
/// equality is order-independent: two structures are equal when they carry
/// the same media type and the same field set.
#[derive(Debug, Clone)]
pub struct Structure {
    media_type: MediaType,
    fields: FieldVec,
}

impl Structure {
    /// Create an empty structure for a media type.
    pub fn new(media_type: MediaType) -> Self {
        Self {
            media_type,
            fields: FieldVec::new(),
        }
    }

    /// Start building a structure with chained field insertion.
    pub fn builder(media_type: MediaType) -> StructureBuilder {
        StructureBuilder {
            structure: Self::new(media_type),
        }
    }

    /// Get the media type id.
    #[inline]
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Set a field, replacing any existing value for the id.
    pub fn set(&mut self, id: FieldId, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(fid, _)| *fid == id) {
            slot.1 = value;
        } else {
            self.fields.push((id, value));
        }
    }

    /// Get a field's value.
    pub fn get(&self, id: FieldId) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(fid, _)| *fid == id)
            .map(|(_, v)| v)
    }

    /// Check whether a field is present.
    pub fn has(&self, id: FieldId) -> bool {
        self.get(id).is_some()
    }

    /// Iterate over fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.fields.iter().map(|(id, v)| (*id, v))
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check whether the structure has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check whether every field holds a concrete primitive value.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    /// Intersect two structures.
    ///
    /// Requires equal media types. Fields present on both sides must
    /// intersect; one-sided fields pass through unchanged. Returns `None`
    /// when the media types differ or any common field fails to intersect.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.media_type != other.media_type {
            return None;
        }

        let mut out = Structure::new(self.media_type);
        for (id, value) in self.fields() {
            match other.get(id) {
                Some(theirs) => out.set(id, value.intersect(theirs)?),
                None => out.set(id, value.clone()),
            }
        }
        for (id, value) in other.fields() {
            if !self.has(id) {
                out.set(id, value.clone());
            }
        }
        Some(out)
    }

    /// Produce a copy with every range or list field reduced to one
    /// concrete value.
    pub fn fixate(&self) -> Structure {
        let mut out = Structure::new(self.media_type);
        for (id, value) in self.fields() {
            out.set(id, value.fixate());
        }
        out
    }
}

impl PartialEq for Structure {
    fn eq(&self, other: &Self) -> bool {
        self.media_type == other.media_type
            && self.fields.len() == other.fields.len()
            && self
                .fields()
                .all(|(id, value)| other.get(id) == Some(value))
    }
}

/// Chained construction for [`Structure`].
pub struct StructureBuilder {
    structure: Structure,
}

impl StructureBuilder {
    /// Add a field.
    pub fn field(mut self, id: FieldId, value: impl Into<Value>) -> Self {
        self.structure.set(id, value);
        self
    }

    /// Finish the structure.
    pub fn build(self) -> Structure {
        self.structure
    }
}
