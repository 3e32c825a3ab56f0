//! Tagged representation of script values crossing the process boundary.
//!
//! The isolated side only ever sees engine values; the privileged side only
//! ever sees [`TaggedValue`]. Classification into the closed [`ValueTag`] set
//! happens once, on the isolated side, through the [`ScriptValue`] capability
//! trait so the engine binding stays a thin adapter.

use serde::Serialize;

use super::error::ProtocolError;

/// Discriminant written as the first byte of every encoded value.
///
/// Ordinals are part of the wire format and must never be reordered.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ValueTag {
    Unknown = 0,
    Array = 1,
    ArrayBuffer = 2,
    Bool = 3,
    Date = 4,
    Double = 5,
    Function = 6,
    Int = 7,
    Null = 8,
    Object = 9,
    String = 10,
    UInt = 11,
    Undefined = 12,
}

impl ValueTag {
    /// Whether values with this tag carry bytes after the tag byte.
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            ValueTag::Bool | ValueTag::Double | ValueTag::Int | ValueTag::String | ValueTag::UInt
        )
    }
}

impl TryFrom<u8> for ValueTag {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0 => ValueTag::Unknown,
            1 => ValueTag::Array,
            2 => ValueTag::ArrayBuffer,
            3 => ValueTag::Bool,
            4 => ValueTag::Date,
            5 => ValueTag::Double,
            6 => ValueTag::Function,
            7 => ValueTag::Int,
            8 => ValueTag::Null,
            9 => ValueTag::Object,
            10 => ValueTag::String,
            11 => ValueTag::UInt,
            12 => ValueTag::Undefined,
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }
}

/// A script value reduced to its tag and, for scalar kinds, its payload.
///
/// Structured kinds (arrays, objects, functions, dates, buffers) keep only
/// their tag; the encoding is diagnostic and does not preserve structure.
#[derive(Clone, Debug)]
pub enum TaggedValue {
    Unknown,
    Array,
    ArrayBuffer,
    Bool(bool),
    Date,
    /// Any number that is not an int32 or uint32, including NaN and `-0.0`.
    Double(f64),
    Function,
    Int(i32),
    Null,
    Object,
    String(String),
    /// A number in uint32 range that does not fit an int32.
    UInt(u32),
    Undefined,
}

impl TaggedValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            TaggedValue::Unknown => ValueTag::Unknown,
            TaggedValue::Array => ValueTag::Array,
            TaggedValue::ArrayBuffer => ValueTag::ArrayBuffer,
            TaggedValue::Bool(_) => ValueTag::Bool,
            TaggedValue::Date => ValueTag::Date,
            TaggedValue::Double(_) => ValueTag::Double,
            TaggedValue::Function => ValueTag::Function,
            TaggedValue::Int(_) => ValueTag::Int,
            TaggedValue::Null => ValueTag::Null,
            TaggedValue::Object => ValueTag::Object,
            TaggedValue::String(_) => ValueTag::String,
            TaggedValue::UInt(_) => ValueTag::UInt,
            TaggedValue::Undefined => ValueTag::Undefined,
        }
    }

    /// Build the payload-less value for `tag`.
    ///
    /// Returns `None` for tags that require a payload.
    pub fn from_bare_tag(tag: ValueTag) -> Option<Self> {
        Some(match tag {
            ValueTag::Unknown => TaggedValue::Unknown,
            ValueTag::Array => TaggedValue::Array,
            ValueTag::ArrayBuffer => TaggedValue::ArrayBuffer,
            ValueTag::Date => TaggedValue::Date,
            ValueTag::Function => TaggedValue::Function,
            ValueTag::Null => TaggedValue::Null,
            ValueTag::Object => TaggedValue::Object,
            ValueTag::Undefined => TaggedValue::Undefined,
            ValueTag::Bool
            | ValueTag::Double
            | ValueTag::Int
            | ValueTag::String
            | ValueTag::UInt => return None,
        })
    }

    /// Render as JSON for log fields.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self.tag()))
    }

    /// Classify an engine value, checking predicates in a fixed priority order.
    pub fn classify<V: ScriptValue + ?Sized>(value: &mut V) -> Self {
        if value.is_array() {
            TaggedValue::Array
        } else if value.is_array_buffer() {
            TaggedValue::ArrayBuffer
        } else if value.is_bool() {
            TaggedValue::Bool(value.bool_value())
        } else if value.is_date() {
            TaggedValue::Date
        } else if value.is_double() {
            TaggedValue::Double(value.double_value())
        } else if value.is_function() {
            TaggedValue::Function
        } else if value.is_int() {
            TaggedValue::Int(value.int_value())
        } else if value.is_null() {
            TaggedValue::Null
        } else if value.is_object() {
            TaggedValue::Object
        } else if value.is_string() {
            TaggedValue::String(value.string_value())
        } else if value.is_uint() {
            TaggedValue::UInt(value.uint_value())
        } else if value.is_undefined() {
            TaggedValue::Undefined
        } else {
            TaggedValue::Unknown
        }
    }
}

// Doubles compare bit-for-bit so NaN and -0.0 survive equality checks.
impl PartialEq for TaggedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TaggedValue::Bool(a), TaggedValue::Bool(b)) => a == b,
            (TaggedValue::Double(a), TaggedValue::Double(b)) => a.to_bits() == b.to_bits(),
            (TaggedValue::Int(a), TaggedValue::Int(b)) => a == b,
            (TaggedValue::String(a), TaggedValue::String(b)) => a == b,
            (TaggedValue::UInt(a), TaggedValue::UInt(b)) => a == b,
            (a, b) => !a.tag().has_payload() && a.tag() == b.tag(),
        }
    }
}

// Structured kinds serialize as their tag name.
impl Serialize for TaggedValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            TaggedValue::Null | TaggedValue::Undefined => serializer.serialize_none(),
            TaggedValue::Bool(b) => serializer.serialize_bool(*b),
            TaggedValue::Double(f) => serializer.serialize_f64(*f),
            TaggedValue::Int(i) => serializer.serialize_i32(*i),
            TaggedValue::UInt(u) => serializer.serialize_u32(*u),
            TaggedValue::String(s) => serializer.serialize_str(s),
            other => other.tag().serialize(serializer),
        }
    }
}

/// Capability set an engine value exposes for classification.
///
/// Exactly one predicate is expected to hold under the priority order used by
/// [`TaggedValue::classify`]. Accessors are only called after their matching
/// predicate returned true.
pub trait ScriptValue {
    fn is_array(&self) -> bool;
    fn is_array_buffer(&self) -> bool;
    fn is_bool(&self) -> bool;
    fn is_date(&self) -> bool;
    fn is_double(&self) -> bool;
    fn is_function(&self) -> bool;
    fn is_int(&self) -> bool;
    fn is_null(&self) -> bool;
    fn is_object(&self) -> bool;
    fn is_string(&self) -> bool;
    fn is_uint(&self) -> bool;
    fn is_undefined(&self) -> bool;

    fn bool_value(&mut self) -> bool;
    fn double_value(&mut self) -> f64;
    fn int_value(&mut self) -> i32;
    fn uint_value(&mut self) -> u32;
    fn string_value(&mut self) -> String;
}
