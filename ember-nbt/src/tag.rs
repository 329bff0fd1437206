use std::fmt::{self, Display};

use crate::data_view::DataView;
use crate::*;

/// The kind of a tag, as written in front of every named tag and list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TagType {
    End = END_ID,
    Byte = BYTE_ID,
    Short = SHORT_ID,
    Int = INT_ID,
    Long = LONG_ID,
    Float = FLOAT_ID,
    Double = DOUBLE_ID,
    ByteArray = BYTE_ARRAY_ID,
    String = STRING_ID,
    List = LIST_ID,
    Compound = COMPOUND_ID,
    IntArray = INT_ARRAY_ID,
}

impl TagType {
    pub const fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            END_ID => Self::End,
            BYTE_ID => Self::Byte,
            SHORT_ID => Self::Short,
            INT_ID => Self::Int,
            LONG_ID => Self::Long,
            FLOAT_ID => Self::Float,
            DOUBLE_ID => Self::Double,
            BYTE_ARRAY_ID => Self::ByteArray,
            STRING_ID => Self::String,
            LIST_ID => Self::List,
            COMPOUND_ID => Self::Compound,
            INT_ARRAY_ID => Self::IntArray,
            _ => return None,
        })
    }

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::End => "END",
            Self::Byte => "BYTE",
            Self::Short => "SHORT",
            Self::Int => "INT",
            Self::Long => "LONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::ByteArray => "BYTE_ARRAY",
            Self::String => "STRING",
            Self::List => "LIST",
            Self::Compound => "COMPOUND",
            Self::IntArray => "INT_ARRAY",
        }
    }

    /// Name for a raw id read off the wire, which may not be a known tag.
    pub fn describe_id(id: u8) -> String {
        match Self::from_id(id) {
            Some(tag_type) => tag_type.name().to_string(),
            None => format!("UNKNOWN({id})"),
        }
    }
}

impl Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single value stored in a [`DataView`].
///
/// This is the closed set of shapes the binary format can express. `End` only
/// exists on the wire as a terminator, so it has no value form here.
#[derive(Clone, Debug, PartialEq)]
pub enum NbtTag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Box<[u8]>),
    String(String),
    /// Every element must share one shape; checked when encoding.
    List(Vec<NbtTag>),
    /// An empty list declaring an element type other than `End`. Kept so that such a list
    /// is written back with the type it was read with.
    EmptyList(TagType),
    Compound(DataView),
    IntArray(Box<[i32]>),
}

/// Classifies a value by the tag it will be written as.
pub const fn shape_of(value: &NbtTag) -> TagType {
    match value {
        NbtTag::Byte(_) => TagType::Byte,
        NbtTag::Short(_) => TagType::Short,
        NbtTag::Int(_) => TagType::Int,
        NbtTag::Long(_) => TagType::Long,
        NbtTag::Float(_) => TagType::Float,
        NbtTag::Double(_) => TagType::Double,
        NbtTag::ByteArray(_) => TagType::ByteArray,
        NbtTag::String(_) => TagType::String,
        NbtTag::List(_) | NbtTag::EmptyList(_) => TagType::List,
        NbtTag::Compound(_) => TagType::Compound,
        NbtTag::IntArray(_) => TagType::IntArray,
    }
}

impl NbtTag {
    #[inline]
    pub const fn tag_type(&self) -> TagType {
        shape_of(self)
    }

    /// The child type a list of these elements is written with. Empty lists are `End`.
    pub fn list_element_type(list: &[NbtTag]) -> TagType {
        list.first().map_or(TagType::End, NbtTag::tag_type)
    }

    pub fn extract_byte(&self) -> Option<i8> {
        match self {
            NbtTag::Byte(byte) => Some(*byte),
            _ => None,
        }
    }

    pub fn extract_short(&self) -> Option<i16> {
        match self {
            NbtTag::Short(short) => Some(*short),
            _ => None,
        }
    }

    pub fn extract_int(&self) -> Option<i32> {
        match self {
            NbtTag::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn extract_long(&self) -> Option<i64> {
        match self {
            NbtTag::Long(long) => Some(*long),
            _ => None,
        }
    }

    pub fn extract_float(&self) -> Option<f32> {
        match self {
            NbtTag::Float(float) => Some(*float),
            _ => None,
        }
    }

    pub fn extract_double(&self) -> Option<f64> {
        match self {
            NbtTag::Double(double) => Some(*double),
            _ => None,
        }
    }

    /// Booleans are stored as a byte, any non zero value is `true`.
    pub fn extract_bool(&self) -> Option<bool> {
        self.extract_byte().map(|byte| byte != 0)
    }

    pub fn extract_byte_array(&self) -> Option<&[u8]> {
        match self {
            NbtTag::ByteArray(byte_array) => Some(byte_array),
            _ => None,
        }
    }

    pub fn extract_string(&self) -> Option<&str> {
        match self {
            NbtTag::String(string) => Some(string),
            _ => None,
        }
    }

    pub fn extract_list(&self) -> Option<&[NbtTag]> {
        match self {
            NbtTag::List(list) => Some(list),
            NbtTag::EmptyList(_) => Some(&[]),
            _ => None,
        }
    }

    pub fn extract_compound(&self) -> Option<&DataView> {
        match self {
            NbtTag::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    pub fn extract_compound_mut(&mut self) -> Option<&mut DataView> {
        match self {
            NbtTag::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    pub fn extract_int_array(&self) -> Option<&[i32]> {
        match self {
            NbtTag::IntArray(int_array) => Some(int_array),
            _ => None,
        }
    }
}

impl From<i8> for NbtTag {
    fn from(value: i8) -> Self {
        NbtTag::Byte(value)
    }
}

impl From<i16> for NbtTag {
    fn from(value: i16) -> Self {
        NbtTag::Short(value)
    }
}

impl From<i32> for NbtTag {
    fn from(value: i32) -> Self {
        NbtTag::Int(value)
    }
}

impl From<i64> for NbtTag {
    fn from(value: i64) -> Self {
        NbtTag::Long(value)
    }
}

impl From<f32> for NbtTag {
    fn from(value: f32) -> Self {
        NbtTag::Float(value)
    }
}

impl From<f64> for NbtTag {
    fn from(value: f64) -> Self {
        NbtTag::Double(value)
    }
}

impl From<bool> for NbtTag {
    fn from(value: bool) -> Self {
        NbtTag::Byte(value as i8)
    }
}

impl From<&str> for NbtTag {
    fn from(value: &str) -> Self {
        NbtTag::String(value.to_string())
    }
}

impl From<String> for NbtTag {
    fn from(value: String) -> Self {
        NbtTag::String(value)
    }
}

impl From<&[u8]> for NbtTag {
    fn from(value: &[u8]) -> Self {
        NbtTag::ByteArray(value.into())
    }
}

impl From<Vec<u8>> for NbtTag {
    fn from(value: Vec<u8>) -> Self {
        NbtTag::ByteArray(value.into_boxed_slice())
    }
}

impl From<&[i32]> for NbtTag {
    fn from(value: &[i32]) -> Self {
        NbtTag::IntArray(value.into())
    }
}

impl From<Vec<i32>> for NbtTag {
    fn from(value: Vec<i32>) -> Self {
        NbtTag::IntArray(value.into_boxed_slice())
    }
}

impl From<Vec<NbtTag>> for NbtTag {
    fn from(value: Vec<NbtTag>) -> Self {
        NbtTag::List(value)
    }
}

impl From<DataView> for NbtTag {
    fn from(value: DataView) -> Self {
        NbtTag::Compound(value)
    }
}

#[cfg(test)]
mod test {
    use super::{NbtTag, TagType, shape_of};
    use crate::data_view::DataView;

    #[test]
    fn ids_round_trip_through_type() {
        for id in 0..=11u8 {
            let tag_type = TagType::from_id(id).unwrap();
            assert_eq!(tag_type.id(), id);
        }
        assert!(TagType::from_id(12).is_none());
        assert!(TagType::from_id(0xFF).is_none());
    }

    #[test]
    fn shape_classification() {
        assert_eq!(shape_of(&NbtTag::from(true)), TagType::Byte);
        assert_eq!(shape_of(&NbtTag::from(vec![1u8, 2])), TagType::ByteArray);
        assert_eq!(shape_of(&NbtTag::from(vec![1i32, 2])), TagType::IntArray);
        assert_eq!(shape_of(&NbtTag::from(DataView::new())), TagType::Compound);
        assert_eq!(NbtTag::list_element_type(&[]), TagType::End);
        assert_eq!(
            NbtTag::list_element_type(&[NbtTag::Short(1), NbtTag::Short(2)]),
            TagType::Short
        );
    }

    #[test]
    fn describe_unknown_id() {
        assert_eq!(TagType::describe_id(10), "COMPOUND");
        assert_eq!(TagType::describe_id(99), "UNKNOWN(99)");
    }
}
