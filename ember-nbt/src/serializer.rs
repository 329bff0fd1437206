use std::io::Write;

use crate::data_view::DataView;
use crate::tag::{NbtTag, TagType};
use crate::{COMPOUND_ID, END_ID, Error, MAX_DEPTH};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct WriteAdaptor<W: Write> {
    writer: W,
}

impl<W: Write> WriteAdaptor<W> {
    pub fn new(w: W) -> Self {
        Self { writer: w }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

macro_rules! write_be_number {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self, value: $ty) -> Result<()> {
                let buf = value.to_be_bytes();
                self.writer.write_all(&buf).map_err(Error::Incomplete)?;
                Ok(())
            }
        )*
    };
}

impl<W: Write> WriteAdaptor<W> {
    write_be_number! {
        write_u8_be => u8,
        write_i8_be => i8,
        write_u16_be => u16,
        write_i16_be => i16,
        write_i32_be => i32,
        write_i64_be => i64,
        write_f32_be => f32,
        write_f64_be => f64,
    }

    pub fn write_slice(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value).map_err(Error::Incomplete)?;
        Ok(())
    }

    fn write_length(&mut self, len: usize) -> Result<()> {
        if len > i32::MAX as usize {
            return Err(Error::LargeLength(len));
        }
        self.write_i32_be(len as i32)
    }
}

pub fn write_nbt_string<W: Write>(w: &mut WriteAdaptor<W>, string: &str) -> Result<()> {
    let java_string = cesu8::to_java_cesu8(string);
    let len = java_string.len();
    if len > u16::MAX as usize {
        return Err(Error::LargeLength(len));
    }

    w.write_u16_be(len as u16)?;
    w.write_slice(&java_string)
}

pub(crate) fn write_root<W: Write>(
    w: &mut WriteAdaptor<W>,
    name: Option<&str>,
    view: &DataView,
) -> Result<()> {
    w.write_u8_be(COMPOUND_ID)?;
    if let Some(name) = name {
        write_nbt_string(w, name)?;
    }
    write_compound_content(w, view, 0)
}

/// Writes every entry of `view` followed by the `End` marker.
pub fn write_compound_content<W: Write>(
    w: &mut WriteAdaptor<W>,
    view: &DataView,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }

    for (name, tag) in view.iter() {
        w.write_u8_be(tag.tag_type().id())?;
        write_nbt_string(w, name)?;
        write_tag_payload(w, tag, depth)?;
    }
    w.write_u8_be(END_ID)
}

pub fn write_tag_payload<W: Write>(w: &mut WriteAdaptor<W>, tag: &NbtTag, depth: usize) -> Result<()> {
    match tag {
        NbtTag::Byte(byte) => w.write_i8_be(*byte)?,
        NbtTag::Short(short) => w.write_i16_be(*short)?,
        NbtTag::Int(int) => w.write_i32_be(*int)?,
        NbtTag::Long(long) => w.write_i64_be(*long)?,
        NbtTag::Float(float) => w.write_f32_be(*float)?,
        NbtTag::Double(double) => w.write_f64_be(*double)?,
        NbtTag::ByteArray(byte_array) => {
            w.write_length(byte_array.len())?;
            w.write_slice(byte_array)?;
        }
        NbtTag::String(string) => write_nbt_string(w, string)?,
        NbtTag::List(list) => {
            if depth >= MAX_DEPTH {
                return Err(Error::TooDeep(MAX_DEPTH));
            }

            let element_type = NbtTag::list_element_type(list);
            check_homogeneous(list, element_type)?;

            w.write_u8_be(element_type.id())?;
            w.write_length(list.len())?;
            for element in list {
                write_tag_payload(w, element, depth + 1)?;
            }
        }
        NbtTag::EmptyList(element_type) => {
            w.write_u8_be(element_type.id())?;
            w.write_length(0)?;
        }
        NbtTag::Compound(compound) => write_compound_content(w, compound, depth + 1)?,
        NbtTag::IntArray(int_array) => {
            w.write_length(int_array.len())?;
            for int in int_array {
                w.write_i32_be(*int)?;
            }
        }
    };
    Ok(())
}

fn check_homogeneous(list: &[NbtTag], expected: TagType) -> Result<()> {
    match list.iter().find(|element| element.tag_type() != expected) {
        Some(element) => Err(Error::MixedList {
            expected,
            found: element.tag_type(),
        }),
        None => Ok(()),
    }
}
