use crate::data_view::DataView;
use crate::tag::{NbtTag, TagType};
use crate::*;
use io::Read;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct ReadAdaptor<R: Read> {
    reader: R,
}

impl<R: Read> ReadAdaptor<R> {
    pub fn new(r: R) -> Self {
        Self { reader: r }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

macro_rules! read_be_number {
    ($($name:ident => $ty:ty),* $(,)?) => {
        $(
            pub fn $name(&mut self) -> Result<$ty> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                self.reader
                    .read_exact(&mut buf)
                    .map_err(Error::Incomplete)?;

                Ok(<$ty>::from_be_bytes(buf))
            }
        )*
    };
}

impl<R: Read> ReadAdaptor<R> {
    read_be_number! {
        get_u8_be => u8,
        get_i8_be => i8,
        get_i16_be => i16,
        get_u16_be => u16,
        get_i32_be => i32,
        get_i64_be => i64,
        get_f32_be => f32,
        get_f64_be => f64,
    }

    /// Reads exactly `count` bytes. The buffer grows with the data actually read, so a
    /// corrupt length prefix can not make us allocate gigabytes up front.
    pub fn read_boxed_slice(&mut self, count: usize) -> Result<Box<[u8]>> {
        let mut buf = Vec::with_capacity(count.min(PREALLOCATION_LIMIT));
        let read = self
            .reader
            .by_ref()
            .take(count as u64)
            .read_to_end(&mut buf)
            .map_err(Error::Incomplete)?;
        if read != count {
            return Err(Error::Incomplete(io::ErrorKind::UnexpectedEof.into()));
        }

        Ok(buf.into())
    }

    fn get_length(&mut self) -> Result<usize> {
        let len = self.get_i32_be()?;
        if len < 0 {
            return Err(Error::NegativeLength(len));
        }
        Ok(len as usize)
    }
}

/// Upper bound for capacity reserved before any element has been read.
const PREALLOCATION_LIMIT: usize = 4096;

pub fn get_nbt_string<R: Read>(bytes: &mut ReadAdaptor<R>) -> Result<String> {
    let len = bytes.get_u16_be()? as usize;
    let string_bytes = bytes.read_boxed_slice(len)?;
    let string = cesu8::from_java_cesu8(&string_bytes).map_err(|_| Error::Cesu8DecodingError)?;
    Ok(string.into_owned())
}

/// Reads a root tag header and returns the root name. The root must be a compound.
pub(crate) fn read_root_header<R: Read>(reader: &mut ReadAdaptor<R>, named: bool) -> Result<String> {
    let tag_type_id = reader.get_u8_be()?;
    if tag_type_id != COMPOUND_ID {
        return Err(Error::NoRootCompound(tag_type_id));
    }

    if named {
        get_nbt_string(reader)
    } else {
        Ok(String::new())
    }
}

/// Reads `(type, name, payload)` entries until the `End` marker.
pub fn read_compound_content<R: Read>(reader: &mut ReadAdaptor<R>, depth: usize) -> Result<DataView> {
    if depth > MAX_DEPTH {
        return Err(Error::TooDeep(MAX_DEPTH));
    }

    let mut view = DataView::new();
    loop {
        let tag_id = reader.get_u8_be()?;
        if tag_id == END_ID {
            break;
        }

        let tag_type = TagType::from_id(tag_id).ok_or(Error::UnknownTagId(tag_id))?;
        let name = get_nbt_string(reader)?;
        let tag = read_tag_payload(reader, tag_type, depth)?;
        view.put_local(&name, tag);
    }

    Ok(view)
}

pub fn read_tag_payload<R: Read>(
    reader: &mut ReadAdaptor<R>,
    tag_type: TagType,
    depth: usize,
) -> Result<NbtTag> {
    Ok(match tag_type {
        TagType::End => return Err(Error::UnexpectedEnd),
        TagType::Byte => NbtTag::Byte(reader.get_i8_be()?),
        TagType::Short => NbtTag::Short(reader.get_i16_be()?),
        TagType::Int => NbtTag::Int(reader.get_i32_be()?),
        TagType::Long => NbtTag::Long(reader.get_i64_be()?),
        TagType::Float => NbtTag::Float(reader.get_f32_be()?),
        TagType::Double => NbtTag::Double(reader.get_f64_be()?),
        TagType::ByteArray => {
            let len = reader.get_length()?;
            NbtTag::ByteArray(reader.read_boxed_slice(len)?)
        }
        TagType::String => NbtTag::String(get_nbt_string(reader)?),
        TagType::List => {
            if depth >= MAX_DEPTH {
                return Err(Error::TooDeep(MAX_DEPTH));
            }

            let element_id = reader.get_u8_be()?;
            let element_type =
                TagType::from_id(element_id).ok_or(Error::UnknownTagId(element_id))?;
            let len = reader.get_length()?;
            if len == 0 && element_type != TagType::End {
                return Ok(NbtTag::EmptyList(element_type));
            }

            let mut list = Vec::with_capacity(len.min(PREALLOCATION_LIMIT));
            for _ in 0..len {
                list.push(read_tag_payload(reader, element_type, depth + 1)?);
            }
            NbtTag::List(list)
        }
        TagType::Compound => NbtTag::Compound(read_compound_content(reader, depth + 1)?),
        TagType::IntArray => {
            let len = reader.get_length()?;
            let mut int_array = Vec::with_capacity(len.min(PREALLOCATION_LIMIT));
            for _ in 0..len {
                int_array.push(reader.get_i32_be()?);
            }
            NbtTag::IntArray(int_array.into_boxed_slice())
        }
    })
}
