use std::io::{self, Read, Write};

use bytes::Bytes;
use data_view::DataView;
use deserializer::{ReadAdaptor, read_compound_content, read_root_header};
use flate2::Compression;
use serializer::{WriteAdaptor, write_root};
use tag::TagType;
use thiserror::Error;

pub mod data_view;
pub mod deserializer;
pub mod nbt_compress;
pub mod serializer;
pub mod tag;

pub use data_view::{DataSerializable, PATH_SEPARATOR};
pub use deserializer::get_nbt_string;
pub use tag::{NbtTag, shape_of};

pub const END_ID: u8 = 0x00;
pub const BYTE_ID: u8 = 0x01;
pub const SHORT_ID: u8 = 0x02;
pub const INT_ID: u8 = 0x03;
pub const LONG_ID: u8 = 0x04;
pub const FLOAT_ID: u8 = 0x05;
pub const DOUBLE_ID: u8 = 0x06;
pub const BYTE_ARRAY_ID: u8 = 0x07;
pub const STRING_ID: u8 = 0x08;
pub const LIST_ID: u8 = 0x09;
pub const COMPOUND_ID: u8 = 0x0A;
pub const INT_ARRAY_ID: u8 = 0x0B;

/// Deepest nesting of compounds and lists we accept in either direction.
pub const MAX_DEPTH: usize = 512;

#[derive(Error, Debug)]
pub enum Error {
    #[error("root was {}, not COMPOUND", TagType::describe_id(*.0))]
    NoRootCompound(u8),
    #[error("Encountered an unknown NBT tag id {0}.")]
    UnknownTagId(u8),
    #[error("Found an END tag where a value was expected")]
    UnexpectedEnd,
    #[error("Failed to Cesu 8 Decode")]
    Cesu8DecodingError,
    #[error("NBT reading was cut short {0}")]
    Incomplete(io::Error),
    #[error("Negative list length {0}")]
    NegativeLength(i32),
    #[error("Length too large {0}")]
    LargeLength(usize),
    #[error("List mixes tag types: expected {expected}, found {found}")]
    MixedList { expected: TagType, found: TagType },
    #[error("Tags are nested deeper than {0} levels")]
    TooDeep(usize),
}

/// A root compound together with its (usually empty) name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Nbt {
    pub name: String,
    pub root_tag: DataView,
}

impl Nbt {
    pub fn new(name: String, tag: DataView) -> Self {
        Nbt {
            name,
            root_tag: tag,
        }
    }

    pub fn read<R>(reader: &mut ReadAdaptor<R>) -> Result<Nbt, Error>
    where
        R: Read,
    {
        let name = read_root_header(reader, true)?;
        Ok(Nbt {
            name,
            root_tag: read_compound_content(reader, 0)?,
        })
    }

    /// Reads NBT tag, that doesn't contain the name of root compound.
    pub fn read_unnamed<R>(reader: &mut ReadAdaptor<R>) -> Result<Nbt, Error>
    where
        R: Read,
    {
        read_root_header(reader, false)?;
        Ok(Nbt {
            name: String::new(),
            root_tag: read_compound_content(reader, 0)?,
        })
    }

    pub fn read_from(reader: impl Read) -> Result<Nbt, Error> {
        Self::read(&mut ReadAdaptor::new(reader))
    }

    pub fn write(&self) -> Result<Bytes, Error> {
        let mut bytes = Vec::new();
        Self::write_view_to(&self.root_tag, &self.name, &mut bytes)?;
        Ok(bytes.into())
    }

    /// Writes NBT tag, without name of root compound.
    pub fn write_unnamed(&self) -> Result<Bytes, Error> {
        let mut bytes = Vec::new();
        write_root(&mut WriteAdaptor::new(&mut bytes), None, &self.root_tag)?;
        Ok(bytes.into())
    }

    pub fn write_view_to(view: &DataView, name: &str, writer: impl Write) -> Result<(), Error> {
        write_root(&mut WriteAdaptor::new(writer), Some(name), view)
    }
}

impl From<DataView> for Nbt {
    fn from(value: DataView) -> Self {
        Nbt::new(String::new(), value)
    }
}

/// Decodes a named root compound, inflating it first when `compressed` is set.
pub fn read_named(bytes: &[u8], compressed: bool) -> Result<Nbt, Error> {
    if compressed {
        nbt_compress::read_gzip_nbt(bytes)
    } else {
        Nbt::read_from(bytes)
    }
}

/// Decodes the root compound of a stream, discarding its name.
pub fn read(bytes: &[u8], compressed: bool) -> Result<DataView, Error> {
    read_named(bytes, compressed).map(|nbt| nbt.root_tag)
}

pub fn write_named(view: &DataView, name: &str, compressed: bool) -> Result<Bytes, Error> {
    let mut bytes = Vec::new();
    if compressed {
        nbt_compress::write_gzip_named(view, name, &mut bytes, Compression::default())?;
    } else {
        Nbt::write_view_to(view, name, &mut bytes)?;
    }
    Ok(bytes.into())
}

/// Encodes `view` as a root compound with an empty name.
pub fn write(view: &DataView, compressed: bool) -> Result<Bytes, Error> {
    write_named(view, "", compressed)
}
