use crate::data_view::DataView;
use crate::{Error, Nbt};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};

/// Inflates and decodes a named root compound, streaming from `input`.
pub fn read_gzip_nbt(input: impl Read) -> Result<Nbt, Error> {
    Nbt::read_from(GzDecoder::new(input))
}

/// Reads a GZipped NBT compound tag from any reader.
pub fn read_gzip_compound_tag(input: impl Read) -> Result<DataView, Error> {
    read_gzip_nbt(input).map(|nbt| nbt.root_tag)
}

/// Writes an NBT compound tag with GZip compression.
pub fn write_gzip_compound_tag(view: &DataView, output: impl Write) -> Result<(), Error> {
    write_gzip_named(view, "", output, Compression::default())
}

pub fn write_gzip_named(
    view: &DataView,
    name: &str,
    output: impl Write,
    level: Compression,
) -> Result<(), Error> {
    let mut encoder = GzEncoder::new(output, level);
    Nbt::write_view_to(view, name, &mut encoder)?;
    // Writes the gzip trailer
    encoder.finish().map_err(Error::Incomplete)?;
    Ok(())
}

pub fn write_gzip_compound_tag_to_bytes(view: &DataView) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    write_gzip_compound_tag(view, &mut buffer)?;
    Ok(buffer)
}
