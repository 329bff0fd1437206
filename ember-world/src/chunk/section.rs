use super::ChunkParsingError;

/// Blocks along one edge of a section.
pub const SECTION_WIDTH: usize = 16;
pub const SECTION_VOLUME: usize = SECTION_WIDTH * SECTION_WIDTH * SECTION_WIDTH;
/// Bytes needed to hold one nibble per block of a section.
pub const NIBBLE_ARRAY_LEN: usize = SECTION_VOLUME / 2;

pub const MAX_LIGHT: u8 = 15;

/// Packs a block into a 16 bit code: `| extended (4) | base (8) | data (4) |`.
#[inline]
pub const fn pack_code(extended_id: u8, base_id: u8, data: u8) -> u16 {
    (((extended_id & 0xF) as u16) << 12) | ((base_id as u16) << 4) | (data & 0xF) as u16
}

/// Inverse of [`pack_code`], returns `(extended, base, data)`.
#[inline]
pub const fn unpack_code(code: u16) -> (u8, u8, u8) {
    ((code >> 12) as u8, (code >> 4) as u8, (code & 0xF) as u8)
}

/// The full 12 bit block id of a code. Zero is air.
#[inline]
pub const fn block_id(code: u16) -> u16 {
    code >> 4
}

/// Index of a block inside a section. Only the lowest four bits of `y` are used, so world
/// heights can be passed directly.
#[inline]
pub const fn section_index(x: usize, y: usize, z: usize) -> usize {
    ((y & 0xF) << 8) | (z << 4) | x
}

/// Two 4 bit values per byte. The even index lives in the low nibble.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NibbleArray {
    data: Box<[u8]>,
}

impl NibbleArray {
    pub fn new(len: usize) -> Self {
        Self::filled(len, 0)
    }

    pub fn filled(len: usize, value: u8) -> Self {
        let value = value & 0xF;
        Self {
            data: vec![value | (value << 4); len.div_ceil(2)].into_boxed_slice(),
        }
    }

    pub fn from_bytes(data: Box<[u8]>) -> Self {
        Self { data }
    }

    /// Packs the lowest four bits of each value.
    pub fn from_nibbles(values: impl IntoIterator<Item = u8>) -> Self {
        let mut data = Vec::new();
        let mut pending = None;
        for value in values {
            match pending.take() {
                None => pending = Some(value & 0xF),
                Some(low) => data.push(low | ((value & 0xF) << 4)),
            }
        }
        if let Some(low) = pending {
            data.push(low);
        }
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// Number of nibbles held.
    pub fn len(&self) -> usize {
        self.data.len() * 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        let byte = self.data[index >> 1];
        if index & 1 == 0 {
            byte & 0xF
        } else {
            byte >> 4
        }
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u8) {
        let byte = &mut self.data[index >> 1];
        if index & 1 == 0 {
            *byte = (*byte & 0xF0) | (value & 0xF);
        } else {
            *byte = (*byte & 0x0F) | ((value & 0xF) << 4);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.data.iter().flat_map(|byte| [byte & 0xF, byte >> 4])
    }
}

/// A 16x16x16 cube of blocks with its light.
#[derive(Clone, PartialEq, Debug)]
pub struct ChunkSection {
    types: Box<[u16; SECTION_VOLUME]>,
    sky_light: NibbleArray,
    block_light: NibbleArray,
    /// Non air blocks, kept in sync by every mutation. Never stored on disk.
    count: u16,
}

impl Default for ChunkSection {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSection {
    /// An all air section in full daylight.
    pub fn new() -> Self {
        Self {
            types: Box::new([0; SECTION_VOLUME]),
            sky_light: NibbleArray::filled(SECTION_VOLUME, MAX_LIGHT),
            block_light: NibbleArray::new(SECTION_VOLUME),
            count: 0,
        }
    }

    pub fn from_raw(
        types: Box<[u16; SECTION_VOLUME]>,
        sky_light: NibbleArray,
        block_light: NibbleArray,
    ) -> Result<Self, ChunkParsingError> {
        if sky_light.len() != SECTION_VOLUME {
            return Err(ChunkParsingError::WrongArrayLength {
                name: "SkyLight",
                expected: NIBBLE_ARRAY_LEN,
                found: sky_light.as_bytes().len(),
            });
        }
        if block_light.len() != SECTION_VOLUME {
            return Err(ChunkParsingError::WrongArrayLength {
                name: "BlockLight",
                expected: NIBBLE_ARRAY_LEN,
                found: block_light.as_bytes().len(),
            });
        }

        let mut section = Self {
            types,
            sky_light,
            block_light,
            count: 0,
        };
        section.recount();
        Ok(section)
    }

    /// Builds a section from the split arrays found on disk. `add` holds the extended ids and
    /// is optional; missing means every extended id is zero.
    pub fn from_legacy_arrays(
        blocks: &[u8],
        add: Option<&[u8]>,
        data: &[u8],
        block_light: &[u8],
        sky_light: &[u8],
    ) -> Result<Self, ChunkParsingError> {
        check_len("Blocks", blocks, SECTION_VOLUME)?;
        check_len("Data", data, NIBBLE_ARRAY_LEN)?;
        check_len("BlockLight", block_light, NIBBLE_ARRAY_LEN)?;
        check_len("SkyLight", sky_light, NIBBLE_ARRAY_LEN)?;
        if let Some(add) = add {
            check_len("Add", add, NIBBLE_ARRAY_LEN)?;
        }

        let data = NibbleArray::from_bytes(data.into());
        let add = add.map(|add| NibbleArray::from_bytes(add.into()));

        let mut types = Box::new([0u16; SECTION_VOLUME]);
        for (index, code) in types.iter_mut().enumerate() {
            let extended = add.as_ref().map_or(0, |add| add.get(index));
            *code = pack_code(extended, blocks[index], data.get(index));
        }

        Self::from_raw(
            types,
            NibbleArray::from_bytes(sky_light.into()),
            NibbleArray::from_bytes(block_light.into()),
        )
    }

    /// Splits the codes into `(Blocks, Add, Data)`. `Add` is only produced when some block
    /// actually uses an extended id.
    pub fn to_legacy_arrays(&self) -> (Box<[u8]>, Option<NibbleArray>, NibbleArray) {
        let blocks = self
            .types
            .iter()
            .map(|code| unpack_code(*code).1)
            .collect::<Box<[u8]>>();
        let data = NibbleArray::from_nibbles(self.types.iter().map(|code| unpack_code(*code).2));
        let add = self
            .types
            .iter()
            .any(|code| unpack_code(*code).0 != 0)
            .then(|| NibbleArray::from_nibbles(self.types.iter().map(|code| unpack_code(*code).0)));
        (blocks, add, data)
    }

    fn recount(&mut self) {
        self.count = self
            .types
            .iter()
            .filter(|code| block_id(**code) != 0)
            .count() as u16;
    }

    /// Number of non air blocks.
    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn get_code(&self, x: usize, y: usize, z: usize) -> u16 {
        self.types[section_index(x, y, z)]
    }

    pub fn set_code(&mut self, x: usize, y: usize, z: usize, code: u16) {
        let slot = &mut self.types[section_index(x, y, z)];
        match (block_id(*slot) != 0, block_id(code) != 0) {
            (false, true) => self.count += 1,
            (true, false) => self.count -= 1,
            _ => {}
        }
        *slot = code;
    }

    pub fn get_block_id(&self, x: usize, y: usize, z: usize) -> u16 {
        block_id(self.get_code(x, y, z))
    }

    pub fn types(&self) -> &[u16; SECTION_VOLUME] {
        &self.types
    }

    pub fn sky_light(&self) -> &NibbleArray {
        &self.sky_light
    }

    pub fn sky_light_mut(&mut self) -> &mut NibbleArray {
        &mut self.sky_light
    }

    pub fn block_light(&self) -> &NibbleArray {
        &self.block_light
    }

    pub fn block_light_mut(&mut self) -> &mut NibbleArray {
        &mut self.block_light
    }
}

fn check_len(name: &'static str, array: &[u8], expected: usize) -> Result<(), ChunkParsingError> {
    if array.len() == expected {
        Ok(())
    } else {
        Err(ChunkParsingError::WrongArrayLength {
            name,
            expected,
            found: array.len(),
        })
    }
}
