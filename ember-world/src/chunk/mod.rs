use std::{collections::BTreeMap, sync::Arc};

use ember_nbt::data_view::DataView;
use ember_util::math::{get_section_cord, vector3::Vector3};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    block::entities::BlockEntity,
    chunk::io::RegionError,
    coordinates::ChunkPos,
    entity::{Entity, EntityError},
    registry::Registries,
};

pub mod format;
pub mod io;
pub mod section;

use section::{ChunkSection, SECTION_WIDTH, block_id};

pub const CHUNK_WIDTH: usize = 16;
pub const CHUNK_AREA: usize = CHUNK_WIDTH * CHUNK_WIDTH;
pub const SECTIONS_PER_CHUNK: usize = 16;
pub const CHUNK_HEIGHT: usize = SECTIONS_PER_CHUNK * SECTION_WIDTH;

pub type SyncChunk = Arc<RwLock<Chunk>>;

pub type Sections = [Option<ChunkSection>; SECTIONS_PER_CHUNK];

/// Local block coordinates `(x, y, z)` with `x`, `z` in `0..16` and `y` in `0..256`.
pub type LocalBlockPos = (usize, usize, usize);

#[derive(Error, Debug)]
pub enum ChunkReadingError {
    #[error("Region error: {0}")]
    Region(RegionError),
}

#[derive(Error, Debug)]
pub enum ChunkWritingError {
    #[error("Region error: {0}")]
    Region(RegionError),
    #[error("Chunk serializing error: {0}")]
    ChunkSerializingError(ember_nbt::Error),
    #[error("Chunk {0} was never initialized")]
    NotInitialized(ChunkPos),
}

#[derive(Error, Debug)]
pub enum ChunkParsingError {
    #[error("Invalid tag stream: {0}")]
    Nbt(#[from] ember_nbt::Error),
    #[error("Chunk has no Level compound")]
    MissingLevel,
    #[error("Chunk is missing field {0}")]
    MissingField(&'static str),
    #[error("{name} must hold {expected} bytes, found {found}")]
    WrongArrayLength {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Section Y {0} is outside of 0..16")]
    SectionOutOfRange(i32),
}

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Compression scheme {0} not recognised")]
    UnknownCompression(u8),
    #[error("Error while working with zlib compression: {0}")]
    ZlibError(std::io::Error),
    #[error("Error while working with Gzip compression: {0}")]
    GZipError(std::io::Error),
}

/// A 16x256x16 column of the world.
///
/// A chunk starts out uninitialized. It gets its sections exactly once, either from disk or
/// from a generator, and a load that fails leaves it untouched.
pub struct Chunk {
    position: ChunkPos,
    initialized: bool,
    sections: Sections,
    biomes: Option<Box<[u8; CHUNK_AREA]>>,
    /// One above the highest non air block per column, indexed by `(z << 4) | x`.
    height_map: Box<[i32; CHUNK_AREA]>,
    populated: bool,
    entities: Vec<Box<dyn Entity>>,
    block_entities: BTreeMap<LocalBlockPos, Box<dyn BlockEntity>>,
}

impl Chunk {
    pub fn new(position: ChunkPos) -> Self {
        Self {
            position,
            initialized: false,
            sections: std::array::from_fn(|_| None),
            biomes: None,
            height_map: Box::new([0; CHUNK_AREA]),
            populated: false,
            entities: Vec::new(),
            block_entities: BTreeMap::new(),
        }
    }

    pub fn new_sync(position: ChunkPos) -> SyncChunk {
        Arc::new(RwLock::new(Self::new(position)))
    }

    pub fn position(&self) -> ChunkPos {
        self.position
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Installs the sections and creates the block entities their blocks call for.
    ///
    /// Returns false without touching anything if the chunk was already initialized.
    pub fn initialize(&mut self, sections: Sections, registries: &Registries) -> bool {
        if self.initialized {
            log::error!(
                "Tried to initialize already initialized chunk {}",
                self.position
            );
            return false;
        }

        self.sections = sections;
        self.initialized = true;
        self.block_entities.clear();

        let block_entities = &registries.block_entities;
        if block_entities.has_bindings() {
            for (section_y, section) in self.sections.iter().enumerate() {
                let Some(section) = section.as_ref().filter(|section| !section.is_empty()) else {
                    continue;
                };
                for (index, code) in section.types().iter().enumerate() {
                    if let Some(block_entity) = block_entities.create_for_block(block_id(*code)) {
                        let pos = (
                            index & 0xF,
                            section_y * SECTION_WIDTH + (index >> 8),
                            (index >> 4) & 0xF,
                        );
                        self.block_entities.insert(pos, block_entity);
                    }
                }
            }
        }
        true
    }

    pub fn sections(&self) -> &Sections {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&ChunkSection> {
        self.sections.get(index)?.as_ref()
    }

    /// The block code at local `x`, `z` and world `y`. Air outside the world or in a missing
    /// section.
    pub fn get_block_code(&self, x: usize, y: usize, z: usize) -> u16 {
        self.section(get_section_cord(y as i32) as usize)
            .map_or(0, |section| section.get_code(x, y, z))
    }

    /// Sets a block, creating its section when needed. Height map and block entities are left
    /// alone.
    pub fn set_block_code(&mut self, x: usize, y: usize, z: usize, code: u16) {
        let Some(slot) = self.sections.get_mut(get_section_cord(y as i32) as usize) else {
            log::warn!("Block height {y} is outside of chunk {}", self.position);
            return;
        };
        slot.get_or_insert_with(ChunkSection::new)
            .set_code(x, y, z, code);
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn set_populated(&mut self, populated: bool) {
        self.populated = populated;
    }

    pub fn biomes(&self) -> Option<&[u8; CHUNK_AREA]> {
        self.biomes.as_deref()
    }

    pub fn set_biomes(&mut self, biomes: Box<[u8; CHUNK_AREA]>) {
        self.biomes = Some(biomes);
    }

    pub fn height_map(&self) -> &[i32; CHUNK_AREA] {
        &self.height_map
    }

    pub fn set_height_map(&mut self, height_map: Box<[i32; CHUNK_AREA]>) {
        self.height_map = height_map;
    }

    pub fn height_at(&self, x: usize, z: usize) -> i32 {
        self.height_map[(z << 4) | x]
    }

    pub fn recompute_height_map(&mut self) {
        self.height_map = compute_height_map(&self.sections);
    }

    pub fn entities(&self) -> &[Box<dyn Entity>] {
        &self.entities
    }

    pub fn add_entity(&mut self, entity: Box<dyn Entity>) {
        self.entities.push(entity);
    }

    pub fn block_entities(&self) -> impl Iterator<Item = (&LocalBlockPos, &dyn BlockEntity)> {
        self.block_entities
            .iter()
            .map(|(pos, block_entity)| (pos, block_entity.as_ref()))
    }

    pub fn block_entity_at(&self, x: usize, y: usize, z: usize) -> Option<&dyn BlockEntity> {
        self.block_entities.get(&(x, y, z)).map(|block_entity| &**block_entity)
    }

    pub fn block_entity_at_mut(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
    ) -> Option<&mut Box<dyn BlockEntity>> {
        self.block_entities.get_mut(&(x, y, z))
    }

    pub fn set_block_entity(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        block_entity: Box<dyn BlockEntity>,
    ) -> Option<Box<dyn BlockEntity>> {
        self.block_entities.insert((x, y, z), block_entity)
    }

    /// World coordinates of the lowest corner of this chunk.
    pub fn block_origin(&self) -> Vector3<i32> {
        Vector3::new(
            self.position.x * CHUNK_WIDTH as i32,
            0,
            self.position.z * CHUNK_WIDTH as i32,
        )
    }

    /// Copies everything a save needs, so the copy can be encoded while the chunk keeps
    /// changing. Entity records are written here; one that fails is kept as its error.
    pub fn snapshot(&self) -> ChunkSnapshot {
        let origin = self.block_origin();
        ChunkSnapshot {
            position: self.position,
            populated: self.populated,
            sections: self.sections.clone(),
            biomes: self.biomes.clone(),
            height_map: self.height_map.clone(),
            entities: self
                .entities
                .iter()
                .filter(|entity| entity.should_save())
                .map(|entity| entity.write_record())
                .collect(),
            block_entities: self
                .block_entities
                .iter()
                .map(|(&(x, y, z), block_entity)| {
                    block_entity.write_record(origin.add_raw(x as i32, y as i32, z as i32))
                })
                .collect(),
        }
    }
}

/// An immutable copy of a chunk taken for saving.
pub struct ChunkSnapshot {
    pub position: ChunkPos,
    pub populated: bool,
    pub sections: Sections,
    pub biomes: Option<Box<[u8; CHUNK_AREA]>>,
    pub height_map: Box<[i32; CHUNK_AREA]>,
    pub entities: Vec<Result<DataView, EntityError>>,
    pub block_entities: Vec<Result<DataView, EntityError>>,
}

/// For every column, one above the highest non air block, or 0 for an empty column.
pub fn compute_height_map(sections: &Sections) -> Box<[i32; CHUNK_AREA]> {
    let mut height_map = Box::new([0; CHUNK_AREA]);
    let Some(top) = sections
        .iter()
        .rposition(|section| section.as_ref().is_some_and(|section| !section.is_empty()))
    else {
        return height_map;
    };

    for z in 0..CHUNK_WIDTH {
        for x in 0..CHUNK_WIDTH {
            height_map[(z << 4) | x] = column_height(sections, top, x, z);
        }
    }
    height_map
}

fn column_height(sections: &Sections, top: usize, x: usize, z: usize) -> i32 {
    for section_y in (0..=top).rev() {
        let Some(section) = sections[section_y].as_ref() else {
            continue;
        };
        if section.is_empty() {
            continue;
        }
        for y in (0..SECTION_WIDTH).rev() {
            if section.get_block_id(x, y, z) != 0 {
                return (section_y * SECTION_WIDTH + y + 1) as i32;
            }
        }
    }
    0
}

/// An all air section stack.
pub fn empty_sections() -> Sections {
    std::array::from_fn(|_| None)
}
