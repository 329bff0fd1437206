use std::sync::Arc;

use bytes::Bytes;
use ember_nbt::{NbtTag, data_view::DataView};
use log::{error, warn};

use super::*;
use crate::{
    block::entities::record_block_position,
    chunk::{
        CHUNK_AREA, CHUNK_HEIGHT, CHUNK_WIDTH, Chunk, ChunkParsingError, ChunkSnapshot,
        ChunkWritingError, SECTIONS_PER_CHUNK, Sections, empty_sections, section::ChunkSection,
    },
    coordinates::ChunkPos,
    entity::EntityError,
    registry::Registries,
};

/// Everything read from a chunk record. Parsing finishes before a chunk is touched, so a bad
/// record can never leave a chunk half loaded.
pub struct ParsedChunk {
    pub position: ChunkPos,
    pub sections: Sections,
    pub populated: bool,
    pub biomes: Option<Box<[u8; CHUNK_AREA]>>,
    /// `None` when the record has none, the chunk then computes its own.
    pub height_map: Option<Box<[i32; CHUNK_AREA]>>,
    pub entities: Vec<DataView>,
    pub block_entities: Vec<DataView>,
}

/// Maps chunks onto the Anvil record layout:
///
/// ```text
/// Level { xPos, zPos, TerrainPopulated, LastUpdate,
///         Sections [{ Y, Blocks, Add?, Data, BlockLight, SkyLight }],
///         HeightMap, Biomes?, Entities, TileEntities }
/// ```
#[derive(Clone, Default)]
pub struct AnvilChunkCodec {
    registries: Arc<Registries>,
}

impl AnvilChunkCodec {
    pub fn new(registries: Arc<Registries>) -> Self {
        Self { registries }
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Decodes `raw` into `chunk`. True when the chunk got initialized; entities that fail to
    /// load are logged and do not change the result.
    pub fn read(&self, chunk: &mut Chunk, raw: &[u8]) -> bool {
        match Self::parse(raw) {
            Ok(parsed) => self.load(chunk, parsed),
            Err(err) => {
                error!("Failed to parse chunk {}: {err}", chunk.position());
                false
            }
        }
    }

    pub fn parse(raw: &[u8]) -> Result<ParsedChunk, ChunkParsingError> {
        let root = ember_nbt::read(raw, false)?;
        Self::parse_view(&root)
    }

    pub fn parse_view(root: &DataView) -> Result<ParsedChunk, ChunkParsingError> {
        let level = root
            .get_view(LEVEL)
            .ok_or(ChunkParsingError::MissingLevel)?;
        let position = ChunkPos::new(
            level
                .get_int(X_POS)
                .ok_or(ChunkParsingError::MissingField(X_POS))?,
            level
                .get_int(Z_POS)
                .ok_or(ChunkParsingError::MissingField(Z_POS))?,
        );

        let mut sections = empty_sections();
        for tag in level.get_list(SECTIONS).unwrap_or_default() {
            let section = tag
                .extract_compound()
                .ok_or(ChunkParsingError::MissingField(SECTIONS))?;
            let y = section_y(section)?;
            let index = usize::try_from(y)
                .ok()
                .filter(|index| *index < SECTIONS_PER_CHUNK)
                .ok_or(ChunkParsingError::SectionOutOfRange(y))?;

            sections[index] = Some(ChunkSection::from_legacy_arrays(
                byte_array(section, BLOCKS)?,
                section.get_byte_array(ADD),
                byte_array(section, DATA)?,
                byte_array(section, BLOCK_LIGHT)?,
                byte_array(section, SKY_LIGHT)?,
            )?);
        }

        let biomes = match level.get_byte_array(BIOMES) {
            Some(biomes) => match <[u8; CHUNK_AREA]>::try_from(biomes) {
                Ok(biomes) => Some(Box::new(biomes)),
                Err(_) => {
                    warn!(
                        "Ignoring {} biomes of chunk {position}, expected {CHUNK_AREA}",
                        biomes.len()
                    );
                    None
                }
            },
            None => None,
        };

        let height_map = match level.get_int_array(HEIGHT_MAP) {
            Some(height_map) => match <[i32; CHUNK_AREA]>::try_from(height_map) {
                Ok(height_map) => Some(Box::new(height_map)),
                Err(_) => {
                    warn!(
                        "Recomputing height map of chunk {position}, stored one has {} entries",
                        height_map.len()
                    );
                    None
                }
            },
            None => None,
        };

        Ok(ParsedChunk {
            position,
            sections,
            populated: level.get_bool(TERRAIN_POPULATED).unwrap_or(false),
            biomes,
            height_map,
            entities: records(level, ENTITIES, position),
            block_entities: records(level, TILE_ENTITIES, position),
        })
    }

    /// Installs a parsed record into `chunk`.
    pub fn load(&self, chunk: &mut Chunk, parsed: ParsedChunk) -> bool {
        let position = chunk.position();
        if parsed.position != position {
            warn!(
                "Chunk data stored for {position} claims to be {}, loading it at {position}",
                parsed.position
            );
        }
        if !chunk.initialize(parsed.sections, &self.registries) {
            return false;
        }

        chunk.set_populated(parsed.populated);
        if let Some(biomes) = parsed.biomes {
            chunk.set_biomes(biomes);
        }
        match parsed.height_map {
            Some(height_map) => chunk.set_height_map(height_map),
            None => chunk.recompute_height_map(),
        }

        for record in &parsed.entities {
            match self.registries.entities.create(record) {
                Ok(entity) => chunk.add_entity(entity),
                Err(err) => warn!("Skipping entity in chunk {position}: {err}"),
            }
        }

        for record in &parsed.block_entities {
            if let Err(err) = load_block_entity(chunk, record) {
                warn!("Skipping block entity in chunk {position}: {err}");
            }
        }
        true
    }

    /// Encodes an initialized chunk.
    pub fn write_chunk(&self, chunk: &Chunk) -> Result<Bytes, ChunkWritingError> {
        if !chunk.is_initialized() {
            return Err(ChunkWritingError::NotInitialized(chunk.position()));
        }
        self.write(&chunk.snapshot())
    }

    /// Encodes a snapshot, uncompressed. Region files take care of compression.
    pub fn write(&self, snapshot: &ChunkSnapshot) -> Result<Bytes, ChunkWritingError> {
        ember_nbt::write(&Self::to_view(snapshot), false)
            .map_err(ChunkWritingError::ChunkSerializingError)
    }

    pub fn to_view(snapshot: &ChunkSnapshot) -> DataView {
        let position = snapshot.position;
        let mut level = DataView::new();
        level.set(X_POS, position.x);
        level.set(Z_POS, position.z);
        level.set_bool(TERRAIN_POPULATED, snapshot.populated);
        level.set(LAST_UPDATE, 0i64);

        let sections: Vec<NbtTag> = snapshot
            .sections
            .iter()
            .enumerate()
            .filter_map(|(y, section)| Some(section_view(y, section.as_ref()?).into()))
            .collect();
        level.set(SECTIONS, sections);

        level.set(HEIGHT_MAP, &snapshot.height_map[..]);
        if let Some(biomes) = &snapshot.biomes {
            level.set(BIOMES, &biomes[..]);
        }

        level.set(
            ENTITIES,
            saved_records(&snapshot.entities, "entity", position),
        );
        level.set(
            TILE_ENTITIES,
            saved_records(&snapshot.block_entities, "block entity", position),
        );

        let mut root = DataView::new();
        root.set(LEVEL, level);
        root
    }
}

fn section_y(section: &DataView) -> Result<i32, ChunkParsingError> {
    let y = section
        .get_local(SECTION_Y)
        .ok_or(ChunkParsingError::MissingField(SECTION_Y))?;
    y.extract_byte()
        .map(i32::from)
        .or_else(|| y.extract_int())
        .ok_or(ChunkParsingError::MissingField(SECTION_Y))
}

fn byte_array<'a>(
    section: &'a DataView,
    name: &'static str,
) -> Result<&'a [u8], ChunkParsingError> {
    section
        .get_byte_array(name)
        .ok_or(ChunkParsingError::MissingField(name))
}

fn section_view(y: usize, section: &ChunkSection) -> DataView {
    let (blocks, add, data) = section.to_legacy_arrays();
    let mut view = DataView::new();
    view.set(SECTION_Y, y as i8);
    view.set(BLOCKS, NbtTag::ByteArray(blocks));
    if let Some(add) = add {
        view.set(ADD, add.as_bytes());
    }
    view.set(DATA, data.as_bytes());
    view.set(BLOCK_LIGHT, section.block_light().as_bytes());
    view.set(SKY_LIGHT, section.sky_light().as_bytes());
    view
}

/// The compounds of a record list. Anything else in the list is logged and dropped.
fn records(level: &DataView, name: &str, position: ChunkPos) -> Vec<DataView> {
    level
        .get_list(name)
        .unwrap_or_default()
        .iter()
        .filter_map(|tag| {
            let record = tag.extract_compound();
            if record.is_none() {
                warn!("Skipping {name} entry of chunk {position} which is not a compound");
            }
            record.cloned()
        })
        .collect()
}

fn saved_records(
    records: &[Result<DataView, EntityError>],
    kind: &str,
    position: ChunkPos,
) -> Vec<NbtTag> {
    records
        .iter()
        .filter_map(|record| match record {
            Ok(record) => Some(NbtTag::Compound(record.clone())),
            Err(err) => {
                warn!("Failed to save {kind} of chunk {position}: {err}");
                None
            }
        })
        .collect()
}

/// Hands a record to the block entity created for its position when the chunk was
/// initialized.
fn load_block_entity(chunk: &mut Chunk, record: &DataView) -> Result<(), EntityError> {
    let id = record.get_string("id").ok_or(EntityError::MissingId)?;
    let position = record_block_position(record).ok_or(EntityError::InvalidField("x, y, z"))?;

    let origin = chunk.block_origin();
    let (x, y, z) = (position.x - origin.x, position.y, position.z - origin.z);
    let inside = |value: i32, size: usize| (0..size as i32).contains(&value);
    if !inside(x, CHUNK_WIDTH) || !inside(y, CHUNK_HEIGHT) || !inside(z, CHUNK_WIDTH) {
        return Err(EntityError::Custom(format!(
            "{id} at {position} is outside of chunk {}",
            chunk.position()
        )));
    }

    let block_entity = chunk
        .block_entity_at_mut(x as usize, y as usize, z as usize)
        .ok_or_else(|| EntityError::Custom(format!("No block entity at {position} for {id}")))?;
    if block_entity.identifier() != id {
        return Err(EntityError::TypeMismatch {
            expected: block_entity.identifier().to_string(),
            found: id.to_string(),
        });
    }
    block_entity.read_nbt(record)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use ember_nbt::{NbtTag, data_view::DataView};
    use ember_util::math::vector3::Vector3;

    use super::AnvilChunkCodec;
    use crate::{
        block::entities::{BlockEntityRegistry, StoredBlockEntity},
        chunk::{
            Chunk, ChunkWritingError, empty_sections,
            section::{ChunkSection, pack_code, unpack_code},
        },
        coordinates::ChunkPos,
        entity::{EntityRegistry, StoredEntity},
        registry::Registries,
    };

    fn codec() -> AnvilChunkCodec {
        let mut entities = EntityRegistry::new();
        entities.register_stored("Pig");
        entities.register_stored("Cow");
        let mut block_entities = BlockEntityRegistry::new();
        block_entities.register_stored("Chest");
        block_entities.register_stored("Furnace");
        block_entities.bind_block(54, "Chest");
        block_entities.bind_block(61, "Furnace");
        AnvilChunkCodec::new(Arc::new(Registries::new(entities, block_entities)))
    }

    fn entity_record(id: &str, pos: Option<[f64; 3]>) -> NbtTag {
        let mut record = DataView::new();
        record.set("id", id);
        if let Some(pos) = pos {
            record.set("Pos", pos.map(NbtTag::Double).to_vec());
        }
        record.set("Health", 10i16);
        record.into()
    }

    /// A chunk with a single block at y=16, so section 1 starts with it.
    fn single_block_chunk(position: ChunkPos) -> Chunk {
        let mut section = ChunkSection::new();
        section.set_code(0, 16, 0, pack_code(0, 1, 0));
        let mut sections = empty_sections();
        sections[1] = Some(section);

        let mut chunk = Chunk::new(position);
        assert!(chunk.initialize(sections, &Registries::default()));
        chunk.set_biomes(Box::new([0; 256]));
        chunk.recompute_height_map();
        chunk.set_populated(true);
        chunk
    }

    #[test]
    fn encode_then_decode() {
        let codec = codec();
        let position = ChunkPos::new(3, -4);
        let chunk = single_block_chunk(position);
        assert_eq!(chunk.height_at(0, 0), 17);

        let bytes = codec.write_chunk(&chunk).unwrap();
        let mut decoded = Chunk::new(position);
        assert!(codec.read(&mut decoded, &bytes));

        assert!(decoded.is_initialized());
        assert!(decoded.is_populated());
        let section = decoded.section(1).unwrap();
        assert_eq!(unpack_code(section.types()[0]), (0, 1, 0));
        assert_eq!(section.count(), 1);
        assert!(decoded.section(0).is_none());
        assert_eq!(decoded.height_at(0, 0), 17);
        assert_eq!(decoded.height_at(1, 0), 0);
        assert_eq!(decoded.biomes(), Some(&[0; 256]));
    }

    #[test]
    fn reencoding_is_byte_identical() {
        let codec = codec();
        let position = ChunkPos::new(-7, 12);
        let mut chunk = single_block_chunk(position);
        chunk.set_block_code(4, 200, 9, pack_code(2, 17, 5));
        chunk.recompute_height_map();
        chunk.add_entity(Box::new(StoredEntity::new(
            "Pig".to_string(),
            Vector3::new(-100.5, 70.0, 200.25),
        )));

        let first = codec.write_chunk(&chunk).unwrap();
        let mut decoded = Chunk::new(position);
        assert!(codec.read(&mut decoded, &first));
        let second = codec.write_chunk(&decoded).unwrap();
        assert_eq!(first, second);
        assert_eq!(decoded.get_block_code(4, 200, 9), pack_code(2, 17, 5));
    }

    #[test]
    fn add_array_only_when_needed() {
        let chunk = single_block_chunk(ChunkPos::new(0, 0));
        let view = AnvilChunkCodec::to_view(&chunk.snapshot());
        let sections = view.get_views("Level.Sections").unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].get_byte("Y"), Some(1));
        assert!(!sections[0].contains("Add"));
        assert_eq!(view.get_long("Level.LastUpdate"), Some(0));

        let mut chunk = chunk;
        chunk.set_block_code(0, 17, 0, pack_code(1, 0, 0));
        let view = AnvilChunkCodec::to_view(&chunk.snapshot());
        let sections = view.get_views("Level.Sections").unwrap();
        assert_eq!(sections[0].get_byte_array("Add").map(<[u8]>::len), Some(2048));
    }

    #[test]
    fn missing_height_map_is_computed() {
        let codec = codec();
        let chunk = single_block_chunk(ChunkPos::new(0, 0));
        let mut view = AnvilChunkCodec::to_view(&chunk.snapshot());
        view.remove("Level.HeightMap");
        view.remove("Level.Biomes");
        view.remove("Level.TerrainPopulated");
        let bytes = ember_nbt::write(&view, false).unwrap();

        let mut decoded = Chunk::new(ChunkPos::new(0, 0));
        assert!(codec.read(&mut decoded, &bytes));
        assert_eq!(decoded.height_at(0, 0), 17);
        assert!(decoded.biomes().is_none());
        assert!(!decoded.is_populated());
    }

    #[test]
    fn corrupt_entity_is_skipped() {
        let _ = env_logger::try_init();
        let codec = codec();
        let chunk = single_block_chunk(ChunkPos::new(0, 0));
        let mut view = AnvilChunkCodec::to_view(&chunk.snapshot());
        view.set(
            "Level.Entities",
            vec![
                entity_record("Pig", Some([1.0, 64.0, 1.0])),
                // No position to place it at
                entity_record("Cow", None),
                entity_record("Cow", Some([3.5, 70.0, 2.5])),
            ],
        );
        let bytes = ember_nbt::write(&view, false).unwrap();

        let mut decoded = Chunk::new(ChunkPos::new(0, 0));
        assert!(codec.read(&mut decoded, &bytes));
        let ids: Vec<&str> = decoded
            .entities()
            .iter()
            .map(|entity| entity.identifier())
            .collect();
        assert_eq!(ids, ["Pig", "Cow"]);
        assert_eq!(decoded.entities()[1].position(), Vector3::new(3.5, 70.0, 2.5));
        let cow = decoded.entities()[1]
            .as_any()
            .downcast_ref::<StoredEntity>()
            .unwrap();
        assert_eq!(cow.fields().get_short("Health"), Some(10));
    }

    #[test]
    fn unknown_entity_type_is_skipped() {
        let codec = codec();
        let chunk = single_block_chunk(ChunkPos::new(0, 0));
        let mut view = AnvilChunkCodec::to_view(&chunk.snapshot());
        view.set(
            "Level.Entities",
            vec![
                entity_record("Dragon", Some([0.0, 0.0, 0.0])),
                entity_record("Pig", Some([0.0, 0.0, 0.0])),
            ],
        );
        let bytes = ember_nbt::write(&view, false).unwrap();

        let mut decoded = Chunk::new(ChunkPos::new(0, 0));
        assert!(codec.read(&mut decoded, &bytes));
        assert_eq!(decoded.entities().len(), 1);
    }

    #[test]
    fn block_entities_use_world_coordinates() {
        let codec = codec();
        let position = ChunkPos::new(2, -1);
        let mut section = ChunkSection::new();
        section.set_code(1, 2, 3, pack_code(0, 54, 0));
        section.set_code(5, 2, 5, pack_code(0, 61, 0));
        let mut sections = empty_sections();
        sections[0] = Some(section);
        let mut chunk = Chunk::new(position);
        assert!(chunk.initialize(sections, codec.registries()));

        let mut view = AnvilChunkCodec::to_view(&chunk.snapshot());
        let mut chest = DataView::new();
        chest.set("id", "Chest");
        chest.set("x", 33);
        chest.set("y", 2);
        chest.set("z", -13);
        chest.set("Items", Vec::<NbtTag>::new());
        // Furnace record pointing at the chest
        let mut wrong_type = chest.clone();
        wrong_type.set("id", "Furnace");
        wrong_type.set("BurnTime", 5i16);
        // Nothing lives at this position
        let mut nowhere = chest.clone();
        nowhere.set("x", 40);
        // Another chunk entirely
        let mut outside = chest.clone();
        outside.set("x", 0);
        view.set(
            "Level.TileEntities",
            [wrong_type, chest, nowhere, outside]
                .map(NbtTag::Compound)
                .to_vec(),
        );
        let bytes = ember_nbt::write(&view, false).unwrap();

        let mut decoded = Chunk::new(position);
        assert!(codec.read(&mut decoded, &bytes));
        assert_eq!(decoded.block_entities().count(), 2);
        let chest = decoded
            .block_entity_at(1, 2, 3)
            .unwrap()
            .as_any()
            .downcast_ref::<StoredBlockEntity>()
            .unwrap();
        assert!(chest.fields().contains("Items"));
        assert!(!chest.fields().contains("BurnTime"));

        let furnace = decoded
            .block_entity_at(5, 2, 5)
            .unwrap()
            .as_any()
            .downcast_ref::<StoredBlockEntity>()
            .unwrap();
        assert!(furnace.fields().is_empty());

        let saved = AnvilChunkCodec::to_view(&decoded.snapshot());
        let records = saved.get_views("Level.TileEntities").unwrap();
        assert_eq!(records.len(), 2);
        assert!(
            records
                .iter()
                .any(|record| record.get_int("x") == Some(33) && record.contains("Items"))
        );
    }

    #[test]
    fn failed_load_leaves_chunk_uninitialized() {
        let codec = codec();
        let position = ChunkPos::new(0, 0);

        let mut chunk = Chunk::new(position);
        assert!(!codec.read(&mut chunk, &[0x0A, 0x00]));
        assert!(!chunk.is_initialized());

        // A later section has the wrong Blocks length
        let mut view = AnvilChunkCodec::to_view(&single_block_chunk(position).snapshot());
        let mut broken = DataView::new();
        broken.set("Y", 4i8);
        broken.set("Blocks", vec![0u8; 100]);
        broken.set("Data", vec![0u8; 2048]);
        broken.set("BlockLight", vec![0u8; 2048]);
        broken.set("SkyLight", vec![0u8; 2048]);
        let mut sections = view.get_list("Level.Sections").unwrap().to_vec();
        sections.push(broken.into());
        view.set("Level.Sections", sections);
        let bytes = ember_nbt::write(&view, false).unwrap();

        assert!(!codec.read(&mut chunk, &bytes));
        assert!(!chunk.is_initialized());
        assert!(chunk.sections().iter().all(Option::is_none));
    }

    #[test]
    fn section_y_out_of_range_fails() {
        let chunk = single_block_chunk(ChunkPos::new(0, 0));
        let mut view = AnvilChunkCodec::to_view(&chunk.snapshot());
        let mut section = view.get_views("Level.Sections").unwrap()[0].clone();
        section.set("Y", 16i8);
        view.set("Level.Sections", vec![NbtTag::Compound(section)]);

        assert!(AnvilChunkCodec::parse_view(&view).is_err());
    }

    #[test]
    fn second_read_is_rejected() {
        let codec = codec();
        let position = ChunkPos::new(1, 1);
        let bytes = codec.write_chunk(&single_block_chunk(position)).unwrap();

        let mut chunk = Chunk::new(position);
        assert!(codec.read(&mut chunk, &bytes));
        chunk.set_block_code(8, 8, 8, pack_code(0, 3, 0));
        assert!(!codec.read(&mut chunk, &bytes));
        assert_eq!(chunk.get_block_code(8, 8, 8), pack_code(0, 3, 0));
    }

    #[test]
    fn mismatched_position_loads_at_requested_chunk() {
        let codec = codec();
        let bytes = codec
            .write_chunk(&single_block_chunk(ChunkPos::new(5, 5)))
            .unwrap();

        let mut chunk = Chunk::new(ChunkPos::new(6, 5));
        assert!(codec.read(&mut chunk, &bytes));
        assert_eq!(chunk.position(), ChunkPos::new(6, 5));
        assert_eq!(chunk.height_at(0, 0), 17);
    }

    #[test]
    fn uninitialized_chunk_is_not_written() {
        let codec = codec();
        let chunk = Chunk::new(ChunkPos::new(0, 0));
        assert!(matches!(
            codec.write_chunk(&chunk),
            Err(ChunkWritingError::NotInitialized(_))
        ));
    }
}
