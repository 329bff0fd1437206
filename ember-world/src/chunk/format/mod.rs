pub mod anvil;

pub use anvil::{AnvilChunkCodec, ParsedChunk};

// Field names of the on disk chunk record
pub(crate) const LEVEL: &str = "Level";
pub(crate) const X_POS: &str = "xPos";
pub(crate) const Z_POS: &str = "zPos";
pub(crate) const TERRAIN_POPULATED: &str = "TerrainPopulated";
pub(crate) const LAST_UPDATE: &str = "LastUpdate";
pub(crate) const SECTIONS: &str = "Sections";
pub(crate) const HEIGHT_MAP: &str = "HeightMap";
pub(crate) const BIOMES: &str = "Biomes";
pub(crate) const ENTITIES: &str = "Entities";
pub(crate) const TILE_ENTITIES: &str = "TileEntities";

pub(crate) const SECTION_Y: &str = "Y";
pub(crate) const BLOCKS: &str = "Blocks";
pub(crate) const ADD: &str = "Add";
pub(crate) const DATA: &str = "Data";
pub(crate) const BLOCK_LIGHT: &str = "BlockLight";
pub(crate) const SKY_LIGHT: &str = "SkyLight";
