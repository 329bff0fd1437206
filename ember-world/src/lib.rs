pub mod block;
pub mod chunk;
pub mod coordinates;
pub mod entity;
pub mod level;
pub mod registry;
pub mod world_info;

pub use chunk::{Chunk, SyncChunk};
pub use level::{ChunkStorage, LevelFolder};
pub use registry::Registries;
