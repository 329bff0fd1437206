#![deny(clippy::all)]
// to keep consistency
#![deny(clippy::if_then_some_else_none)]
#![deny(clippy::empty_structs_with_brackets)]
#![deny(clippy::use_self)]
// use log crate
#![deny(clippy::print_stdout)]

use std::{sync::Arc, time::Instant};

use ember_config::{BASIC_CONFIG, advanced_config};
use ember_world::{
    Chunk, ChunkStorage, Registries, block::entities::BlockEntityRegistry,
    coordinates::ChunkPos, entity::EntityRegistry,
};
use log::{LevelFilter, error, info, warn};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entities found in pre-flattening worlds, kept as opaque records.
const VANILLA_ENTITIES: &[&str] = &[
    "Bat", "Blaze", "Boat", "CaveSpider", "Chicken", "Cow", "Creeper", "Enderman",
    "Ghast", "Horse", "Item", "ItemFrame", "MinecartChest", "MinecartRideable",
    "Ocelot", "Painting", "Pig", "PigZombie", "Sheep", "Skeleton", "Slime", "Spider",
    "Squid", "Villager", "Witch", "Wolf", "XPOrb", "Zombie",
];

/// Block entity ids and the block ids that carry them.
const VANILLA_BLOCK_ENTITIES: &[(&str, &[u16])] = &[
    ("Music", &[25]),
    ("Trap", &[23]),
    ("Piston", &[36]),
    ("MobSpawner", &[52]),
    ("Chest", &[54, 146]),
    ("Furnace", &[61, 62]),
    ("Sign", &[63, 68]),
    ("RecordPlayer", &[84]),
    ("EnchantTable", &[116]),
    ("Cauldron", &[118]),
    ("Airportal", &[119]),
    ("Control", &[137]),
    ("Beacon", &[138]),
    ("FlowerPot", &[140]),
    ("Skull", &[144]),
    ("Comparator", &[149, 150]),
    ("DLDetector", &[151, 178]),
    ("Hopper", &[154]),
    ("Dropper", &[158]),
    ("Banner", &[176, 177]),
];

fn init_log() {
    let config = &advanced_config().logging;
    if !config.enabled {
        return;
    }

    let mut builder = ConfigBuilder::new();
    if config.timestamp {
        builder.set_time_format_rfc3339();
    } else {
        builder.set_time_level(LevelFilter::Off);
    }
    builder.set_thread_level(if config.threads {
        LevelFilter::Info
    } else {
        LevelFilter::Off
    });

    let color = if config.color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    // Only fails when a logger is already installed
    let _ = TermLogger::init(
        config.level_filter(),
        builder.build(),
        TerminalMode::Mixed,
        color,
    );
}

fn vanilla_registries() -> Registries {
    let mut entities = EntityRegistry::new();
    for id in VANILLA_ENTITIES {
        entities.register_stored(id);
    }

    let mut block_entities = BlockEntityRegistry::new();
    for (id, blocks) in VANILLA_BLOCK_ENTITIES {
        block_entities.register_stored(id);
        for block in *blocks {
            block_entities.bind_block(*block, id);
        }
    }
    Registries::new(entities, block_entities)
}

/// Loads every stored chunk once. Returns the positions that did not load.
async fn verify_chunks(storage: &ChunkStorage, positions: &[ChunkPos]) -> Vec<ChunkPos> {
    let mut failed = Vec::new();
    for (i, position) in positions.iter().enumerate() {
        if !storage.load_chunk(Chunk::new_sync(*position)).await {
            warn!("Chunk {position:?} could not be loaded");
            failed.push(*position);
        }
        if (i + 1) % 1024 == 0 {
            info!("Verified {}/{} chunks", i + 1, positions.len());
        }
    }
    failed
}

#[tokio::main]
async fn main() {
    let time = Instant::now();
    init_log();

    info!("Starting Ember {CARGO_PKG_VERSION}");
    let world_path = BASIC_CONFIG.get_world_path();
    if !world_path.exists() {
        error!("World folder {} does not exist", world_path.display());
        return;
    }

    let storage = ChunkStorage::new(world_path.clone(), Arc::new(vanilla_registries()));

    let properties = storage.world_properties().await;
    match (properties.level_name(), properties.seed()) {
        (Some(name), Some(seed)) => info!("Opened world \"{name}\" (seed {seed})"),
        _ => warn!("{} has no readable level.dat", world_path.display()),
    }
    if let Some(spawn) = properties.spawn() {
        info!("Spawn is at {spawn:?}");
    }

    let positions = storage.stored_chunks().await;
    info!("Found {} stored chunks", positions.len());

    let failed = verify_chunks(&storage, &positions).await;
    if failed.is_empty() {
        info!("All chunks loaded");
    } else {
        error!("{} of {} chunks failed to load", failed.len(), positions.len());
    }

    storage.shutdown().await;
    info!("Done in {}ms", time.elapsed().as_millis());
}

#[cfg(test)]
mod test {
    use std::{num::NonZeroUsize, sync::Arc};

    use ember_world::{ChunkStorage, chunk::io::region::AnvilRegionOpener};

    use super::{VANILLA_BLOCK_ENTITIES, vanilla_registries, verify_chunks};

    #[test]
    fn vanilla_block_entities_are_bound() {
        let registries = vanilla_registries();
        assert!(registries.entities.contains("Pig"));
        for (id, blocks) in VANILLA_BLOCK_ENTITIES {
            assert!(registries.block_entities.contains(id));
            for block in *blocks {
                assert_eq!(registries.block_entities.block_entity_id(*block), Some(*id));
            }
        }
        // Redstone parts and decorations carry block entities too
        for block in [36, 84, 118, 119, 137, 140, 149, 150, 151, 178] {
            assert!(registries.block_entities.block_entity_id(block).is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_world_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ChunkStorage::with_opener(
            dir.path().to_path_buf(),
            Arc::new(vanilla_registries()),
            NonZeroUsize::MIN,
            Arc::new(AnvilRegionOpener::default()),
        );
        let positions = storage.stored_chunks().await;
        assert!(positions.is_empty());
        assert!(verify_chunks(&storage, &positions).await.is_empty());
        storage.shutdown().await;
    }
}
