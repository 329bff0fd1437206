use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

use ember_nbt::data_view::DataView;
use log::{debug, error, trace, warn};
use tokio_util::task::TaskTracker;

use crate::{
    chunk::{
        Chunk, ChunkReadingError, ChunkSnapshot, ChunkWritingError, SyncChunk,
        format::{AnvilChunkCodec, LEVEL, X_POS, Z_POS},
        io::{RegionError, RegionFileOpener, RegionHandle, region_cache::RegionFileCache},
    },
    coordinates::{ChunkPos, local_of},
    registry::Registries,
    world_info::{WorldInfoReader, WorldInfoWriter, WorldProperties, anvil::AnvilLevelInfo},
};

pub const REGION_FOLDER_NAME: &str = "region";

#[derive(Clone, Debug)]
pub struct LevelFolder {
    pub root_folder: PathBuf,
    pub region_folder: PathBuf,
}

impl LevelFolder {
    pub fn new(root_folder: PathBuf) -> Self {
        let region_folder = root_folder.join(REGION_FOLDER_NAME);
        Self {
            root_folder,
            region_folder,
        }
    }
}

/// Reads and writes the chunks and properties of one world folder.
///
/// The async operations run on tokio's blocking pool and never on the calling task. None of
/// them fail loudly: a chunk that cannot be read is reported as missing and every problem is
/// logged.
pub struct ChunkStorage {
    inner: Arc<StorageInner>,
    tasks: TaskTracker,
}

struct StorageInner {
    level_folder: LevelFolder,
    codec: AnvilChunkCodec,
    region_cache: RegionFileCache,
    level_info: AnvilLevelInfo,
}

impl ChunkStorage {
    /// Storage for the world in `root_folder`, set up from the advanced configuration.
    pub fn new(root_folder: PathBuf, registries: Arc<Registries>) -> Self {
        let level_folder = LevelFolder::new(root_folder);
        let region_cache = RegionFileCache::from_config(level_folder.region_folder.clone());
        Self::with_region_cache(
            level_folder,
            registries,
            region_cache,
            AnvilLevelInfo::from_config(),
        )
    }

    /// Storage with a custom region file implementation.
    pub fn with_opener(
        root_folder: PathBuf,
        registries: Arc<Registries>,
        cache_size: NonZeroUsize,
        opener: Arc<dyn RegionFileOpener>,
    ) -> Self {
        let level_folder = LevelFolder::new(root_folder);
        let region_cache =
            RegionFileCache::new(level_folder.region_folder.clone(), cache_size, opener);
        Self::with_region_cache(
            level_folder,
            registries,
            region_cache,
            AnvilLevelInfo::from_config(),
        )
    }

    fn with_region_cache(
        level_folder: LevelFolder,
        registries: Arc<Registries>,
        region_cache: RegionFileCache,
        level_info: AnvilLevelInfo,
    ) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                level_folder,
                codec: AnvilChunkCodec::new(registries),
                region_cache,
                level_info,
            }),
            tasks: TaskTracker::new(),
        }
    }

    pub fn level_folder(&self) -> &LevelFolder {
        &self.inner.level_folder
    }

    pub fn codec(&self) -> &AnvilChunkCodec {
        &self.inner.codec
    }

    pub fn region_cache(&self) -> &RegionFileCache {
        &self.inner.region_cache
    }

    /// Loads `chunk` from disk on the calling thread. False if it is not stored, could not be
    /// decoded or was already initialized.
    pub fn read(&self, chunk: &mut Chunk) -> bool {
        self.inner.read_chunk(chunk)
    }

    /// Saves `chunk` on the calling thread.
    pub fn write(&self, chunk: &Chunk) -> Result<(), ChunkWritingError> {
        if !chunk.is_initialized() {
            return Err(ChunkWritingError::NotInitialized(chunk.position()));
        }
        self.inner.write_snapshot(&chunk.snapshot())
    }

    /// Closes every open region file. They are reopened by the next operation needing them.
    pub fn unload(&self) {
        self.inner.region_cache.clear();
    }

    /// Runs `task` on the blocking pool. `None` once the storage is shut down or when the task
    /// panicked.
    async fn spawn<T, F>(&self, name: &'static str, task: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&StorageInner) -> T + Send + 'static,
    {
        if self.tasks.is_closed() {
            warn!("Chunk storage is shut down, ignoring {name}");
            return None;
        }

        let inner = self.inner.clone();
        let tasks = self.tasks.clone();
        // Tasks tracked before `close` are awaited by `shutdown`, later ones see it closed
        let guarded = move || (!tasks.is_closed()).then(|| task(&inner));
        match self.tasks.spawn_blocking(guarded).await {
            Ok(Some(result)) => Some(result),
            Ok(None) => {
                warn!("Chunk storage shut down before {name} ran");
                None
            }
            Err(err) => {
                error!("Chunk storage task {name} failed: {err}");
                None
            }
        }
    }

    /// Whether a chunk is stored at `position`. False on any error.
    pub async fn chunk_exists(&self, position: ChunkPos) -> bool {
        self.spawn("chunk_exists", move |inner| inner.chunk_exists(position))
            .await
            .unwrap_or(false)
    }

    /// The raw record of a stored chunk. `None` if it is missing or cannot be decoded.
    pub async fn chunk_data(&self, position: ChunkPos) -> Option<DataView> {
        self.spawn("chunk_data", move |inner| inner.chunk_data(position))
            .await
            .flatten()
    }

    /// Positions of every chunk stored in the world, sorted.
    pub async fn stored_chunks(&self) -> Vec<ChunkPos> {
        self.spawn("stored_chunks", StorageInner::stored_chunks)
            .await
            .unwrap_or_default()
    }

    /// Loads a chunk from disk into `chunk`, see [`ChunkStorage::read`].
    pub async fn load_chunk(&self, chunk: SyncChunk) -> bool {
        self.spawn("load_chunk", move |inner| {
            let mut chunk = chunk.blocking_write();
            inner.read_chunk(&mut chunk)
        })
        .await
        .unwrap_or(false)
    }

    /// Saves `chunk`. The snapshot is taken right away, so later changes are not part of the
    /// save.
    pub async fn save_chunk(&self, chunk: SyncChunk) -> bool {
        let snapshot = {
            let chunk = chunk.read().await;
            if !chunk.is_initialized() {
                warn!("Not saving chunk {} which was never loaded", chunk.position());
                return false;
            }
            chunk.snapshot()
        };

        self.spawn("save_chunk", move |inner| {
            inner
                .write_snapshot(&snapshot)
                .inspect_err(|err| error!("Failed to save chunk {}: {err}", snapshot.position))
                .is_ok()
        })
        .await
        .unwrap_or(false)
    }

    pub async fn world_properties(&self) -> WorldProperties {
        self.spawn("world_properties", |inner| {
            inner.level_info.read_world_info(&inner.level_folder)
        })
        .await
        .unwrap_or_default()
    }

    /// Writes both property files. False if either failed; one failing does not stop the
    /// other.
    pub async fn write_world_properties(&self, properties: WorldProperties) -> bool {
        self.spawn("write_world_properties", move |inner| {
            inner
                .level_info
                .write_world_info(&properties, &inner.level_folder)
        })
        .await
        .unwrap_or(false)
    }

    /// Refuses new work, waits for what is running and closes every region file.
    pub async fn shutdown(&self) {
        debug!("Shutting down chunk storage of {:?}", self.inner.level_folder.root_folder);
        self.tasks.close();
        self.tasks.wait().await;
        self.inner.region_cache.clear();
    }
}

impl StorageInner {
    /// Runs `action` against the region holding `position`. A handle evicted in the middle of
    /// the call is looked up once more. `Ok(None)` when `create` is false and the region file
    /// does not exist.
    fn with_region<T>(
        &self,
        position: ChunkPos,
        create: bool,
        action: impl Fn(&RegionHandle, i32, i32) -> Result<T, RegionError>,
    ) -> Result<Option<T>, RegionError> {
        let local = local_of(position);
        let mut retried = false;
        loop {
            let handle = if create {
                self.region_cache.get_region_file(position.x, position.z)?
            } else {
                match self
                    .region_cache
                    .get_existing_region_file(position.x, position.z)?
                {
                    Some(handle) => handle,
                    None => return Ok(None),
                }
            };

            match action(&handle, local.x, local.z) {
                Err(RegionError::Closed(path)) if !retried => {
                    debug!("Region file {path:?} was closed while in use, reopening it");
                    retried = true;
                }
                result => return result.map(Some),
            }
        }
    }

    fn read_raw(&self, position: ChunkPos) -> Result<Option<Vec<u8>>, ChunkReadingError> {
        trace!("Reading chunk {position}");
        self.with_region(position, false, |region, x, z| region.read_chunk(x, z))
            .map(Option::flatten)
            .map_err(ChunkReadingError::Region)
    }

    fn chunk_exists(&self, position: ChunkPos) -> bool {
        self.with_region(position, false, |region, x, z| region.has_chunk(x, z))
            .inspect_err(|err| warn!("Failed to check for chunk {position}: {err}"))
            .is_ok_and(|exists| exists.unwrap_or(false))
    }

    fn chunk_data(&self, position: ChunkPos) -> Option<DataView> {
        let raw = match self.read_raw(position) {
            Ok(raw) => raw?,
            Err(err) => {
                error!("Failed to read chunk {position}: {err}");
                return None;
            }
        };
        ember_nbt::read(&raw, false)
            .inspect_err(|err| error!("Failed to decode chunk {position}: {err}"))
            .ok()
    }

    fn read_chunk(&self, chunk: &mut Chunk) -> bool {
        let position = chunk.position();
        match self.read_raw(position) {
            Ok(Some(raw)) => self.codec.read(chunk, &raw),
            Ok(None) => {
                trace!("Chunk {position} is not stored");
                false
            }
            Err(err) => {
                error!("Failed to read chunk {position}: {err}");
                false
            }
        }
    }

    fn write_snapshot(&self, snapshot: &ChunkSnapshot) -> Result<(), ChunkWritingError> {
        let position = snapshot.position;
        let bytes = self.codec.write(snapshot)?;
        trace!("Writing chunk {position}, {} bytes", bytes.len());
        self.with_region(position, true, |region, x, z| {
            region.write_chunk(x, z, &bytes)
        })
        .map(|_| ())
        .map_err(ChunkWritingError::Region)
    }

    fn stored_chunks(&self) -> Vec<ChunkPos> {
        let mut chunks = Vec::new();
        for handle in self.region_cache.get_created_regions() {
            let payloads = match handle.read_all_chunks() {
                // Pushed out of the cache by a later region, open it again
                Err(RegionError::Closed(_)) => self
                    .region_cache
                    .get_region(handle.region())
                    .and_then(|handle| handle.read_all_chunks()),
                payloads => payloads,
            };

            let payloads = match payloads {
                Ok(payloads) => payloads,
                Err(err) => {
                    error!("Failed to list chunks of {:?}: {err}", handle.path());
                    continue;
                }
            };
            for payload in payloads {
                match payload.map(|raw| stored_position(&raw)) {
                    Ok(Some(position)) => chunks.push(position),
                    Ok(None) => warn!("Skipping unreadable chunk in {:?}", handle.path()),
                    Err(err) => warn!("Skipping chunk in {:?}: {err}", handle.path()),
                }
            }
        }
        chunks.sort();
        chunks.dedup();
        chunks
    }
}

/// The position a chunk record says it belongs to.
fn stored_position(raw: &[u8]) -> Option<ChunkPos> {
    let root = ember_nbt::read(raw, false).ok()?;
    let level = root.get_view(LEVEL)?;
    Some(ChunkPos::new(level.get_int(X_POS)?, level.get_int(Z_POS)?))
}

#[cfg(test)]
mod test {
    use std::{num::NonZeroUsize, sync::Arc};

    use ember_util::math::vector3::Vector3;
    use temp_dir::TempDir;
    use tokio::sync::RwLock;

    use super::ChunkStorage;
    use crate::{
        block::entities::BlockEntityRegistry,
        chunk::{
            Chunk, SyncChunk, empty_sections,
            io::{
                RegionFile,
                region::{AnvilRegionOpener, Compression},
            },
            section::{ChunkSection, pack_code},
        },
        coordinates::ChunkPos,
        entity::{EntityRegistry, StoredEntity},
        registry::Registries,
        world_info::WorldProperties,
    };

    fn registries() -> Arc<Registries> {
        let mut entities = EntityRegistry::new();
        entities.register_stored("Pig");
        Arc::new(Registries::new(entities, BlockEntityRegistry::new()))
    }

    fn storage(dir: &TempDir) -> ChunkStorage {
        ChunkStorage::new(dir.path().to_path_buf(), registries())
    }

    fn small_storage(dir: &TempDir, cache_size: usize) -> ChunkStorage {
        ChunkStorage::with_opener(
            dir.path().to_path_buf(),
            registries(),
            NonZeroUsize::new(cache_size).unwrap(),
            Arc::new(AnvilRegionOpener::new(Compression::ZLib, 6)),
        )
    }

    fn shared(chunk: Chunk) -> SyncChunk {
        Arc::new(RwLock::new(chunk))
    }

    fn generated_chunk(position: ChunkPos, block: u8) -> Chunk {
        let mut section = ChunkSection::new();
        for x in 0..16 {
            for z in 0..16 {
                section.set_code(x, 0, z, pack_code(0, block, 0));
            }
        }
        let mut sections = empty_sections();
        sections[4] = Some(section);

        let mut chunk = Chunk::new(position);
        assert!(chunk.initialize(sections, &Registries::default()));
        chunk.recompute_height_map();
        chunk.set_populated(true);
        chunk.add_entity(Box::new(StoredEntity::new(
            "Pig".to_string(),
            Vector3::new(position.x as f64 * 16.0, 65.0, position.z as f64 * 16.0),
        )));
        chunk
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_then_load() {
        let _ = env_logger::try_init();
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let position = ChunkPos::new(-3, 40);

        assert!(
            storage
                .save_chunk(shared(generated_chunk(position, 7)))
                .await
        );
        assert!(dir.path().join("region/r.-1.1.mca").is_file());
        assert!(storage.chunk_exists(position).await);
        assert!(!storage.chunk_exists(ChunkPos::new(-4, 40)).await);

        let loaded = Chunk::new_sync(position);
        assert!(storage.load_chunk(loaded.clone()).await);
        let loaded = loaded.read().await;
        assert!(loaded.is_populated());
        assert_eq!(loaded.get_block_code(3, 64, 9), pack_code(0, 7, 0));
        assert_eq!(loaded.height_at(3, 9), 65);
        assert_eq!(loaded.entities().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_chunks_do_not_create_regions() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        assert!(!storage.chunk_exists(ChunkPos::new(0, 0)).await);
        assert!(storage.chunk_data(ChunkPos::new(0, 0)).await.is_none());
        let chunk = Chunk::new_sync(ChunkPos::new(0, 0));
        assert!(!storage.load_chunk(chunk.clone()).await);
        assert!(!chunk.read().await.is_initialized());

        assert!(!dir.path().join("region/r.0.0.mca").exists());
        assert!(storage.region_cache().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn chunk_data_is_the_raw_record() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let position = ChunkPos::new(5, -6);
        assert!(
            storage
                .save_chunk(shared(generated_chunk(position, 3)))
                .await
        );

        let data = storage.chunk_data(position).await.unwrap();
        assert_eq!(data.get_int("Level.xPos"), Some(5));
        assert_eq!(data.get_int("Level.zPos"), Some(-6));
        assert_eq!(data.get_bool("Level.TerrainPopulated"), Some(true));
        assert_eq!(data.get_views("Level.Entities").map(|e| e.len()), Some(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupt_chunk_reads_as_missing() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let position = ChunkPos::new(1, 2);
        let region = storage.region_cache().get_region_file(1, 2).unwrap();
        region.write_chunk(1, 2, b"definitely not a tag stream").unwrap();

        assert!(storage.chunk_exists(position).await);
        assert!(storage.chunk_data(position).await.is_none());
        let chunk = Chunk::new_sync(position);
        assert!(!storage.load_chunk(chunk.clone()).await);
        assert!(!chunk.read().await.is_initialized());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stored_chunks_survive_a_small_cache() {
        let dir = TempDir::new().unwrap();
        let storage = small_storage(&dir, 1);
        let positions = [
            ChunkPos::new(0, 0),
            ChunkPos::new(31, 5),
            ChunkPos::new(32, 0),
            ChunkPos::new(-1, -1),
            ChunkPos::new(100, -100),
        ];
        for position in positions {
            assert!(
                storage
                    .save_chunk(shared(generated_chunk(position, 1)))
                    .await
            );
        }
        assert_eq!(storage.region_cache().len(), 1);

        let mut expected = positions.to_vec();
        expected.sort();
        assert_eq!(storage.stored_chunks().await, expected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn uninitialized_chunk_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert!(!storage.save_chunk(Chunk::new_sync(ChunkPos::new(0, 0))).await);
        assert!(!storage.chunk_exists(ChunkPos::new(0, 0)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_saves() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(small_storage(&dir, 2));

        let mut handles = Vec::new();
        for x in -20..20 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let position = ChunkPos::new(x * 7, x * 3);
                storage
                    .save_chunk(shared(generated_chunk(position, 2)))
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        assert_eq!(storage.stored_chunks().await.len(), 40);
        for x in -20..20 {
            assert!(storage.chunk_exists(ChunkPos::new(x * 7, x * 3)).await);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn world_properties_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert_eq!(storage.world_properties().await, WorldProperties::default());

        let mut properties = WorldProperties::default();
        properties.level_data_mut().set("LevelName", "ember");
        properties.extension_mut().set("Generator", "flat");
        assert!(storage.write_world_properties(properties).await);

        let read = storage.world_properties().await;
        assert_eq!(read.level_name(), Some("ember"));
        assert_eq!(
            read.extension.unwrap().get_string("Generator"),
            Some("flat")
        );
        assert!(dir.path().join("level.dat").is_file());
        assert!(dir.path().join("level_ember.dat").is_file());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_closes_regions_and_refuses_work() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let position = ChunkPos::new(0, 0);
        assert!(
            storage
                .save_chunk(shared(generated_chunk(position, 1)))
                .await
        );
        let region = storage.region_cache().get_region_file(0, 0).unwrap();

        storage.shutdown().await;
        assert!(storage.region_cache().is_empty());
        assert!(region.is_closed());
        assert!(!storage.chunk_exists(position).await);
        assert!(storage.chunk_data(position).await.is_none());

        // The data made it to disk
        let reopened = storage.region_cache().get_region_file(0, 0).unwrap();
        assert!(reopened.has_chunk(0, 0).unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn work_racing_shutdown_leaves_no_open_regions() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(small_storage(&dir, 4));

        let mut handles = Vec::new();
        for x in 0..64 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                let position = ChunkPos::new(x * 32, x);
                storage
                    .save_chunk(shared(generated_chunk(position, 1)))
                    .await
            }));
        }
        storage.shutdown().await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(storage.region_cache().is_empty());
        assert!(!storage.save_chunk(shared(generated_chunk(ChunkPos::new(0, 0), 1))).await);
        assert!(storage.region_cache().is_empty());
    }

    #[test]
    fn sync_read_write_and_unload() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let position = ChunkPos::new(9, 9);
        storage.write(&generated_chunk(position, 4)).unwrap();
        assert!(storage.write(&Chunk::new(position)).is_err());

        storage.unload();
        assert!(storage.region_cache().is_empty());

        let mut chunk = Chunk::new(position);
        assert!(storage.read(&mut chunk));
        assert_eq!(chunk.get_block_code(0, 64, 0), pack_code(0, 4, 0));
        assert!(!storage.read(&mut chunk));

        // Files are readable by a plain region file as well
        let region = crate::chunk::io::region::AnvilRegionFile::open(
            &dir.path().join("region/r.0.0.mca"),
            Compression::ZLib,
            6,
        )
        .unwrap();
        assert!(region.has_chunk(9, 9).unwrap());
    }
}
