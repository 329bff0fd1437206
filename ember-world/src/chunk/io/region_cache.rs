use std::{
    collections::BTreeSet,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};

use ember_config::advanced_config;
use log::{debug, error, warn};
use lru::LruCache;
use parking_lot::Mutex;

use super::{
    RegionError, RegionFileOpener, RegionHandle, SharedRegionHandle, region::AnvilRegionOpener,
};
use crate::coordinates::{
    ChunkPos, RegionPos, parse_region_file_name, region_file_name, region_of,
};

/// Keeps a bounded number of region files open.
///
/// Every handle leaving the cache, through capacity, [`RegionFileCache::evict`] or
/// [`RegionFileCache::clear`], is closed right away. Files are opened while the cache is
/// locked so a region is never open twice.
pub struct RegionFileCache {
    region_folder: PathBuf,
    opener: Arc<dyn RegionFileOpener>,
    cache: Mutex<LruCache<RegionPos, SharedRegionHandle>>,
}

impl RegionFileCache {
    pub fn new(
        region_folder: PathBuf,
        capacity: NonZeroUsize,
        opener: Arc<dyn RegionFileOpener>,
    ) -> Self {
        Self {
            region_folder,
            opener,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// A cache of Anvil region files sized and compressed as configured.
    pub fn from_config(region_folder: PathBuf) -> Self {
        let capacity = NonZeroUsize::new(advanced_config().storage.region_cache_size)
            .unwrap_or(NonZeroUsize::MIN);
        Self::new(
            region_folder,
            capacity,
            Arc::new(AnvilRegionOpener::from_config()),
        )
    }

    pub fn region_folder(&self) -> &Path {
        &self.region_folder
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// The region file holding the chunk, opened (or created) when not cached.
    pub fn get_region_file(
        &self,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<SharedRegionHandle, RegionError> {
        self.get_region(region_of(ChunkPos::new(chunk_x, chunk_z)))
    }

    pub fn get_region(&self, region: RegionPos) -> Result<SharedRegionHandle, RegionError> {
        let mut cache = self.cache.lock();
        if let Some(handle) = cache.get(&region) {
            return Ok(handle.clone());
        }

        let handle = self.open_region(region)?;
        // The key is new, so anything handed back was pushed out by capacity
        if let Some((_, evicted)) = cache.push(region, handle.clone()) {
            Self::close_evicted(&evicted);
        }
        Ok(handle)
    }

    /// Like [`RegionFileCache::get_region_file`], but `None` instead of creating a region file
    /// that does not exist yet.
    pub fn get_existing_region_file(
        &self,
        chunk_x: i32,
        chunk_z: i32,
    ) -> Result<Option<SharedRegionHandle>, RegionError> {
        let region = region_of(ChunkPos::new(chunk_x, chunk_z));
        if self.cached_region(region).is_none()
            && !self.region_folder.join(region_file_name(region)).is_file()
        {
            return Ok(None);
        }
        self.get_region(region).map(Some)
    }

    /// The cached handle, without opening anything or touching the eviction order.
    pub fn cached_region(&self, region: RegionPos) -> Option<SharedRegionHandle> {
        self.cache.lock().peek(&region).cloned()
    }

    fn open_region(&self, region: RegionPos) -> Result<SharedRegionHandle, RegionError> {
        let path = self.region_folder.join(region_file_name(region));
        if !self.region_folder.exists() {
            fs::create_dir_all(&self.region_folder).map_err(|err| {
                error!(
                    "Failed to create region folder {:?}: {err}",
                    self.region_folder
                );
                RegionError::from(err)
            })?;
        }

        debug!("Opening region file {path:?}");
        match self.opener.open(&path) {
            Ok(file) => Ok(Arc::new(RegionHandle::new(region, path, file))),
            Err(err) => {
                error!("Failed to open region file {path:?}: {err}");
                Err(err)
            }
        }
    }

    fn close_evicted(handle: &RegionHandle) {
        debug!("Closing region file {:?}", handle.path());
        if let Err(err) = handle.close() {
            error!("Failed to close region file {:?}: {err}", handle.path());
        }
    }

    /// Closes and drops the region if it is cached.
    pub fn evict(&self, region: RegionPos) -> bool {
        let evicted = self.cache.lock().pop(&region);
        match evicted {
            Some(handle) => {
                Self::close_evicted(&handle);
                true
            }
            None => false,
        }
    }

    /// Every region that exists, cached or found on disk, ordered by position. Regions found
    /// on disk are opened and cached.
    ///
    /// With more regions than the cache holds, the first handles returned may already be
    /// closed again; [`RegionFileCache::get_region`] reopens them.
    pub fn get_created_regions(&self) -> Vec<SharedRegionHandle> {
        let mut regions: BTreeSet<RegionPos> =
            self.cache.lock().iter().map(|(region, _)| *region).collect();

        match fs::read_dir(&self.region_folder) {
            Ok(entries) => regions.extend(
                entries
                    .filter_map(Result::ok)
                    .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_file()))
                    .filter_map(|entry| parse_region_file_name(entry.file_name().to_str()?)),
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                "Failed to list region folder {:?}: {err}",
                self.region_folder
            ),
        }

        regions
            .into_iter()
            .filter_map(|region| self.get_region(region).ok())
            .collect()
    }

    /// Closes every cached region file.
    pub fn clear(&self) {
        let mut cache = self.cache.lock();
        while let Some((_, handle)) = cache.pop_lru() {
            Self::close_evicted(&handle);
        }
    }
}

impl Drop for RegionFileCache {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod test {
    use std::{fs, num::NonZeroUsize, path::Path, sync::Arc};

    use temp_dir::TempDir;

    use super::RegionFileCache;
    use crate::chunk::io::{
        RegionError, RegionFile, RegionFileOpener, test_support::CountingOpener,
    };
    use crate::coordinates::RegionPos;

    fn cache(dir: &TempDir, capacity: usize) -> (RegionFileCache, Arc<CountingOpener>) {
        let opener = Arc::new(CountingOpener::default());
        let cache = RegionFileCache::new(
            dir.path().join("region"),
            NonZeroUsize::new(capacity).unwrap(),
            opener.clone(),
        );
        (cache, opener)
    }

    #[test]
    fn chunks_of_one_region_share_a_handle() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 4);

        let first = cache.get_region_file(0, 0).unwrap();
        let second = cache.get_region_file(31, 31).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opener.opened(), 1);

        let other = cache.get_region_file(32, 0).unwrap();
        assert_eq!(other.region(), RegionPos::new(1, 0));
        assert_eq!(opener.opened(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_closes_exactly_once_and_lookup_reopens() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 2);

        let evicted = cache.get_region(RegionPos::new(0, 0)).unwrap();
        evicted.write_chunk(1, 1, &[1, 2, 3]).unwrap();
        cache.get_region(RegionPos::new(1, 0)).unwrap();
        cache.get_region(RegionPos::new(2, 0)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(opener.close_count(0), 1);
        assert!(evicted.is_closed());
        assert!(matches!(
            evicted.read_chunk(1, 1),
            Err(RegionError::Closed(_))
        ));

        let reopened = cache.get_region_file(5, 5).unwrap();
        assert!(!Arc::ptr_eq(&evicted, &reopened));
        assert!(!reopened.is_closed());
        assert_eq!(opener.opened(), 4);
        // Evicting (1, 0) to make room did not close (0, 0) again
        assert_eq!(opener.close_count(0), 1);
        assert_eq!(opener.close_count(1), 1);
    }

    #[test]
    fn recently_used_regions_stay_open() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 2);

        let kept = cache.get_region(RegionPos::new(0, 0)).unwrap();
        cache.get_region(RegionPos::new(1, 0)).unwrap();
        cache.get_region(RegionPos::new(0, 0)).unwrap();
        cache.get_region(RegionPos::new(2, 0)).unwrap();

        assert!(!kept.is_closed());
        assert_eq!(opener.close_count(1), 1);
        assert!(cache.cached_region(RegionPos::new(1, 0)).is_none());
    }

    #[test]
    fn evict_and_clear_close_everything_once() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 8);
        for x in 0..4 {
            cache.get_region(RegionPos::new(x, -x)).unwrap();
        }

        assert!(cache.evict(RegionPos::new(2, -2)));
        assert!(!cache.evict(RegionPos::new(2, -2)));
        assert_eq!(opener.close_count(2), 1);

        cache.clear();
        assert!(cache.is_empty());
        cache.clear();
        for nth in 0..4 {
            assert_eq!(opener.close_count(nth), 1);
        }
    }

    #[test]
    fn created_regions_include_disk_files() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 8);
        let folder = dir.path().join("region");
        cache.get_region(RegionPos::new(5, 5)).unwrap();

        fs::write(folder.join("r.0.0.mca"), b"").unwrap();
        fs::write(folder.join("r.-1.2.mca"), b"").unwrap();
        fs::write(folder.join("r.5.5.mca"), b"").unwrap();
        fs::write(folder.join("notes.txt"), b"").unwrap();
        fs::create_dir(folder.join("r.9.9.mca")).unwrap();

        let regions: Vec<RegionPos> = cache
            .get_created_regions()
            .iter()
            .map(|handle| handle.region())
            .collect();
        assert_eq!(
            regions,
            vec![
                RegionPos::new(-1, 2),
                RegionPos::new(0, 0),
                RegionPos::new(5, 5)
            ]
        );
        assert_eq!(opener.opened(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn existing_lookup_does_not_create() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 8);

        assert!(cache.get_existing_region_file(0, 0).unwrap().is_none());
        assert_eq!(opener.opened(), 0);

        let created = cache.get_region_file(0, 0).unwrap();
        let existing = cache.get_existing_region_file(3, 3).unwrap().unwrap();
        assert!(Arc::ptr_eq(&created, &existing));

        fs::write(dir.path().join("region/r.1.1.mca"), b"").unwrap();
        assert!(cache.get_existing_region_file(40, 40).unwrap().is_some());
        assert_eq!(opener.opened(), 2);
    }

    #[test]
    fn missing_folder_has_no_regions() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = cache(&dir, 8);
        assert!(cache.get_created_regions().is_empty());
    }

    #[test]
    fn concurrent_lookups_open_once() {
        let dir = TempDir::new().unwrap();
        let (cache, opener) = cache(&dir, 8);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        cache.get_region_file(70, -70).unwrap();
                    }
                });
            }
        });
        assert_eq!(opener.opened(), 1);
        assert_eq!(cache.len(), 1);
    }

    struct FailingOpener;

    impl RegionFileOpener for FailingOpener {
        fn open(&self, _path: &Path) -> Result<Box<dyn RegionFile>, RegionError> {
            Err(RegionError::InvalidHeader)
        }
    }

    #[test]
    fn failed_open_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let cache = RegionFileCache::new(
            dir.path().join("region"),
            NonZeroUsize::new(4).unwrap(),
            Arc::new(FailingOpener),
        );
        assert!(matches!(
            cache.get_region_file(0, 0),
            Err(RegionError::InvalidHeader)
        ));
        assert!(cache.is_empty());
    }
}
