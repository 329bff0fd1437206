use ember_util::math::vector2::Vector2;

/// Position of a chunk in chunk units. Chunks have no vertical coordinate.
pub type ChunkPos = Vector2<i32>;

/// Position of a region file in region units.
pub type RegionPos = Vector2<i32>;

/// Chunks along one side of a region.
pub const REGION_SIZE: i32 = 32;
/// Chunks stored in one region file.
pub const REGION_CHUNK_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;

pub const REGION_FILE_EXTENSION: &str = "mca";

/// The region file holding `chunk`. Every place that picks a region file goes through here so
/// cache keys and file names can never disagree.
#[inline]
pub const fn region_of(chunk: ChunkPos) -> RegionPos {
    Vector2 {
        x: chunk.x >> 5,
        z: chunk.z >> 5,
    }
}

/// Coordinates of `chunk` inside its region file, both in `0..32`.
#[inline]
pub const fn local_of(chunk: ChunkPos) -> Vector2<i32> {
    Vector2 {
        x: chunk.x & (REGION_SIZE - 1),
        z: chunk.z & (REGION_SIZE - 1),
    }
}

/// Index of a local chunk into the region header tables.
#[inline]
pub const fn local_index(local_x: i32, local_z: i32) -> usize {
    (local_x + local_z * REGION_SIZE) as usize
}

/// Inverse of [`region_of`] + [`local_of`].
#[inline]
pub const fn chunk_in_region(region: RegionPos, local_x: i32, local_z: i32) -> ChunkPos {
    Vector2 {
        x: region.x * REGION_SIZE + local_x,
        z: region.z * REGION_SIZE + local_z,
    }
}

pub fn region_file_name(region: RegionPos) -> String {
    format!("r.{}.{}.{}", region.x, region.z, REGION_FILE_EXTENSION)
}

/// Parses `r.<x>.<z>.mca`, ignoring anything else found in a region folder.
pub fn parse_region_file_name(name: &str) -> Option<RegionPos> {
    let mut parts = name.split('.');
    if parts.next()? != "r" {
        return None;
    }
    let x = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    if parts.next()? != REGION_FILE_EXTENSION || parts.next().is_some() {
        return None;
    }
    Some(Vector2 { x, z })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_chunk_same_region() {
        for (x, z) in [(0, 0), (-1, -1), (31, 31), (1000, -2000)] {
            let pos = ChunkPos::new(x, z);
            assert_eq!(region_of(pos), region_of(pos));
            assert_eq!(local_of(pos), local_of(pos));
        }
    }

    #[test]
    fn region_borders() {
        assert_ne!(
            region_of(ChunkPos::new(31, 31)),
            region_of(ChunkPos::new(32, 32))
        );

        let first = ChunkPos::new(0, 0);
        let second = ChunkPos::new(31, 0);
        assert_eq!(region_of(first), region_of(second));
        assert_eq!(local_of(first), Vector2::new(0, 0));
        assert_eq!(local_of(second), Vector2::new(31, 0));
    }

    #[test]
    fn negative_chunks() {
        assert_eq!(region_of(ChunkPos::new(-1, -32)), RegionPos::new(-1, -1));
        assert_eq!(region_of(ChunkPos::new(-33, 0)), RegionPos::new(-2, 0));
        assert_eq!(local_of(ChunkPos::new(-1, -32)), Vector2::new(31, 0));
    }

    #[test]
    fn local_round_trip() {
        for x in -70..70 {
            for z in [-33, -1, 0, 5, 64] {
                let pos = ChunkPos::new(x, z);
                let local = local_of(pos);
                assert!(local_index(local.x, local.z) < REGION_CHUNK_COUNT);
                assert_eq!(chunk_in_region(region_of(pos), local.x, local.z), pos);
            }
        }
    }

    #[test]
    fn file_names() {
        let region = RegionPos::new(-3, 12);
        assert_eq!(region_file_name(region), "r.-3.12.mca");
        assert_eq!(parse_region_file_name("r.-3.12.mca"), Some(region));
        assert_eq!(parse_region_file_name("r.1.2.mcr"), None);
        assert_eq!(parse_region_file_name("r.1.mca"), None);
        assert_eq!(parse_region_file_name("r.a.2.mca"), None);
        assert_eq!(parse_region_file_name("r.1.2.mca.tmp"), None);
        assert_eq!(parse_region_file_name("level.dat"), None);
    }
}
