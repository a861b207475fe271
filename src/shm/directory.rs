/// Open-addressing directory operating on raw shared memory.
///
/// Maps a path to its slot index in the entry table. Uses linear
/// probing over a power-of-two bucket array sized at 2x the entry
/// capacity to keep the load factor under 50%. The directory supports
/// lookup, insert and clear only; individual entries are never removed
/// (flush drops the whole table), so no deletion-shift logic exists.
///
/// Callers serialize all three operations with the directory spinlock.
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use super::layout::{DirBucket, EntryRecord, BUCKET_EMPTY};

/// Hash a path for directory probing and bucket placement.
///
/// `DefaultHasher::new()` is keyed deterministically, so every process
/// attached to the cache computes identical hashes.
pub fn path_hash(path: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(path);
    hasher.finish()
}

/// Look up a path, returning its slot index if present.
///
/// Compares the stored path bytes in the entry table to confirm the
/// match (hashes can collide).
///
/// # Safety
/// `dir_base` must point to a valid directory of `dir_capacity` buckets
/// (a power of two), and `entries` to an entry table that every stored
/// slot index is in bounds for. Caller holds the directory lock.
pub unsafe fn lookup(
    dir_base: *const u8,
    dir_capacity: u64,
    entries: *const EntryRecord,
    path_hash: u64,
    path: &[u8],
) -> Option<u32> {
    let mask = dir_capacity.wrapping_sub(1);
    let mut idx = path_hash & mask;

    for _ in 0..dir_capacity {
        let bucket = &*(dir_base.add(idx as usize * DirBucket::SIZE) as *const DirBucket);

        if bucket.slot == BUCKET_EMPTY {
            return None;
        }

        if bucket.hash == path_hash {
            let entry = &*entries.add(bucket.slot as usize);
            if entry.path_bytes() == path {
                return Some(bucket.slot as u32);
            }
        }

        idx = (idx + 1) & mask;
    }

    None
}

/// Insert a mapping from `path_hash` to `slot`.
///
/// The caller guarantees the path is not currently present.
///
/// # Safety
/// Same requirements as [`lookup`].
pub unsafe fn insert(dir_base: *mut u8, dir_capacity: u64, path_hash: u64, slot: u32) {
    let mask = dir_capacity.wrapping_sub(1);
    let mut idx = path_hash & mask;

    for _ in 0..dir_capacity {
        let bucket = &mut *(dir_base.add(idx as usize * DirBucket::SIZE) as *mut DirBucket);

        if bucket.slot == BUCKET_EMPTY {
            bucket.hash = path_hash;
            bucket.slot = slot as i32;
            return;
        }

        idx = (idx + 1) & mask;
    }

    // The directory is sized above the entry table, so a full table
    // means the sizing invariant was broken.
    debug_assert!(false, "directory is full");
}

/// Reset every bucket to empty.
///
/// # Safety
/// `dir_base` must point to a valid directory of `dir_capacity` buckets.
/// Caller holds the directory lock.
pub unsafe fn clear(dir_base: *mut u8, dir_capacity: u64) {
    for i in 0..dir_capacity as usize {
        let bucket = &mut *(dir_base.add(i * DirBucket::SIZE) as *mut DirBucket);
        bucket.hash = 0;
        bucket.slot = BUCKET_EMPTY;
    }
}
