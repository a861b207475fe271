//! The cache engine.
//!
//! One `Cache` is shared by every thread and forked worker attached to
//! it. All long-lived state sits in regions from the shared allocator,
//! so a child created after `Cache::new` observes the same entry table,
//! directory and counters as its parent. Payload bytes live in named
//! per-entry segments; the read path maps them on demand.
//!
//! Admission is lock-free for slot and byte reservation. The directory
//! spinlock serializes index probes, and per-entry bucket locks guard
//! payload existence against flush. Directory lock then bucket lock is
//! the only permitted acquisition order.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::io;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::config::{CacheConfig, Policy};
use crate::error::{CacheError, CacheResult};
use crate::io::{file_size, open_direct, read_sized};
use crate::shm::layout::{
    self, CacheHeader, EntryRecord, HEADER_SIZE, MAGIC, MAX_PATH,
};
use crate::shm::lock::SpinLock;
use crate::shm::{alloc, directory, segment};
use crate::stats::CacheStats;

/// Why an admission was refused. Internal: the public surface folds
/// these into [`CacheError`], while the read-through path needs the
/// distinction for its accounting.
enum AdmitError {
    /// Item exceeds the per-item limit.
    TooBig,
    /// Entry table exhausted.
    SlotsFull,
    /// Byte budget exhausted.
    SpaceFull,
    /// Segment creation failed.
    Io(io::Error),
}

/// A fork-shared read-through file cache.
///
/// Create the cache before spawning workers; forked children inherit
/// the shared regions by memory sharing, not by copy. The handle is a
/// set of pointers into those regions and may be used from any thread.
///
/// The cache is append-only: entries admitted on cold misses stay until
/// [`flush`](Cache::flush). Teardown is explicit via
/// [`destroy`](Cache::destroy) — dropping the handle leaves all shared
/// state intact, which is what a forked child exiting wants.
pub struct Cache {
    header: NonNull<CacheHeader>,
    entries: NonNull<EntryRecord>,
    dir: NonNull<u8>,
    locks: NonNull<SpinLock>,
    entry_bytes: usize,
    dir_bytes: usize,
    lock_bytes: usize,
}

// All shared mutation goes through atomics or the shm spinlocks; the
// handle itself is immutable pointers.
unsafe impl Send for Cache {}
unsafe impl Sync for Cache {}

impl Cache {
    /// Allocate and initialize a cache per `config`.
    ///
    /// Sizing: the entry table holds `(2 * capacity) / avg_item_size`
    /// records (at least one), the directory twice that rounded up to a
    /// power of two, and the bucket-lock array one lock per sixteen
    /// entries with a floor of eight.
    pub fn new(config: CacheConfig) -> CacheResult<Cache> {
        config.validate()?;

        let n_max = config.entry_capacity();
        let dir_capacity = (2 * n_max).next_power_of_two();
        let n_locks = (n_max / 16).max(8);

        let entry_bytes = layout::entry_table_size(n_max);
        let dir_bytes = layout::directory_size(dir_capacity);
        let lock_bytes = layout::lock_array_size(n_locks);

        let header = match alloc::alloc(HEADER_SIZE) {
            Ok(p) => p,
            Err(e) => {
                warn!("header allocation failed: {e}");
                return Err(CacheError::OutOfMemory);
            }
        };
        let entries = match alloc::alloc(entry_bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!("entry table allocation failed: {e}");
                unsafe { alloc::free(header, HEADER_SIZE) };
                return Err(CacheError::OutOfMemory);
            }
        };
        let dir = match alloc::alloc(dir_bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!("directory allocation failed: {e}");
                unsafe {
                    alloc::free(header, HEADER_SIZE);
                    alloc::free(entries, entry_bytes);
                }
                return Err(CacheError::OutOfMemory);
            }
        };
        let locks = match alloc::alloc(lock_bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!("lock array allocation failed: {e}");
                unsafe {
                    alloc::free(header, HEADER_SIZE);
                    alloc::free(entries, entry_bytes);
                    alloc::free(dir, dir_bytes);
                }
                return Err(CacheError::OutOfMemory);
            }
        };

        let cache = Cache {
            header: header.cast(),
            entries: entries.cast(),
            dir,
            locks: locks.cast(),
            entry_bytes,
            dir_bytes,
            lock_bytes,
        };

        // Regions come back zeroed: atomics start at 0, spinlocks open.
        // Only the configuration, the directory sentinels and the fixed
        // per-slot lock assignment need explicit writes.
        let h = unsafe { cache.header_mut() };
        h.magic = MAGIC;
        h.capacity = config.capacity;
        h.max_item_size = config.max_item_size;
        h.avg_item_size = config.avg_item_size;
        h.n_max = n_max;
        h.dir_capacity = dir_capacity;
        h.n_bucket_locks = n_locks;
        h.policy = config.policy as u32;

        unsafe { directory::clear(cache.dir.as_ptr(), dir_capacity) };

        for slot in 0..n_max {
            let entry = unsafe { cache.entry_mut(slot) };
            let mut hasher = DefaultHasher::new();
            hasher.write_u64(slot);
            entry.bucket_id = (hasher.finish() % n_locks) as u32;
            entry.payload_fd = -1;
        }

        debug!(
            capacity = config.capacity,
            n_max, dir_capacity, n_locks, "cache initialized"
        );
        Ok(cache)
    }

    fn header(&self) -> &CacheHeader {
        unsafe { self.header.as_ref() }
    }

    /// Mutable header access. Only used during init, before the cache
    /// is shared.
    #[allow(clippy::mut_from_ref)]
    unsafe fn header_mut(&self) -> &mut CacheHeader {
        &mut *self.header.as_ptr()
    }

    fn entry(&self, slot: u64) -> &EntryRecord {
        debug_assert!(slot < self.header().n_max);
        unsafe { &*self.entries.as_ptr().add(slot as usize) }
    }

    /// Mutable entry access. Caller must be the admitting worker before
    /// the slot is published, or hold the slot's bucket lock.
    #[allow(clippy::mut_from_ref)]
    unsafe fn entry_mut(&self, slot: u64) -> &mut EntryRecord {
        debug_assert!(slot < self.header().n_max);
        &mut *self.entries.as_ptr().add(slot as usize)
    }

    fn bucket_lock(&self, bucket_id: u32) -> &SpinLock {
        debug_assert!((bucket_id as u64) < self.header().n_bucket_locks);
        unsafe { &*self.locks.as_ptr().add(bucket_id as usize) }
    }

    /// Total payload byte budget.
    pub fn capacity(&self) -> u64 {
        self.header().capacity
    }

    /// Bytes admitted since the last flush.
    pub fn used(&self) -> u64 {
        self.header().used.load(Ordering::Relaxed)
    }

    /// Entry slots consumed since the last flush, including slots
    /// wasted by lost admission races.
    pub fn entry_count(&self) -> u64 {
        let h = self.header();
        h.n_entries.load(Ordering::Relaxed).min(h.n_max)
    }

    /// The configured policy tag.
    pub fn policy(&self) -> Policy {
        match self.header().policy {
            0 => Policy::Fifo,
            _ => Policy::Minio,
        }
    }

    /// Whether `path` is currently cached.
    pub fn contains(&self, path: &str) -> bool {
        if path.len() >= MAX_PATH {
            return false;
        }
        let h = self.header();
        let hash = directory::path_hash(path.as_bytes());
        let _dir = h.dir_lock.lock();
        unsafe {
            directory::lookup(
                self.dir.as_ptr(),
                h.dir_capacity,
                self.entries.as_ptr(),
                hash,
                path.as_bytes(),
            )
            .is_some()
        }
    }

    /// Admit `data` under `path`.
    ///
    /// The caller guarantees each path is stored at most once per flush
    /// epoch. Fails with [`CacheError::TooBig`] past the per-item
    /// limit, [`CacheError::OutOfMemory`] when slots or bytes run out,
    /// or [`CacheError::Io`] if the payload segment cannot be created.
    pub fn store(&self, path: &str, data: &[u8]) -> CacheResult<()> {
        if path.len() >= MAX_PATH {
            return Err(CacheError::Invalid);
        }
        self.admit(path, data).map_err(|e| match e {
            AdmitError::TooBig => CacheError::TooBig,
            AdmitError::SlotsFull | AdmitError::SpaceFull => CacheError::OutOfMemory,
            AdmitError::Io(e) => CacheError::Io(e),
        })
    }

    fn admit(&self, path: &str, data: &[u8]) -> Result<(), AdmitError> {
        let h = self.header();
        let size = data.len() as u64;

        if h.max_item_size > 0 && size > h.max_item_size {
            return Err(AdmitError::TooBig);
        }

        // Slot reservation is a bare fetch-add. A slot that loses any
        // later step stays consumed until flush; rolling the counter
        // back would race with concurrent reservations.
        let slot = h.n_entries.fetch_add(1, Ordering::Relaxed);
        if slot >= h.n_max {
            return Err(AdmitError::SlotsFull);
        }

        // Byte reservation, undone if it overshoots the budget. The
        // add order among concurrent admissions decides who fits.
        let offset = h.used.fetch_add(size, Ordering::Relaxed);
        if offset + size > h.capacity {
            h.used.fetch_sub(size, Ordering::Relaxed);
            return Err(AdmitError::SpaceFull);
        }

        let entry = unsafe { self.entry_mut(slot) };
        entry.size = size;
        entry.path_len = path.len() as u32;
        entry.path[..path.len()].copy_from_slice(path.as_bytes());
        let name = segment::derive_name(path.as_bytes());
        entry.name[..name.len()].copy_from_slice(&name);

        if size > 0 {
            let (fd, addr) = match segment::create(&name, size) {
                Ok(pair) => pair,
                Err(e) => {
                    // Never published, so the reserved bytes go back;
                    // the slot stays wasted.
                    h.used.fetch_sub(size, Ordering::Relaxed);
                    warn!("payload segment creation failed for {path}: {e}");
                    return Err(AdmitError::Io(e));
                }
            };
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), addr.as_ptr(), data.len());
            }
            entry.payload_fd = fd;
            entry.payload_addr = addr.as_ptr() as u64;
        } else {
            // A zero-length mapping is not a thing; an empty item is an
            // entry with no segment.
            entry.payload_fd = -1;
            entry.payload_addr = 0;
        }
        entry.ready = 1;

        // Publish. The lock release orders every write above before any
        // reader that finds the slot.
        let hash = directory::path_hash(path.as_bytes());
        let _dir = h.dir_lock.lock();
        unsafe { directory::insert(self.dir.as_ptr(), h.dir_capacity, hash, slot as u32) };
        Ok(())
    }

    /// Copy a cached payload into `buf`.
    ///
    /// Returns the payload length, [`CacheError::Miss`] if the path is
    /// not cached, or [`CacheError::TooLarge`] if `buf` cannot hold it.
    pub fn load(&self, path: &str, buf: &mut [u8]) -> CacheResult<usize> {
        if path.len() >= MAX_PATH {
            return Err(CacheError::Invalid);
        }
        let h = self.header();
        let hash = directory::path_hash(path.as_bytes());

        let dir_guard = h.dir_lock.lock();
        let slot = match unsafe {
            directory::lookup(
                self.dir.as_ptr(),
                h.dir_capacity,
                self.entries.as_ptr(),
                hash,
                path.as_bytes(),
            )
        } {
            Some(slot) => slot,
            None => return Err(CacheError::Miss),
        };

        // Hand-off: the bucket lock is taken before the directory lock
        // is released, so a flush cannot slip in and unlink the segment
        // between lookup and copy.
        let entry = self.entry(slot as u64);
        let _bucket = self.bucket_lock(entry.bucket_id).lock();
        drop(dir_guard);

        let size = entry.size as usize;
        if size > buf.len() {
            return Err(CacheError::TooLarge);
        }
        if size == 0 {
            return Ok(0);
        }

        let file = segment::open_ro(entry.name_bytes())?;
        let map = unsafe { Mmap::map(&file)? };
        buf[..size].copy_from_slice(&map[..size]);
        Ok(size)
    }

    /// Read `path` through the cache.
    ///
    /// A hit copies the cached payload into `buf`. A miss reads the
    /// file from the filesystem with direct I/O into `buf`, then admits
    /// it if the per-item limit and remaining capacity allow; the bytes
    /// are returned either way. `buf` must be aligned to
    /// [`BLOCK_SIZE`](crate::BLOCK_SIZE) and large enough for the file
    /// size rounded up to the next block.
    pub fn read(&self, path: &str, buf: &mut [u8]) -> CacheResult<usize> {
        if path.len() >= MAX_PATH {
            return Err(CacheError::Invalid);
        }
        let h = self.header();
        h.accesses.fetch_add(1, Ordering::Relaxed);

        match self.load(path, buf) {
            Ok(n) => {
                h.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(n);
            }
            Err(CacheError::Miss) => {}
            Err(CacheError::TooLarge) => {
                h.fails.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::Invalid);
            }
            Err(e) => {
                h.fails.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }

        let mut file = match open_direct(Path::new(path)) {
            Ok(f) => f,
            Err(_) => {
                h.fails.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::NotFound);
            }
        };
        let size = match file_size(&mut file) {
            Ok(s) => s,
            Err(e) => {
                h.fails.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::Io(e));
            }
        };
        if size == 0 || size > buf.len() as u64 {
            h.fails.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::Invalid);
        }
        let size = size as usize;
        if let Err(e) = read_sized(&mut file, buf, size) {
            h.fails.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::Io(e));
        }
        drop(file);

        match self.admit(path, &buf[..size]) {
            Ok(()) => {
                h.cold_misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(AdmitError::SlotsFull) => {
                h.fails.fetch_add(1, Ordering::Relaxed);
                return Err(CacheError::OutOfMemory);
            }
            Err(_) => {
                // Refused for size or capacity; serve the bytes anyway.
                h.capacity_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(size)
    }

    /// Drop every cached entry and reset `used` and the entry count.
    ///
    /// Not safe against concurrent traffic: the caller serializes flush
    /// against all readers and writers, in every attached process.
    /// Statistics are preserved. The entry table, directory and lock
    /// array are reused, so the cache is immediately serviceable again.
    ///
    /// Flush must run in the process that admitted the entries — it
    /// closes the admitting mappings and descriptors recorded at
    /// admission time.
    pub fn flush(&self) {
        let h = self.header();
        let _dir = h.dir_lock.lock();

        let reserved = h.n_entries.load(Ordering::Relaxed).min(h.n_max);
        for slot in 0..reserved {
            let entry = unsafe { self.entry_mut(slot) };
            let _bucket = self.bucket_lock(entry.bucket_id).lock();
            if entry.ready == 1 {
                if entry.payload_fd >= 0 {
                    unsafe {
                        segment::unmap(entry.payload_addr, entry.size);
                        libc::close(entry.payload_fd);
                    }
                    segment::unlink(entry.name_bytes());
                }
                entry.ready = 0;
            }
            entry.size = 0;
            entry.payload_addr = 0;
            entry.payload_fd = -1;
            entry.path_len = 0;
        }

        unsafe { directory::clear(self.dir.as_ptr(), h.dir_capacity) };
        h.used.store(0, Ordering::Relaxed);
        h.n_entries.store(0, Ordering::Relaxed);
        debug!(entries = reserved, "cache flushed");
    }

    /// Snapshot the access counters.
    pub fn stats(&self) -> CacheStats {
        let h = self.header();
        CacheStats {
            accesses: h.accesses.load(Ordering::Relaxed),
            hits: h.hits.load(Ordering::Relaxed),
            cold_misses: h.cold_misses.load(Ordering::Relaxed),
            capacity_misses: h.capacity_misses.load(Ordering::Relaxed),
            fails: h.fails.load(Ordering::Relaxed),
        }
    }

    /// Tear the cache down: unlink every payload segment, unmap the
    /// admitting mappings, release all shared regions.
    ///
    /// Safe only when no other thread or process still uses the cache.
    pub fn destroy(self) {
        let h = self.header();
        let reserved = h.n_entries.load(Ordering::Relaxed).min(h.n_max);
        for slot in 0..reserved {
            let entry = self.entry(slot);
            if entry.ready == 1 && entry.payload_fd >= 0 {
                unsafe {
                    segment::unmap(entry.payload_addr, entry.size);
                    libc::close(entry.payload_fd);
                }
                segment::unlink(entry.name_bytes());
            }
        }

        debug!(entries = reserved, "cache destroyed");
        unsafe {
            alloc::free(self.header.cast(), HEADER_SIZE);
            alloc::free(self.entries.cast(), self.entry_bytes);
            alloc::free(self.dir, self.dir_bytes);
            alloc::free(self.locks.cast(), self.lock_bytes);
        }
    }
}
