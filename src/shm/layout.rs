/// `#[repr(C)]` structures that live in shared memory.
///
/// All structs use fixed-size fields and explicit padding so the layout
/// is identical in every process attached to the cache. The header and
/// the entry table are written through raw pointers from concurrently
/// running workers; field offsets are therefore load-bearing.
use std::sync::atomic::AtomicU64;

use super::lock::SpinLock;

/// Magic bytes at the start of the header to validate an attachment.
pub const MAGIC: [u8; 8] = *b"SHMFC03\0";

/// Size of the fixed header region.
pub const HEADER_SIZE: usize = 256;

/// Maximum key length in bytes, including the terminator slot the
/// original ABI reserves. Effective path content is 127 bytes.
pub const MAX_PATH: usize = 128;

/// Storage for a derived segment name: `'/' + path` with every `/`
/// replaced, at most `MAX_PATH` content bytes.
pub const MAX_SEGMENT_NAME: usize = 136;

/// Sentinel value meaning "empty bucket" in the directory.
pub const BUCKET_EMPTY: i32 = -1;

/// Header lives at offset 0 of the header region.
///
/// Fields are ordered u64-first to avoid implicit alignment padding in
/// `#[repr(C)]`. Configuration fields are written once at init, before
/// any fork; the atomics are the only fields mutated afterwards.
#[repr(C)]
pub struct CacheHeader {
    pub magic: [u8; 8],             // 0..8
    pub capacity: u64,              // 8..16   payload byte budget
    pub max_item_size: u64,         // 16..24  0 = unlimited
    pub avg_item_size: u64,         // 24..32  as configured (0 = default)
    pub n_max: u64,                 // 32..40  entry-table capacity
    pub dir_capacity: u64,          // 40..48  directory buckets (power of 2)
    pub n_bucket_locks: u64,        // 48..56

    pub used: AtomicU64,            // 56..64  bytes admitted
    pub n_entries: AtomicU64,       // 64..72  slots reserved

    pub accesses: AtomicU64,        // 72..80
    pub hits: AtomicU64,            // 80..88
    pub cold_misses: AtomicU64,     // 88..96
    pub capacity_misses: AtomicU64, // 96..104
    pub fails: AtomicU64,           // 104..112

    pub policy: u32,                // 112..116
    pub dir_lock: SpinLock,         // 116..120

    pub _pad: [u8; 136],            // 120..256
}

const _: () = assert!(std::mem::size_of::<CacheHeader>() == HEADER_SIZE);

/// Per-file metadata record in the entry table.
///
/// A record is written exactly once by the admitting worker before the
/// directory insert publishes it; after that it is read-only until
/// flush. `payload_fd` and `payload_addr` are only meaningful in the
/// admitting process; readers open and map the segment by name.
#[repr(C)]
pub struct EntryRecord {
    pub size: u64,                    // 0..8    payload length in bytes
    pub payload_addr: u64,            // 8..16   admitting process mapping
    pub payload_fd: i32,              // 16..20
    pub bucket_id: u32,               // 20..24  guarding lock index, fixed at init
    pub path_len: u32,                // 24..28
    pub ready: u32,                   // 28..32  1 once the payload exists
    pub path: [u8; MAX_PATH],         // 32..160
    pub name: [u8; MAX_SEGMENT_NAME], // 160..296 derived segment name
}

const _: () = assert!(std::mem::size_of::<EntryRecord>() == 296);
const _: () = assert!(std::mem::size_of::<EntryRecord>() % 8 == 0);

impl EntryRecord {
    /// The key bytes as stored.
    pub fn path_bytes(&self) -> &[u8] {
        &self.path[..self.path_len as usize]
    }

    /// The derived segment name bytes (one byte longer than the path).
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.path_len as usize + 1]
    }
}

/// One bucket in the open-addressing directory.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DirBucket {
    pub hash: u64,
    pub slot: i32,
    pub _pad: u32,
}

impl DirBucket {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

const _: () = assert!(std::mem::size_of::<DirBucket>() == 16);

/// Byte size of the entry-table region.
pub fn entry_table_size(n_max: u64) -> usize {
    n_max as usize * std::mem::size_of::<EntryRecord>()
}

/// Byte size of the directory region.
pub fn directory_size(dir_capacity: u64) -> usize {
    dir_capacity as usize * DirBucket::SIZE
}

/// Byte size of the bucket-lock region.
pub fn lock_array_size(n_locks: u64) -> usize {
    n_locks as usize * std::mem::size_of::<SpinLock>()
}
