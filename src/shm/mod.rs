/// Shared-memory plumbing.
///
/// Everything the cache shares across forked workers lives behind this
/// module: the page-locked anonymous allocator backing all metadata
/// regions, the `#[repr(C)]` layouts written into them, the
/// shm-resident spinlock, the raw open-addressing directory, and the
/// named per-entry payload segments.
pub mod alloc;
pub mod directory;
pub mod layout;
pub mod lock;
pub mod segment;
