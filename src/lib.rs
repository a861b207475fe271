//! Fork-shared read-through file cache for data-loader workers.
//!
//! `shmcache` fronts a population of small immutable files (training
//! images, shards) that are re-read across epochs. All cache state
//! lives in anonymous shared memory created before the loader forks,
//! so a file fetched by one worker is a hit for every sibling. Misses
//! read the backing file with direct I/O and admit it while capacity
//! lasts; the cache never evicts, and `flush` is the only removal.
//!
//! Unix only.

mod cache;
mod config;
mod error;
mod io;
mod shm;
mod stats;

pub use cache::Cache;
pub use config::{CacheConfig, Policy, BLOCK_SIZE, DEFAULT_AVG_ITEM_SIZE};
pub use error::{CacheError, CacheResult};
pub use io::AlignedBuf;
pub use stats::CacheStats;
