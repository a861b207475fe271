/// Cache configuration.
///
/// `CacheConfig` is a plain builder; the derived quantities (entry-table
/// capacity, directory size, lock-array length) are computed once by
/// [`Cache::new`](crate::Cache::new) and frozen in the shared header.
use crate::error::{CacheError, CacheResult};

/// Block size direct I/O aligns to. Caller buffers for `read` and
/// `load` must start on a multiple of this.
pub const BLOCK_SIZE: usize = 4096;

/// Assumed average item size when the caller passes 0. Used only to
/// size the entry table.
pub const DEFAULT_AVG_ITEM_SIZE: u64 = 100 * 1024;

/// Replacement policy tag.
///
/// The cache never evicts; `Minio` admits on first miss while capacity
/// remains. `Fifo` is defined for configuration parity but behaves
/// identically to `Minio`.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Fifo = 0,
    Minio = 1,
}

/// Configuration for [`Cache::new`](crate::Cache::new).
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub(crate) capacity: u64,
    pub(crate) max_item_size: u64,
    pub(crate) avg_item_size: u64,
    pub(crate) policy: Policy,
}

impl CacheConfig {
    /// Configure a cache holding up to `capacity` payload bytes.
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            max_item_size: 0,
            avg_item_size: 0,
            policy: Policy::Minio,
        }
    }

    /// Largest single item admitted, in bytes (0 = unlimited).
    pub fn max_item_size(mut self, bytes: u64) -> Self {
        self.max_item_size = bytes;
        self
    }

    /// Expected average item size, in bytes (0 = 100 KiB default).
    /// Only affects entry-table sizing.
    pub fn avg_item_size(mut self, bytes: u64) -> Self {
        self.avg_item_size = bytes;
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.capacity == 0 {
            return Err(CacheError::Invalid);
        }
        Ok(())
    }

    /// Entry-table capacity: `(2 * capacity) / avg_item_size`, at least 1.
    pub(crate) fn entry_capacity(&self) -> u64 {
        let avg = if self.avg_item_size == 0 {
            DEFAULT_AVG_ITEM_SIZE
        } else {
            self.avg_item_size
        };
        ((2 * self.capacity) / avg).max(1)
    }
}
