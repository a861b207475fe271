/// Point-in-time snapshot of the cache's access counters.
///
/// Counters are maintained with relaxed atomic adds in the shared
/// header, so a snapshot taken under concurrent traffic is eventually
/// consistent. `flush` does not reset them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total `read` calls.
    pub accesses: u64,
    /// Reads served from the cache.
    pub hits: u64,
    /// Misses whose file was served and admitted.
    pub cold_misses: u64,
    /// Misses whose file was served but refused admission.
    pub capacity_misses: u64,
    /// Reads that failed outright (open failure, bad size, slot
    /// exhaustion).
    pub fails: u64,
}
