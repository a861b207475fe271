//! End-to-end read-through scenarios against real files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use shmcache::{AlignedBuf, Cache, CacheConfig, CacheError};

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

/// Write a file of `len` patterned bytes and return its path.
fn write_file(dir: &Path, name: &str, len: usize, seed: u8) -> PathBuf {
    let path = dir.join(name);
    let chunk: Vec<u8> = (0..8192u32)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        let take = (len - data.len()).min(chunk.len());
        data.extend_from_slice(&chunk[..take]);
    }
    fs::write(&path, &data).unwrap();
    path
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn cold_then_hot() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.bin", 2 * MB, 1);
    let b = write_file(dir.path(), "b.bin", 4 * MB, 2);
    let c = write_file(dir.path(), "c.bin", 20 * MB, 3);

    let cache = Cache::new(CacheConfig::new(8 * MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(32 * MB);

    // First pass: a and b admitted, c refused on capacity.
    assert_eq!(cache.read(path_str(&a), &mut buf).unwrap(), 2 * MB);
    assert_eq!(cache.read(path_str(&b), &mut buf).unwrap(), 4 * MB);
    assert_eq!(cache.read(path_str(&c), &mut buf).unwrap(), 20 * MB);

    let stats = cache.stats();
    assert_eq!(stats.cold_misses, 2);
    assert_eq!(stats.capacity_misses, 1);
    assert!(cache.contains(path_str(&a)));
    assert!(cache.contains(path_str(&b)));
    assert!(!cache.contains(path_str(&c)));

    // Second pass: a and b hit, c still a capacity miss.
    assert_eq!(cache.read(path_str(&a), &mut buf).unwrap(), 2 * MB);
    assert_eq!(cache.read(path_str(&b), &mut buf).unwrap(), 4 * MB);
    assert_eq!(cache.read(path_str(&c), &mut buf).unwrap(), 20 * MB);

    let stats = cache.stats();
    assert_eq!(stats.accesses, 6);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.cold_misses, 2);
    assert_eq!(stats.capacity_misses, 2);
    assert_eq!(stats.fails, 0);

    cache.destroy();
}

#[test]
fn hot_reads_are_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "img.bin", 300 * KB, 7);
    let expected = fs::read(&file).unwrap();

    let cache = Cache::new(CacheConfig::new(MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(512 * KB);

    for _ in 0..3 {
        let n = cache.read(path_str(&file), &mut buf).unwrap();
        assert_eq!(n, expected.len());
        assert_eq!(&buf[..n], &expected[..]);
    }

    cache.destroy();
}

#[test]
fn saturation() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(CacheConfig::new(10 * KB as u64).avg_item_size(KB as u64)).unwrap();
    let mut buf = AlignedBuf::new(4 * KB);

    for i in 0..10 {
        let file = write_file(dir.path(), &format!("f{i}.bin"), KB, i as u8);
        assert_eq!(cache.read(path_str(&file), &mut buf).unwrap(), KB);
    }
    assert_eq!(cache.used(), 10 * KB as u64);
    assert_eq!(cache.stats().cold_misses, 10);

    // The budget is exactly consumed; one more byte cannot fit.
    let extra = write_file(dir.path(), "extra.bin", KB, 99);
    assert_eq!(cache.read(path_str(&extra), &mut buf).unwrap(), KB);
    assert_eq!(cache.stats().capacity_misses, 1);
    assert_eq!(cache.used(), 10 * KB as u64);
    assert!(!cache.contains(path_str(&extra)));

    cache.destroy();
}

#[test]
fn oversize_reject() {
    let cache = Cache::new(
        CacheConfig::new(MB as u64)
            .max_item_size(512 * KB as u64)
            .avg_item_size(64 * KB as u64),
    )
    .unwrap();

    let data = vec![0x42u8; 600 * KB];
    assert!(matches!(
        cache.store("x", &data),
        Err(CacheError::TooBig)
    ));
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.used(), 0);

    cache.destroy();
}

#[test]
fn flush_reuse() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.bin", 200 * KB, 1);
    let b = write_file(dir.path(), "b.bin", 300 * KB, 2);

    let cache = Cache::new(CacheConfig::new(MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(512 * KB);

    cache.read(path_str(&a), &mut buf).unwrap();
    cache.read(path_str(&b), &mut buf).unwrap();
    assert_eq!(cache.stats().cold_misses, 2);

    let before = cache.stats();
    cache.flush();

    // Flush drops entries but leaves the counters alone.
    assert_eq!(cache.stats(), before);
    assert_eq!(cache.used(), 0);
    assert!(!cache.contains(path_str(&a)));

    // The same files miss cold again and are re-admitted.
    cache.read(path_str(&a), &mut buf).unwrap();
    cache.read(path_str(&b), &mut buf).unwrap();
    assert_eq!(cache.stats().cold_misses, 4);
    assert_eq!(cache.used(), (200 * KB + 300 * KB) as u64);

    cache.destroy();
}

#[test]
fn direct_io_rounding() {
    // A 5000-byte file: the backing read is issued rounded up to 8192,
    // but the logical size stays 5000 everywhere observable.
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "odd.bin", 5000, 5);
    let expected = fs::read(&file).unwrap();

    let cache = Cache::new(CacheConfig::new(MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(8192);

    assert_eq!(cache.read(path_str(&file), &mut buf).unwrap(), 5000);
    assert_eq!(&buf[..5000], &expected[..]);

    // The cached entry reports the true size on the hit path too.
    let mut out = AlignedBuf::new(8192);
    assert_eq!(cache.load(path_str(&file), &mut out).unwrap(), 5000);
    assert_eq!(&out[..5000], &expected[..]);
    assert_eq!(cache.used(), 5000);

    cache.destroy();
}

#[test]
fn read_missing_file() {
    let cache = Cache::new(CacheConfig::new(MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(4 * KB);

    assert!(matches!(
        cache.read("/no/such/file.bin", &mut buf),
        Err(CacheError::NotFound)
    ));
    let stats = cache.stats();
    assert_eq!(stats.accesses, 1);
    assert_eq!(stats.fails, 1);

    cache.destroy();
}

#[test]
fn zero_length_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("empty.bin");
    fs::write(&file, b"").unwrap();

    let cache = Cache::new(CacheConfig::new(MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(4 * KB);

    assert!(matches!(
        cache.read(path_str(&file), &mut buf),
        Err(CacheError::Invalid)
    ));
    assert_eq!(cache.stats().fails, 1);

    cache.destroy();
}

#[test]
fn file_larger_than_buffer_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "big.bin", 64 * KB, 9);

    let cache = Cache::new(CacheConfig::new(MB as u64)).unwrap();
    let mut buf = AlignedBuf::new(4 * KB);

    assert!(matches!(
        cache.read(path_str(&file), &mut buf),
        Err(CacheError::Invalid)
    ));

    cache.destroy();
}

#[test]
fn counters_sum_to_accesses() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(CacheConfig::new(4 * KB as u64).avg_item_size(KB as u64)).unwrap();
    let mut buf = AlignedBuf::new(8 * KB);

    let small = write_file(dir.path(), "small.bin", 2 * KB, 1);
    let large = write_file(dir.path(), "large.bin", 3 * KB, 2);

    cache.read(path_str(&small), &mut buf).unwrap(); // cold
    cache.read(path_str(&small), &mut buf).unwrap(); // hit
    cache.read(path_str(&large), &mut buf).unwrap(); // capacity miss
    cache.read(path_str(&large), &mut buf).unwrap(); // capacity miss
    let _ = cache.read("/missing.bin", &mut buf); // fail

    let stats = cache.stats();
    assert_eq!(
        stats.hits + stats.cold_misses + stats.capacity_misses + stats.fails,
        stats.accesses
    );
    assert_eq!(stats.accesses, 5);

    cache.destroy();
}

#[test]
fn concurrent_disjoint_reads() {
    let dir = tempfile::tempdir().unwrap();
    let n_threads = 4;
    let files_per_thread = 8;
    let passes = 3;

    let files: Vec<Vec<PathBuf>> = (0..n_threads)
        .map(|t| {
            (0..files_per_thread)
                .map(|i| write_file(dir.path(), &format!("t{t}-f{i}.bin"), 4 * KB, (t * 16 + i) as u8))
                .collect()
        })
        .collect();

    let cache = Arc::new(
        Cache::new(CacheConfig::new(MB as u64).avg_item_size(4 * KB as u64)).unwrap(),
    );

    let handles: Vec<_> = files
        .into_iter()
        .map(|paths| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                let mut buf = AlignedBuf::new(8 * KB);
                for _ in 0..passes {
                    for path in &paths {
                        let expected = fs::read(path).unwrap();
                        let n = cache.read(path_str(path), &mut buf).unwrap();
                        assert_eq!(n, expected.len());
                        assert_eq!(&buf[..n], &expected[..]);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let stats = cache.stats();
    let distinct = (n_threads * files_per_thread) as u64;
    assert_eq!(stats.accesses, distinct * passes as u64);
    assert_eq!(stats.cold_misses, distinct);
    assert!(stats.hits >= stats.accesses - distinct);
    assert_eq!(
        stats.hits + stats.cold_misses + stats.capacity_misses + stats.fails,
        stats.accesses
    );

    match Arc::try_unwrap(cache) {
        Ok(cache) => cache.destroy(),
        Err(_) => panic!("cache still shared"),
    }
}

#[test]
fn concurrent_hot_reads_same_key() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_file(dir.path(), "shared.bin", 32 * KB, 3);
    let expected = fs::read(&file).unwrap();

    let cache = Arc::new(Cache::new(CacheConfig::new(MB as u64)).unwrap());

    // Admit once before any concurrency; first-read races on the same
    // key are outside the contract.
    let mut buf = AlignedBuf::new(64 * KB);
    cache.read(path_str(&file), &mut buf).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let path = file.clone();
            let expected = expected.clone();
            thread::spawn(move || {
                let mut buf = AlignedBuf::new(64 * KB);
                for _ in 0..50 {
                    let n = cache.read(path_str(&path), &mut buf).unwrap();
                    assert_eq!(n, expected.len());
                    assert_eq!(&buf[..n], &expected[..]);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.hits, 200); // one cold miss, every later read hits
    assert_eq!(stats.cold_misses, 1);

    match Arc::try_unwrap(cache) {
        Ok(cache) => cache.destroy(),
        Err(_) => panic!("cache still shared"),
    }
}
