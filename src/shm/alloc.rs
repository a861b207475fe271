/// Shared anonymous allocator.
///
/// Every long-lived cache structure is backed by memory from here: an
/// anonymous, shared, prefaulted, page-locked mapping. Shared anonymous
/// memory is what makes fork-based data-loader parallelism coherent —
/// a child's writes land in the same physical pages the parent and all
/// siblings see. Page-locking keeps cached data from being paged out
/// under memory pressure.
use std::io;
use std::ptr::NonNull;

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int = libc::MAP_ANONYMOUS | libc::MAP_SHARED | libc::MAP_POPULATE;

// MAP_POPULATE is Linux-only; other Unixes fault the pages in on the
// mlock below.
#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_ANON | libc::MAP_SHARED;

/// Allocate `size` bytes of fork-shared, page-locked, zero-filled
/// memory.
///
/// A failure to lock the pages releases the provisional mapping and is
/// reported as an error; a cache that can be paged out is slower than
/// the storage it fronts.
pub fn alloc(size: usize) -> io::Result<NonNull<u8>> {
    debug_assert!(size > 0);

    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            MAP_FLAGS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::mlock(ptr, size) } != 0 {
        let err = io::Error::last_os_error();
        unsafe { libc::munmap(ptr, size) };
        return Err(err);
    }

    // mmap never returns null on success.
    Ok(unsafe { NonNull::new_unchecked(ptr.cast::<u8>()) })
}

/// Release a region obtained from [`alloc`].
///
/// # Safety
/// `ptr` and `size` must name a live allocation from [`alloc`], and no
/// process may touch the region afterwards.
pub unsafe fn free(ptr: NonNull<u8>, size: usize) {
    libc::munmap(ptr.as_ptr().cast(), size);
}
