/// Named payload segments.
///
/// Each admitted file owns one POSIX shared-memory object holding its
/// bytes, created by the admitting worker and opened read-only by
/// everyone else. Per-entry segments let the OS materialize pages
/// lazily instead of committing the full cache budget up front; the
/// cost is an fd and a global name per entry. The cache assumes naming
/// authority over its derived names for its lifetime.
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::{FromRawFd, RawFd};
use std::ptr::NonNull;

/// Derive the segment name for a path: `/` followed by the path with
/// every `/` replaced by `_`.
pub fn derive_name(path: &[u8]) -> Vec<u8> {
    let mut name = Vec::with_capacity(path.len() + 1);
    name.push(b'/');
    name.extend(path.iter().map(|&b| if b == b'/' { b'_' } else { b }));
    name
}

fn name_cstr(name: &[u8]) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))
}

fn shm_open(name: &CString, oflag: libc::c_int) -> libc::c_int {
    #[cfg(target_os = "macos")]
    unsafe {
        libc::shm_open(name.as_ptr(), oflag, 0o600 as libc::c_uint)
    }
    #[cfg(not(target_os = "macos"))]
    unsafe {
        libc::shm_open(name.as_ptr(), oflag, 0o600 as libc::mode_t)
    }
}

/// Create a segment of `size` bytes and map it read-write.
///
/// Returns the owning fd and the mapped address; both stay live until
/// flush or destroy tears the entry down. A stale segment left by a
/// crashed run under the same name is reused and truncated.
pub fn create(name: &[u8], size: u64) -> io::Result<(RawFd, NonNull<u8>)> {
    let cname = name_cstr(name)?;

    let fd = shm_open(&cname, libc::O_CREAT | libc::O_RDWR);
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
            libc::shm_unlink(cname.as_ptr());
        }
        return Err(err);
    }

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
            libc::shm_unlink(cname.as_ptr());
        }
        return Err(err);
    }

    Ok((fd, unsafe { NonNull::new_unchecked(addr.cast::<u8>()) }))
}

/// Open an existing segment read-only.
///
/// The returned `File` owns the descriptor; map it with `memmap2` and
/// let both drop when the copy is done.
pub fn open_ro(name: &[u8]) -> io::Result<File> {
    let cname = name_cstr(name)?;
    let fd = shm_open(&cname, libc::O_RDONLY);
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Remove the segment name. Existing mappings stay valid until
/// unmapped.
pub fn unlink(name: &[u8]) {
    if let Ok(cname) = name_cstr(name) {
        unsafe { libc::shm_unlink(cname.as_ptr()) };
    }
}

/// Unmap an admitting-process mapping produced by [`create`].
///
/// # Safety
/// `addr` and `size` must describe a live mapping from [`create`] in
/// this process, with no outstanding references into it.
pub unsafe fn unmap(addr: u64, size: u64) {
    libc::munmap(addr as *mut libc::c_void, size as usize);
}
