//! Direct-I/O file access for the miss path.
//!
//! Cold misses read the backing file with the page cache bypassed: the
//! cache's own locked memory is the caching tier, and double-buffering
//! through the kernel wastes exactly the RAM the cache was sized to
//! own. `O_DIRECT` requires block-aligned buffers and request lengths;
//! [`AlignedBuf`] covers the former and [`read_sized`] the latter. On
//! filesystems without direct I/O support the open silently degrades
//! to buffered reads with identical observable behavior.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::ptr::NonNull;

use crate::config::BLOCK_SIZE;

/// Round a length up to the next block-size multiple.
pub fn round_up(len: usize) -> usize {
    (len + BLOCK_SIZE - 1) & !(BLOCK_SIZE - 1)
}

/// Open `path` for reading with the page cache bypassed where the
/// platform allows it.
pub fn open_direct(path: &Path) -> io::Result<File> {
    let file = File::open(path)?;
    apply_direct_io_flags(&file);
    Ok(file)
}

#[cfg(target_os = "linux")]
fn apply_direct_io_flags(file: &File) {
    use std::os::unix::io::AsRawFd;

    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        tracing::warn!("fcntl(F_GETFL) failed, using buffered i/o");
        return;
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_DIRECT) } == -1 {
        // tmpfs and some network filesystems reject O_DIRECT.
        tracing::warn!("O_DIRECT not supported on this filesystem, using buffered i/o");
    }
}

#[cfg(target_os = "macos")]
fn apply_direct_io_flags(file: &File) {
    use std::os::unix::io::AsRawFd;

    // F_NOCACHE turns off data caching for the fd; unlike O_DIRECT it
    // does not impose alignment on its own.
    let fd = file.as_raw_fd();
    if unsafe { libc::fcntl(fd, libc::F_NOCACHE, 1) } == -1 {
        tracing::warn!("F_NOCACHE not supported, using buffered i/o");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn apply_direct_io_flags(_file: &File) {}

/// Determine the file size by seeking to the end, then rewind.
pub fn file_size(file: &mut File) -> io::Result<u64> {
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(size)
}

/// Read the first `size` bytes of `file` into `buf`.
///
/// The request is issued for `size` rounded up to the block size (a
/// direct-I/O requirement); the tail past end-of-file comes back short,
/// so exactly `size` bytes land in `buf`. Short reads keep block
/// alignment, so the resume offsets stay direct-I/O legal.
pub fn read_sized(file: &mut File, buf: &mut [u8], size: usize) -> io::Result<()> {
    let want = round_up(size).min(buf.len());
    let mut got = 0;
    while got < size {
        let n = file.read(&mut buf[got..want])?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        got += n;
    }
    Ok(())
}

/// An owned byte buffer aligned to [`BLOCK_SIZE`].
///
/// `read` and `load` require block-aligned destination buffers;
/// `AlignedBuf::new` is the supported way to get one. The length is
/// rounded up to a block multiple so rounded-up read requests always
/// fit.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
}

impl AlignedBuf {
    /// Allocate a zeroed buffer of at least `len` bytes.
    ///
    /// # Panics
    /// Panics if `len` is 0 or the allocation fails.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "AlignedBuf length must be non-zero");
        let len = round_up(len);
        let layout = Layout::from_size_align(len, BLOCK_SIZE).expect("valid layout");
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        AlignedBuf { ptr, len }
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, BLOCK_SIZE).expect("valid layout");
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

// The buffer is plain owned bytes.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}
