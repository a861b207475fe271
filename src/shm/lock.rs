/// Cross-process spinlock stored in shared memory.
///
/// The lock is a single `AtomicU32` so it can be embedded directly in
/// mapped regions; a zeroed mapping is an array of unlocked locks, so
/// freshly allocated shared memory needs no init pass. All critical
/// sections in this crate are short (a directory probe or a payload
/// map/unmap), which is the design assumption a spinlock depends on.
use std::sync::atomic::{AtomicU32, Ordering};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A short-critical-section lock valid in any process that maps its
/// storage.
#[repr(C)]
pub struct SpinLock {
    state: AtomicU32,
}

const _: () = assert!(std::mem::size_of::<SpinLock>() == 4);

impl SpinLock {
    pub const fn new() -> Self {
        SpinLock {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// Acquire the lock, spinning until it is free.
    pub fn lock(&self) -> SpinGuard<'_> {
        loop {
            if self
                .state
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinGuard { lock: self };
            }
            while self.state.load(Ordering::Relaxed) == LOCKED {
                std::hint::spin_loop();
            }
        }
    }

    fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the lock on drop.
pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
