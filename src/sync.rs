//! Biased locking. Every lock in the region records the attachment id of
//! the process that initialized it; as long as no other process has ever
//! touched the lock, acquire and release are plain flag flips. The first
//! observed mismatch sets a sticky contention bit and routes the lock
//! through a compare-and-swap spin path from then on, permanently.

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use log::warn;

const CONTENDED: u8 = 0x01;

/// In-region biased mutex. The owner byte never changes after
/// initialization; only the fast/slow dispatch does.
#[repr(C)]
pub struct BiasedMutex {
    owner: AtomicU8,
    contention: AtomicU8,
    _pad: [u8; 2],
    word: AtomicU32,
}

impl BiasedMutex {
    pub const fn new(pid: u8) -> Self {
        Self {
            owner: AtomicU8::new(pid),
            contention: AtomicU8::new(0),
            _pad: [0; 2],
            word: AtomicU32::new(0),
        }
    }

    /// Re-initialize in place, biased toward `pid`.
    pub fn init(&self, pid: u8) {
        self.owner.store(pid, Ordering::Relaxed);
        self.contention.store(0, Ordering::Relaxed);
        self.word.store(0, Ordering::Release);
    }

    pub fn lock(&self, pid: u8) {
        if self.contention.load(Ordering::Relaxed) & CONTENDED == 0 {
            if self.owner.load(Ordering::Relaxed) == pid {
                // Owner bypass: a plain store, valid only while no other
                // process has ever contended this lock.
                self.word.store(1, Ordering::Relaxed);
                return;
            }
            warn!("biased lock: first contention, reverting to cas forever");
            self.contention.fetch_or(CONTENDED, Ordering::SeqCst);
        }

        spin_lock(&self.word);
    }

    pub fn unlock(&self) {
        self.word.store(0, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Relaxed) != 0
    }

    pub fn is_contended(&self) -> bool {
        self.contention.load(Ordering::Relaxed) & CONTENDED != 0
    }
}

/// Unbiased spin acquire. Waiting is a pure spin; the holder of the
/// biased fast path releases with the same plain store this watches.
pub fn spin_lock(word: &AtomicU32) {
    loop {
        while word.load(Ordering::Relaxed) != 0 {
            core::hint::spin_loop();
        }
        if word
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

pub fn spin_unlock(word: &AtomicU32) {
    word.store(0, Ordering::Release);
}
