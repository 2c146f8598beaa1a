#![allow(unused)]

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pion::{Error, FileSystem, InitMode, MemoryProvider, PAGE_SIZE, Result};

/// Fixed-capacity arena standing in for the process heap: a page-aligned
/// slab whose break only moves forward and never relocates. Exhausting
/// the capacity fails like a refused sbrk.
pub struct Arena {
    base: *mut u8,
    capacity: usize,
    brk: AtomicUsize, // offset from base
}

unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new(capacity: usize) -> Self {
        let layout = Layout::from_size_align(capacity, PAGE_SIZE).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null());
        Arena {
            base,
            capacity,
            brk: AtomicUsize::new(0),
        }
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity, PAGE_SIZE).unwrap();
        unsafe { dealloc(self.base, layout) };
    }
}

impl MemoryProvider for Arena {
    fn current_break(&self) -> *mut u8 {
        unsafe { self.base.add(self.brk.load(Ordering::Relaxed)) }
    }

    fn extend(&self, bytes: usize) -> Result<*mut u8> {
        let old = self.brk.load(Ordering::Relaxed);
        if old + bytes > self.capacity {
            return Err(Error::EnvironmentFailure);
        }
        self.brk.store(old + bytes, Ordering::Relaxed);
        Ok(unsafe { self.base.add(old) })
    }
}

/// Format a fresh file system over a new arena of `capacity` bytes.
pub fn fresh_fs(capacity: usize) -> (Arc<Arena>, FileSystem) {
    let arena = Arc::new(Arena::new(capacity));
    let base = arena.base();
    let fs = FileSystem::init(arena.clone(), base, InitMode::Format, None).unwrap();
    (arena, fs)
}
