//! Free-block bitmap and the block allocator. The bit operations are
//! unsynchronized; every caller goes through the bitmap subsystem lock,
//! which is the single serialization point for block allocation across
//! the whole region.

use core::sync::atomic::Ordering;

use log::debug;

use crate::config::*;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::region::Region;
use crate::structs::RelPtr;

pub(crate) fn set_bit(map: *mut u8, b: u32) {
    debug_assert!((b as usize) < BMAP_BYTES * 8);
    unsafe {
        *map.add(b as usize / 8) |= 1 << (b % 8);
    }
}

pub(crate) fn clear_bit(map: *mut u8, b: u32) {
    debug_assert!((b as usize) < BMAP_BYTES * 8);
    unsafe {
        *map.add(b as usize / 8) &= !(1 << (b % 8));
    }
}

pub(crate) fn get_bit(map: *const u8, b: u32) -> bool {
    debug_assert!((b as usize) < BMAP_BYTES * 8);
    unsafe { *map.add(b as usize / 8) & (1 << (b % 8)) != 0 }
}

pub(crate) fn zero_block(bp: *mut u8) {
    unsafe {
        core::ptr::write_bytes(bp, 0, BLOCK_SIZE);
    }
}

/// Allocate a data block and return its index. The block is zero-filled;
/// callers never see allocator-supplied garbage.
///
/// Fast path: hand out the block under the monotone cursor while the
/// region has never wrapped. Recycled path: scan the bitmap from zero.
/// Last resort: grow the region through the memory provider and retry.
pub(crate) fn alloc_block(fs: &FileSystem) -> Result<u32> {
    let r = fs.region;
    let sup = r.sup();
    sup.bitmap_lock.lock(fs.pid);
    let map = r.freemap();

    let next = sup.next_block.load(Ordering::Relaxed);
    let nblocks = sup.nblocks();
    if next < nblocks {
        assert!(!get_bit(map, next), "cursor block {next} already allocated");
        zero_block(r.block_abs(next));
        set_bit(map, next);
        sup.next_block.store(next + 1, Ordering::Relaxed);
        sup.bitmap_lock.unlock();
        return Ok(next);
    }

    debug_assert_eq!(next, nblocks);

    for i in 0..nblocks {
        if !get_bit(map, i) {
            set_bit(map, i);
            zero_block(r.block_abs(i));
            sup.bitmap_lock.unlock();
            return Ok(i);
        }
    }

    // Out of blocks; ask the provider for more.
    let bytes = page_roundup(fs.next_alloc_size());
    debug!("region full at {nblocks} blocks, growing by {bytes} bytes");
    let brk = fs.provider.current_break();
    if brk != r.abs(sup.end_rel()) {
        panic!("region break has been moved by non-fs code");
    }
    let old = match fs.provider.extend(bytes) {
        Ok(p) => p,
        Err(_) => {
            sup.bitmap_lock.unlock();
            return Err(FsError::CannotGrow);
        }
    };
    debug_assert_eq!(old, brk);
    sup.nblocks
        .store(nblocks + (bytes / BLOCK_SIZE) as u32, Ordering::Relaxed);
    sup.end_rel
        .store(sup.end_rel() + bytes as u64, Ordering::Relaxed);

    let next = sup.next_block.load(Ordering::Relaxed);
    assert!(next < sup.nblocks());
    assert!(!get_bit(map, next), "cursor block {next} already allocated");
    zero_block(r.block_abs(next));
    set_bit(map, next);
    sup.next_block.store(next + 1, Ordering::Relaxed);
    sup.bitmap_lock.unlock();
    Ok(next)
}

/// Release the data block a relative pointer refers to. Caller holds the
/// bitmap lock. A clear bit here means the bitmap and some pointer chain
/// disagree, which is unrecoverable.
pub(crate) fn free_block(region: Region, map: *mut u8, rel: RelPtr) {
    let idx = region.block_index(rel);
    assert!(get_bit(map, idx), "freeing block {idx} whose bit is clear");
    clear_bit(map, idx);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bit_ops() {
        let mut buf = vec![0u8; 64];
        let map = buf.as_mut_ptr();
        assert!(!get_bit(map, 0));
        set_bit(map, 0);
        set_bit(map, 9);
        set_bit(map, 511);
        assert!(get_bit(map, 0));
        assert!(get_bit(map, 9));
        assert!(get_bit(map, 511));
        assert!(!get_bit(map, 10));
        clear_bit(map, 9);
        assert!(!get_bit(map, 9));
        assert!(get_bit(map, 0));
        assert_eq!(buf[0], 1);
    }
}
