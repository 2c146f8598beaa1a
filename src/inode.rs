//! Inode allocation, the multi-level block map, and truncation.
//!
//! Block numbers partition into four tiers: 0..12 resolve through the
//! direct pointer slots, then one singly, one doubly and one triply
//! indirect pointer block extend the range to [`MAX_BLOCKS`]. Pointer
//! blocks materialize lazily, and slots within one pointer block fill in
//! order, so a live slot implies every earlier slot is live too.

use core::sync::atomic::{Ordering, fence};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bitmap::{alloc_block, free_block};
use crate::config::*;
use crate::directory::wdir;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::structs::{FileMode, Inode, Metadata, RelPtr};

pub(crate) fn ilock(ip: *mut Inode, pid: u8) {
    unsafe {
        (*ip).lock.lock(pid);
    }
}

pub(crate) fn iunlock(ip: *mut Inode) {
    unsafe {
        (*ip).lock.unlock();
    }
}

pub(crate) fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Claim an unused inode by linear scan and re-initialize it. The
/// returned inode already has `i_nlink == 1` so no other scan can claim
/// it; its lock is re-biased toward the caller and left unlocked.
pub(crate) fn ialloc(fs: &FileSystem) -> Result<*mut Inode> {
    let r = fs.region;
    let sup = r.sup();
    sup.inodelist_lock.lock(fs.pid);
    // Inode 0 is not a valid number.
    for i in 1..NINODES as u16 {
        let ip = r.inode(i);
        unsafe {
            if (*ip).i_nlink == 0 {
                (*ip).lock.init(fs.pid);
                (*ip).i_nlink = 1;
                (*ip).i_number = i;
                (*ip).i_count = 0;
                (*ip).i_uid = 0;
                (*ip).i_gid = 0;
                (*ip).i_size1 = 0;
                (*ip).i_direntries = 0;
                (*ip).i_mtime = 0;
                for j in 0..15 {
                    assert!(
                        (*ip).i_addr[j] == 0,
                        "free inode {i} holds a live block pointer"
                    );
                }
                sup.inodelist_lock.unlock();
                return Ok(ip);
            }
        }
    }
    sup.inodelist_lock.unlock();
    Err(FsError::OutOfInodes)
}

/// Build the root directory. Must be the first allocation after
/// formatting so it lands on inode 1.
pub(crate) fn make_root(fs: &FileSystem) {
    let ip = ialloc(fs).expect("fresh region has no free inode");
    unsafe {
        assert_eq!((*ip).i_number, ROOT_INO);
        ilock(ip, fs.pid);
        (*ip).i_mode = FileMode::dir_default().bits();
        (*ip).i_uid = 0;
        (*ip).i_gid = 0;
        wdir(fs, ip, DOT, ROOT_INO);
        wdir(fs, ip, DOTDOT, ROOT_INO);
        (*ip).i_mtime = current_time();
        iunlock(ip);
    }
}

/// Address of the slot that records (or will record) the relative
/// pointer for block `bn` of this inode, descending the tier structure.
/// With `alloc` set, missing intermediate pointer blocks are materialized
/// (zero-filled, so all contained pointers start unallocated); the data
/// block itself is never allocated here. Without `alloc`, a missing
/// intermediate is structural damage.
///
/// Caller holds the inode lock.
pub(crate) fn block_ptr_slot(fs: &FileSystem, ip: *mut Inode, bn: u32, alloc: bool) -> *mut RelPtr {
    let addr = unsafe { (*ip).i_addr.as_mut_ptr() };

    let (mut slot, idxs, depth): (*mut RelPtr, [u32; 3], usize) = if bn < DIRECT_LIMIT {
        (unsafe { addr.add(bn as usize) }, [0; 3], 0)
    } else if bn < SINGLY_LIMIT {
        (unsafe { addr.add(12) }, [bn - DIRECT_LIMIT, 0, 0], 1)
    } else if bn < DOUBLY_LIMIT {
        let off = bn - SINGLY_LIMIT;
        (unsafe { addr.add(13) }, [off >> 6, off & 63, 0], 2)
    } else {
        assert!(bn < TRIPLY_LIMIT, "block number {bn} beyond the triply indirect tier");
        let off = bn - DOUBLY_LIMIT;
        (
            unsafe { addr.add(14) },
            [off >> 12, (off >> 6) & 63, off & 63],
            3,
        )
    };

    for &nth in idxs.iter().take(depth) {
        let block = descend(fs, slot, alloc);
        debug_assert!((nth as usize) < PTRS_PER_BLOCK);
        slot = unsafe { (block as *mut RelPtr).add(nth as usize) };
        unsafe {
            if alloc && *slot == 0 && nth != 0 {
                // Slots fill in order; an empty slot after a live one is a hole.
                assert!(
                    *(block as *mut RelPtr).add(nth as usize - 1) != 0,
                    "hole before slot {nth} in pointer block"
                );
            }
        }
    }
    slot
}

/// Follow one pointer slot down a level, materializing the pointer block
/// it names when allowed. Exhaustion here is unrecoverable: a write that
/// cannot grow the region has nowhere to put its bookkeeping.
fn descend(fs: &FileSystem, slot: *mut RelPtr, alloc: bool) -> *mut u8 {
    unsafe {
        if *slot == 0 {
            if !alloc {
                panic!("missing indirect block in pointer chain");
            }
            let idx = alloc_block(fs)
                .unwrap_or_else(|e| panic!("cannot allocate indirect block: {e}"));
            *slot = fs.region.block_rel(idx);
        }
        fs.region.abs(*slot)
    }
}

/// Absolute address of block `bn`'s data, allocating the data block if
/// the resolved slot is empty. Caller holds the inode lock.
pub(crate) fn block_data_addr(fs: &FileSystem, ip: *mut Inode, bn: u32) -> *mut u8 {
    let slot = block_ptr_slot(fs, ip, bn, true);
    unsafe {
        if *slot == 0 {
            let idx =
                alloc_block(fs).unwrap_or_else(|e| panic!("cannot allocate data block: {e}"));
            *slot = fs.region.block_rel(idx);
        }
        fs.region.abs(*slot)
    }
}

/// Fetch a directory data block for scanning. Caller holds the lock and
/// guarantees the block lies inside the directory's size.
pub(crate) fn dir_block(fs: &FileSystem, dp: *mut Inode, bn: u32) -> *mut u8 {
    unsafe {
        assert!((*dp).lock.is_locked());
    }
    let slot = block_ptr_slot(fs, dp, bn, false);
    unsafe {
        assert!(*slot != 0, "directory block {bn} not allocated");
        fs.region.abs(*slot)
    }
}

/// Free every block of the file and zero its pointer slots. No-op when
/// the size is already zero. Caller holds the inode lock.
///
/// The size is zeroed and fenced before any block is freed: a crash in
/// the middle leaves size 0 with a surviving pointer chain, which a
/// recovery pass completes by re-running this walk, instead of a stale
/// size describing freed blocks.
pub(crate) fn itrunc(fs: &FileSystem, ip: *mut Inode) {
    unsafe {
        if (*ip).i_size1 == 0 {
            return;
        }

        let r = fs.region;
        let sup = r.sup();
        sup.bitmap_lock.lock(fs.pid);
        let map = r.freemap();

        let mut nblocks = (*ip).i_size1 >> 9;
        if (*ip).i_size1 & 0o777 != 0 {
            nblocks += 1;
        }

        (*ip).i_size1 = 0;
        fence(Ordering::SeqCst);

        for i in 0..nblocks {
            let slot = block_ptr_slot(fs, ip, i, false);
            let rel = *slot;
            assert!(rel != 0, "hole at block {i} while truncating");
            free_block(r, map, rel);
            *slot = 0;
        }

        // The tier pointer blocks themselves, once the block count
        // crosses each threshold.
        if nblocks > DIRECT_LIMIT {
            let rel = (*ip).i_addr[12];
            assert!(rel != 0);
            free_block(r, map, rel);
            (*ip).i_addr[12] = 0;
        }

        if nblocks > SINGLY_LIMIT {
            let rel = (*ip).i_addr[13];
            assert!(rel != 0);
            let base = r.abs(rel) as *const RelPtr;
            for i in 0..PTRS_PER_BLOCK {
                let child = *base.add(i);
                if child == 0 {
                    break;
                }
                free_block(r, map, child);
            }
            free_block(r, map, rel);
            (*ip).i_addr[13] = 0;
        }

        if nblocks > DOUBLY_LIMIT {
            assert!(nblocks <= MAX_BLOCKS);
            let rel = (*ip).i_addr[14];
            assert!(rel != 0);
            let base = r.abs(rel) as *const RelPtr;
            for i in 0..PTRS_PER_BLOCK {
                let doubly = *base.add(i);
                if doubly == 0 {
                    break;
                }
                let dbase = r.abs(doubly) as *const RelPtr;
                for j in 0..PTRS_PER_BLOCK {
                    let singly = *dbase.add(j);
                    if singly == 0 {
                        break;
                    }
                    free_block(r, map, singly);
                }
                free_block(r, map, doubly);
            }
            free_block(r, map, rel);
            (*ip).i_addr[14] = 0;
        }

        sup.bitmap_lock.unlock();
    }
}

/// Common code for stat and fstat. Caller holds the lock.
pub(crate) fn stat_copy(ip: *const Inode) -> Metadata {
    unsafe {
        Metadata {
            ino: (*ip).i_number,
            mode: FileMode::from_bits_retain((*ip).i_mode),
            nlink: (*ip).i_nlink,
            uid: (*ip).i_uid,
            gid: (*ip).i_gid,
            size: (*ip).i_size1,
            mtime: (*ip).i_mtime,
        }
    }
}
