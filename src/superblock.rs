//! Format-time initialization of the region's metadata sections. All of
//! these assume the caller holds the superblock's global lock.

use core::sync::atomic::Ordering;

use crate::config::*;
use crate::region::{BLOCKS_OFF, Region};

/// Lay down the superblock for a fresh region of `total` bytes.
pub(crate) fn init_superblock(region: Region, total: usize, pid: u8) {
    let sup = region.sup();
    sup.magic.store(MAGIC, Ordering::Relaxed);
    sup.super_lock.store(0, Ordering::Relaxed);
    sup.filelist_lock.init(pid);
    sup.bitmap_lock.init(pid);
    sup.inodelist_lock.init(pid);
    sup.end_rel.store(total as u64, Ordering::Relaxed);
    // Data blocks only; the metadata sections are not allocatable.
    sup.nblocks
        .store(((total - BLOCKS_OFF) / BLOCK_SIZE) as u32, Ordering::Relaxed);
    sup.next_block.store(0, Ordering::Relaxed);
    sup.nproc.store(1, Ordering::Relaxed);
}

pub(crate) fn init_file_table(region: Region, pid: u8) {
    for i in 0..NFILE {
        let fp = region.file(i);
        unsafe {
            (*fp).lock.init(pid);
            (*fp).f_flag = 0;
            (*fp).f_count = 0;
            (*fp).f_inode = 0;
            (*fp).f_offset = 0;
        }
    }
}

pub(crate) fn init_freemap(region: Region) {
    unsafe {
        core::ptr::write_bytes(region.freemap(), 0, BMAP_BYTES);
    }
}

pub(crate) fn init_inodes(region: Region, pid: u8) {
    for i in 0..NINODES {
        let ip = region.inode(i as u16);
        unsafe {
            (*ip).lock.init(pid);
            (*ip).i_count = 0;
            (*ip).i_number = 0;
            (*ip).i_mode = 0;
            (*ip).i_nlink = 0;
            (*ip).i_uid = 0;
            (*ip).i_gid = 0;
            (*ip).i_size1 = 0;
            (*ip).i_direntries = 0;
            (*ip).i_mtime = 0;
            (*ip).i_addr = [0; 15];
        }
    }
}
