//! Open files and byte-addressed I/O. One `OpenFile` record in the
//! shared table is claimed per open/creat; per-process descriptors are
//! small indices into the process's own slot table, each naming one
//! record.

use core::sync::atomic::{Ordering, fence};

use crate::config::*;
use crate::directory::wdir;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::{block_data_addr, block_ptr_slot, current_time, ialloc, ilock, itrunc, iunlock};
use crate::path::{Intent, NameiData, last_component, namei};
use crate::structs::{DirEnt, FREAD, FWRITE, FileMode, Inode, OpenFlags, Whence};

/// Permission hook. Always permits; kept so the call sites stay where a
/// real check would go.
pub(crate) fn access_ok(_ip: *mut Inode, _mode: FileMode) -> bool {
    true
}

fn access_bits(flags: OpenFlags) -> u8 {
    if flags.contains(OpenFlags::RDWR) {
        FREAD | FWRITE
    } else if flags.contains(OpenFlags::WRONLY) {
        FWRITE
    } else {
        FREAD
    }
}

pub(crate) fn open(fs: &FileSystem, path: &str, flags: OpenFlags, mode: FileMode) -> Result<usize> {
    let mut nd = NameiData::new();
    match namei(fs, path, Intent::Search, &mut nd) {
        Ok(ip) => {
            if !nd.parent.is_null() {
                iunlock(nd.parent);
            }
            open1(fs, ip, access_bits(flags), flags)
        }
        Err(e) => {
            if flags.contains(OpenFlags::CREAT) {
                creat(fs, path, mode)
            } else {
                Err(e)
            }
        }
    }
}

/// Create a regular file and open it for write, truncated.
pub(crate) fn creat(fs: &FileSystem, path: &str, mode: FileMode) -> Result<usize> {
    if mode.contains(FileMode::DIR) {
        return Err(FsError::InvalidArgument);
    }

    let mut nd = NameiData::new();
    let parent = namei(fs, path, Intent::Create, &mut nd)?;
    if !nd.parent.is_null() {
        iunlock(nd.parent); // the grandparent is not touched
    }

    let name = match last_component(path.as_bytes(), nd.cursor, false) {
        Ok(n) => n,
        Err(e) => {
            iunlock(parent);
            return Err(e);
        }
    };

    let new_ip = match ialloc(fs) {
        Ok(ip) => ip,
        Err(e) => {
            iunlock(parent);
            return Err(e);
        }
    };

    unsafe {
        (*new_ip).i_mode = mode.bits();
        (*new_ip).i_uid = fs.uid();
        (*new_ip).i_gid = fs.gid();
        (*new_ip).i_mtime = current_time();

        ilock(new_ip, fs.pid); // lock it before linking it into the parent
        wdir(fs, parent, name, (*new_ip).i_number);
        (*parent).i_mtime = current_time();
        iunlock(parent);
    }

    open1(fs, new_ip, FWRITE, OpenFlags::TRUNC)
}

/// Common code for open and creat. Caller holds the inode lock, which is
/// released on every path out.
pub(crate) fn open1(fs: &FileSystem, ip: *mut Inode, rw: u8, flags: OpenFlags) -> Result<usize> {
    unsafe {
        if rw & FREAD != 0 && !access_ok(ip, FileMode::RUSR) {
            iunlock(ip);
            return Err(FsError::AccessDenied);
        }
        if rw & FWRITE != 0 && !access_ok(ip, FileMode::WUSR) {
            iunlock(ip);
            return Err(FsError::AccessDenied);
        }
        if flags.contains(OpenFlags::TRUNC) {
            if rw & FWRITE == 0 {
                iunlock(ip);
                return Err(FsError::AccessDenied);
            }
            itrunc(fs, ip);
        }

        let fid = match falloc(fs) {
            Ok(f) => f,
            Err(e) => {
                iunlock(ip);
                return Err(e);
            }
        };
        let fp = fs.region.file(fid);
        (*fp).lock.lock(fs.pid);

        let mut rw = rw;
        let offset;
        if flags.contains(OpenFlags::APPEND) {
            if !access_ok(ip, FileMode::WUSR) {
                (*fp).f_count = 0;
                (*fp).lock.unlock();
                iunlock(ip);
                return Err(FsError::AccessDenied);
            }
            offset = (*ip).i_size1;
            rw |= FWRITE;
        } else {
            offset = 0;
        }

        let ufd = match ufalloc(fs) {
            Ok(u) => u,
            Err(e) => {
                (*fp).f_count = 0;
                (*fp).lock.unlock();
                iunlock(ip);
                return Err(e);
            }
        };

        (*fp).f_flag = rw & (FREAD | FWRITE);
        (*fp).f_inode = fs.region.rel(ip as *const u8);
        (*fp).f_offset = offset;
        (*fs.ctx()).ofile[ufd] = Some(fid as u32);

        (*fp).lock.unlock();
        iunlock(ip);
        Ok(ufd)
    }
}

/// Claim a free record in the shared open-file table.
fn falloc(fs: &FileSystem) -> Result<usize> {
    let sup = fs.region.sup();
    sup.filelist_lock.lock(fs.pid);
    for i in 0..NFILE {
        let fp = fs.region.file(i);
        unsafe {
            if (*fp).f_count == 0 {
                (*fp).f_count = 1;
                sup.filelist_lock.unlock();
                return Ok(i);
            }
        }
    }
    sup.filelist_lock.unlock();
    Err(FsError::OutOfFiles)
}

/// Find a free descriptor slot in the process's table.
fn ufalloc(fs: &FileSystem) -> Result<usize> {
    unsafe {
        let ctx = fs.ctx();
        (*ctx).lock.lock(fs.pid);
        for i in 0..NOFILE {
            if (*ctx).ofile[i].is_none() {
                (*ctx).lock.unlock();
                return Ok(i);
            }
        }
        (*ctx).lock.unlock();
        Err(FsError::OutOfFiles)
    }
}

pub(crate) fn validate_fd(fs: &FileSystem, fd: usize) -> Result<usize> {
    unsafe {
        if fd >= NOFILE {
            return Err(FsError::BadDescriptor);
        }
        match (*fs.ctx()).ofile[fd] {
            Some(fidx) => Ok(fidx as usize),
            None => Err(FsError::BadDescriptor),
        }
    }
}

pub(crate) fn close(fs: &FileSystem, fd: usize) -> Result<()> {
    let fidx = validate_fd(fs, fd)?;
    let fp = fs.region.file(fidx);
    unsafe {
        (*fp).lock.lock(fs.pid);
        (*fp).f_count -= 1;
        if (*fp).f_count == 0 {
            (*fp).f_offset = 0;
            (*fp).f_flag = 0;
            (*fp).f_inode = 0;
        }
        (*fs.ctx()).ofile[fd] = None;
        (*fp).lock.unlock();
    }
    Ok(())
}

/// Read up to `buf.len()` bytes at the descriptor's offset, clamped to
/// the remaining file size; the offset advances by the bytes copied.
pub(crate) fn read(fs: &FileSystem, fd: usize, buf: &mut [u8]) -> Result<usize> {
    let fidx = validate_fd(fs, fd)?;
    let fp = fs.region.file(fidx);
    unsafe {
        if (*fp).f_flag & FREAD == 0 {
            return Err(FsError::BadDescriptor);
        }
        let ip = fs.region.abs((*fp).f_inode) as *mut Inode;
        if (*ip).is_dir() {
            return Err(FsError::IsADirectory);
        }

        (*fp).lock.lock(fs.pid);
        ilock(ip, fs.pid);

        let fo = (*fp).f_offset as usize;
        let size = (*ip).i_size1 as usize;
        let mut count = buf.len();
        if fo + count > size {
            count = size.saturating_sub(fo);
        }

        let mut copied = 0usize;
        if count > 0 {
            // An unallocated first block is an empty file: read zero
            // bytes, allocate nothing.
            let slot = block_ptr_slot(fs, ip, (fo >> 9) as u32, false);
            if *slot != 0 {
                let head = fo & 0o777;
                if head != 0 {
                    // Up to the first block boundary.
                    let n = count.min(BLOCK_SIZE - head);
                    let block = fs.region.abs(*slot);
                    core::ptr::copy_nonoverlapping(block.add(head), buf.as_mut_ptr(), n);
                    copied += n;
                }
                // Whole blocks.
                while count - copied >= BLOCK_SIZE {
                    let bn = ((fo + copied) >> 9) as u32;
                    let slot = block_ptr_slot(fs, ip, bn, false);
                    assert!(*slot != 0);
                    core::ptr::copy_nonoverlapping(
                        fs.region.abs(*slot),
                        buf.as_mut_ptr().add(copied),
                        BLOCK_SIZE,
                    );
                    copied += BLOCK_SIZE;
                }
                // The remainder.
                if copied < count {
                    let remainder = count - copied;
                    debug_assert_eq!((fo + copied) & 0o777, 0);
                    let bn = ((fo + copied) >> 9) as u32;
                    let slot = block_ptr_slot(fs, ip, bn, false);
                    assert!(*slot != 0);
                    core::ptr::copy_nonoverlapping(
                        fs.region.abs(*slot),
                        buf.as_mut_ptr().add(copied),
                        remainder,
                    );
                    copied = count;
                }
            }
        }

        (*fp).f_offset += copied as u32;
        iunlock(ip);
        (*fp).lock.unlock();
        Ok(copied)
    }
}

/// Write `buf` at the descriptor's offset, allocating every block it
/// touches. After the copy a fence orders the data before the offset and
/// size updates, so a crash mid-write never exposes a size covering
/// unwritten bytes.
pub(crate) fn write(fs: &FileSystem, fd: usize, buf: &[u8]) -> Result<usize> {
    let fidx = validate_fd(fs, fd)?;
    let fp = fs.region.file(fidx);
    unsafe {
        if (*fp).f_flag & FWRITE == 0 {
            return Err(FsError::BadDescriptor);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        (*fp).lock.lock(fs.pid);
        let ip = fs.region.abs((*fp).f_inode) as *mut Inode;
        ilock(ip, fs.pid);

        let count = buf.len();
        let fo = (*fp).f_offset as usize;
        let mut copied = 0usize;
        let mut too_big = false;

        let head = fo & 0o777;
        if head != 0 {
            // Up to the first block boundary.
            let block = block_data_addr(fs, ip, (fo >> 9) as u32);
            let n = count.min(BLOCK_SIZE - head);
            core::ptr::copy_nonoverlapping(buf.as_ptr(), block.add(head), n);
            copied += n;
        }
        // Whole blocks.
        while count - copied >= BLOCK_SIZE {
            let bn = ((fo + copied) >> 9) as u32;
            if bn >= MAX_BLOCKS {
                too_big = true;
                break;
            }
            let block = block_data_addr(fs, ip, bn);
            core::ptr::copy_nonoverlapping(buf.as_ptr().add(copied), block, BLOCK_SIZE);
            copied += BLOCK_SIZE;
        }
        // The remainder.
        if !too_big && copied < count {
            debug_assert_eq!((fo + copied) & 0o777, 0);
            let bn = ((fo + copied) >> 9) as u32;
            if bn >= MAX_BLOCKS {
                too_big = true;
            } else {
                let block = block_data_addr(fs, ip, bn);
                core::ptr::copy_nonoverlapping(buf.as_ptr().add(copied), block, count - copied);
                copied = count;
            }
        }

        // Data first, then the fields that make it reachable.
        fence(Ordering::SeqCst);

        (*fp).f_offset = (fo + copied) as u32;
        if (*fp).f_offset > (*ip).i_size1 {
            (*ip).i_size1 = (*fp).f_offset;
        }
        (*ip).i_mtime = current_time();

        iunlock(ip);
        (*fp).lock.unlock();

        if too_big && copied == 0 {
            Err(FsError::FileTooBig)
        } else {
            Ok(copied)
        }
    }
}

/// Reposition the descriptor's offset. The result must stay inside
/// `[0, size]`; seeking past the end would create a hole, which is not
/// supported.
pub(crate) fn lseek(fs: &FileSystem, fd: usize, offset: i64, whence: Whence) -> Result<u64> {
    let fidx = validate_fd(fs, fd)?;
    let fp = fs.region.file(fidx);
    unsafe {
        (*fp).lock.lock(fs.pid);
        let ip = fs.region.abs((*fp).f_inode) as *const Inode;
        let size = (*ip).i_size1 as i64;
        let new = match whence {
            Whence::Set => offset,
            Whence::Cur => offset + (*fp).f_offset as i64,
            Whence::End => {
                if offset > 0 {
                    (*fp).lock.unlock();
                    return Err(FsError::Overflow);
                }
                size + offset
            }
        };
        if new < 0 || new > size {
            (*fp).lock.unlock();
            return Err(FsError::Overflow);
        }
        (*fp).f_offset = new as u32;
        (*fp).lock.unlock();
        Ok(new as u64)
    }
}

/// Open a directory for reading entries; just a descriptor underneath.
pub(crate) fn opendir(fs: &FileSystem, path: &str) -> Result<usize> {
    let mut nd = NameiData::new();
    let ip = namei(fs, path, Intent::Search, &mut nd)?;
    if !nd.parent.is_null() {
        iunlock(nd.parent);
    }
    unsafe {
        if !(*ip).is_dir() {
            iunlock(ip);
            return Err(FsError::NotADirectory);
        }
    }
    open1(fs, ip, FREAD, OpenFlags::empty())
}

/// Next live entry of the directory, skipping deleted slots.
pub(crate) fn readdir(fs: &FileSystem, fd: usize) -> Result<DirEnt> {
    let fidx = validate_fd(fs, fd)?;
    let fp = fs.region.file(fidx);
    unsafe {
        if (*fp).f_flag & FREAD == 0 {
            return Err(FsError::BadDescriptor);
        }
        let ip = fs.region.abs((*fp).f_inode) as *mut Inode;
        assert!((*ip).is_dir());

        ilock(ip, fs.pid);
        (*fp).lock.lock(fs.pid);
        loop {
            if (*fp).f_offset >= (*ip).i_size1 {
                (*fp).lock.unlock();
                iunlock(ip);
                return Err(FsError::EndOfDirectory);
            }
            let off = (*fp).f_offset as usize;
            (*fp).f_offset += DIRENT_SIZE as u32;

            let bn = (off >> 9) as u32;
            let slot = block_ptr_slot(fs, ip, bn, false);
            assert!(*slot != 0);
            let de = &*(fs.region.abs(*slot).add(off & 0o777) as *const DirEnt);
            if de.ino == 0 {
                continue; // deleted entry
            }
            let out = *de;
            (*fp).lock.unlock();
            iunlock(ip);
            return Ok(out);
        }
    }
}
