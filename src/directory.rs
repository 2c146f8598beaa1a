//! Directory mutation and the namespace operations built on `namei`.
//! Every multi-field update follows the soft-update discipline: the
//! store that makes a change visible (an entry's inode number, a link
//! count) is separated from its preparation by an explicit fence, in an
//! order a crash-recovery pass could complete or undo.

use core::sync::atomic::{Ordering, fence};

use crate::bitmap::alloc_block;
use crate::config::*;
use crate::error::{FsError, Result};
use crate::file::access_ok;
use crate::fs::FileSystem;
use crate::inode::{block_ptr_slot, current_time, ialloc, ilock, itrunc, iunlock};
use crate::path::{Intent, NameiData, is_prefix, last_component, namei};
use crate::structs::{DirEnt, FileMode, Inode};

/// Append the entry `{ino, name}` to the directory. The name is copied
/// and null-padded first, the inode number is stored only after a fence:
/// a torn append must never pair a live number with a half-written name.
/// Size and live-entry count move last.
///
/// Caller holds the lock, except for a fresh inode not yet linked in.
pub(crate) fn wdir(fs: &FileSystem, ip: *mut Inode, name: &[u8], ino: u16) {
    unsafe {
        let offset = ((*ip).i_size1 & 0o777) as usize;
        let bn = (*ip).i_size1 >> 9;

        let slot = block_ptr_slot(fs, ip, bn, true);
        if offset == 0 {
            // Appending on a block boundary opens a fresh block.
            let idx = alloc_block(fs)
                .unwrap_or_else(|e| panic!("cannot allocate directory block: {e}"));
            assert!(*slot == 0);
            *slot = fs.region.block_rel(idx);
        }

        debug_assert_eq!((*ip).i_size1 as usize % DIRENT_SIZE, 0);
        let de = fs.region.abs(*slot).add(offset) as *mut DirEnt;

        let mut i = 0;
        while i < name.len() && i < NAME_LEN && name[i] != b'/' {
            (*de).name[i] = name[i];
            i += 1;
        }
        while i < NAME_LEN {
            (*de).name[i] = 0;
            i += 1;
        }
        fence(Ordering::SeqCst);
        (*de).ino = ino;

        (*ip).i_size1 += DIRENT_SIZE as u32;
        (*ip).i_direntries += 1;
    }
}

pub(crate) fn mkdir(fs: &FileSystem, path: &str, _mode: FileMode) -> Result<()> {
    let mut nd = NameiData::new();
    let parent = namei(fs, path, Intent::Create, &mut nd)?;
    if !nd.parent.is_null() {
        iunlock(nd.parent); // the grandparent is not touched
    }

    let name = match last_component(path.as_bytes(), nd.cursor, true) {
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
        // Directories get a fixed mode; the caller's is recorded nowhere.
        (*new_ip).i_mode = FileMode::dir_default().bits();
        (*new_ip).i_uid = fs.uid();
        (*new_ip).i_gid = fs.gid();

        // "." and ".." first; wdir allocates the block.
        wdir(fs, new_ip, DOT, (*new_ip).i_number);
        wdir(fs, new_ip, DOTDOT, (*parent).i_number);
        let now = current_time();
        (*new_ip).i_mtime = now;

        wdir(fs, parent, name, (*new_ip).i_number);
        (*parent).i_mtime = now;
    }
    iunlock(parent);
    Ok(())
}

/// Delete a name and, when the link count hits zero, the file behind it.
/// Does not recurse into anything.
pub(crate) fn unlink(fs: &FileSystem, path: &str) -> Result<()> {
    let mut nd = NameiData::new();
    let ip = namei(fs, path, Intent::Delete, &mut nd)?;
    unsafe {
        if (*ip).is_dir() {
            return unwind(&nd, ip, FsError::IsADirectory);
        }
        if !access_ok(ip, FileMode::WUSR) {
            return unwind(&nd, ip, FsError::AccessDenied);
        }
        remove_entry(fs, ip, &nd);
    }
    Ok(())
}

pub(crate) fn rmdir(fs: &FileSystem, path: &str) -> Result<()> {
    let mut nd = NameiData::new();
    let ip = namei(fs, path, Intent::Delete, &mut nd)?;
    unsafe {
        if !(*ip).is_dir() {
            return unwind(&nd, ip, FsError::NotADirectory);
        }
        if (*ip).i_direntries > 2 {
            // More than "." and "..".
            return unwind(&nd, ip, FsError::DirectoryNotEmpty);
        }
        if !access_ok(ip, FileMode::WUSR) {
            return unwind(&nd, ip, FsError::AccessDenied);
        }
        remove_entry(fs, ip, &nd);
    }
    Ok(())
}

/// Common tail of unlink and rmdir: zero the entry in place (the slot is
/// never reclaimed, only the live count drops), fence, then drop the
/// link and truncate at zero.
unsafe fn remove_entry(fs: &FileSystem, ip: *mut Inode, nd: &NameiData) {
    unsafe {
        assert!(!nd.parent.is_null());
        assert_eq!((*nd.dirent).ino, (*ip).i_number);
        (*nd.dirent).ino = 0;
        (*nd.parent).i_direntries -= 1;
        (*nd.parent).i_mtime = current_time();
        fence(Ordering::SeqCst);

        // Note: the parent's i_size1 stays as it was.
        (*ip).i_nlink -= 1;
        if (*ip).i_nlink == 0 {
            itrunc(fs, ip);
        }
        iunlock(nd.parent);
        iunlock(ip);
    }
}

fn unwind(nd: &NameiData, ip: *mut Inode, e: FsError) -> Result<()> {
    if !nd.parent.is_null() {
        iunlock(nd.parent);
    }
    iunlock(ip);
    Err(e)
}

/// Create a hard link `newpath` to the existing file `oldpath`.
pub(crate) fn link(fs: &FileSystem, oldpath: &str, newpath: &str) -> Result<()> {
    let mut od = NameiData::new();
    let ip = namei(fs, oldpath, Intent::Search, &mut od)?;
    unsafe {
        if !od.parent.is_null() {
            iunlock(od.parent); // oldpath's parent is not touched
        }
        if (*ip).i_nlink >= MAX_LINKS {
            iunlock(ip);
            return Err(FsError::TooManyLinks);
        }
        if (*ip).is_dir() {
            iunlock(ip);
            return Err(FsError::IsADirectory);
        }
        // Unlock before resolving newpath, in case oldpath is a prefix
        // of it.
        iunlock(ip);

        let mut nd = NameiData::new();
        let parent = namei(fs, newpath, Intent::Create, &mut nd)?;
        // newpath's directory and its parent are locked. Relocking the
        // old inode cannot double-lock: it is not a directory.
        assert!(ip != parent);
        assert!(ip != nd.parent);
        ilock(ip, fs.pid);
        if !nd.parent.is_null() {
            iunlock(nd.parent);
        }

        let name = match last_component(newpath.as_bytes(), nd.cursor, true) {
            Ok(n) => n,
            Err(e) => {
                iunlock(parent);
                iunlock(ip);
                return Err(e);
            }
        };

        // Count first: a crash before the entry lands leaves an excess
        // link count, which recovery can decrement, never a dangling
        // entry.
        (*ip).i_nlink += 1;
        fence(Ordering::SeqCst);

        wdir(fs, parent, name, (*ip).i_number);
        (*parent).i_mtime = current_time();

        iunlock(parent);
        iunlock(ip);
    }
    Ok(())
}

pub(crate) fn rename(fs: &FileSystem, oldpath: &str, newpath: &str) -> Result<()> {
    let mut od = NameiData::new();
    let oldip = namei(fs, oldpath, Intent::Delete, &mut od)?;
    unsafe {
        if (*oldip).i_nlink >= MAX_LINKS {
            if !od.parent.is_null() {
                iunlock(od.parent);
            }
            iunlock(oldip);
            return Err(FsError::TooManyLinks);
        }

        // Release both: the new-path walk may pass through them.
        if !od.parent.is_null() {
            iunlock(od.parent);
        }
        iunlock(oldip);

        let mut nd = NameiData::new();
        match namei(fs, newpath, Intent::Create, &mut nd) {
            Ok(np) => rename_into(fs, newpath, oldip, &od, np, &nd),
            Err(FsError::AlreadyExists) => rename_replace(fs, newpath, oldip, &od),
            // Nothing is locked on a failed walk.
            Err(e) => Err(e),
        }
    }
}

/// The destination does not exist: write the new entry, then clear the
/// old one.
unsafe fn rename_into(
    fs: &FileSystem,
    newpath: &str,
    oldip: *mut Inode,
    od: &NameiData,
    np: *mut Inode,
    nd: &NameiData,
) -> Result<()> {
    unsafe {
        // np is the directory that will contain newpath, locked.
        if !nd.parent.is_null() {
            iunlock(nd.parent);
        }

        // A directory must not move under itself: /1/2 -> /1/2/3.
        if (*oldip).is_dir() && is_prefix(fs, oldip, np) {
            iunlock(np);
            return Err(FsError::InvalidArgument);
        }

        // Relock the old side. np survived the prefix test, so neither
        // oldip nor its parent can be np — except the parent itself,
        // when the rename stays within one directory.
        assert!(np != oldip);
        assert!(!od.parent.is_null());
        ilock(oldip, fs.pid);
        if np != od.parent {
            ilock(od.parent, fs.pid);
        }

        assert_eq!((*od.dirent).ino, (*oldip).i_number);
        let name = match last_component(newpath.as_bytes(), nd.cursor, true) {
            Ok(n) => n,
            Err(e) => {
                if np != od.parent {
                    iunlock(od.parent);
                }
                iunlock(oldip);
                iunlock(np);
                return Err(e);
            }
        };

        wdir(fs, np, name, (*oldip).i_number);
        (*np).i_mtime = current_time();

        // The new entry is in place before the old one goes: a crash in
        // between leaves two names for the inode, never zero.
        fence(Ordering::SeqCst);

        (*od.dirent).ino = 0;
        (*od.parent).i_direntries -= 1;

        // And the removal settles before the timestamp, so recovery can
        // use mtime to decide which of two surviving entries to keep.
        fence(Ordering::SeqCst);

        (*od.parent).i_mtime = current_time();

        if np != od.parent {
            iunlock(od.parent);
        }
        iunlock(oldip);
        iunlock(np);
        Ok(())
    }
}

/// The destination exists: repoint its entry at the source inode and
/// drop the displaced inode's link.
unsafe fn rename_replace(
    fs: &FileSystem,
    newpath: &str,
    oldip: *mut Inode,
    od: &NameiData,
) -> Result<()> {
    unsafe {
        let mut nd = NameiData::new();
        let np = match namei(fs, newpath, Intent::Search, &mut nd) {
            Ok(np) => np,
            Err(_) => panic!("rename: {newpath} existed on the first walk but vanished"),
        };

        if (*np).i_number == (*oldip).i_number {
            // Same file; do nothing.
            iunlock(np);
            if !nd.parent.is_null() {
                iunlock(nd.parent);
            }
            return Ok(());
        }

        ilock(oldip, fs.pid);
        assert!(!od.parent.is_null());
        ilock(od.parent, fs.pid);

        let mut err = None;
        if (*np).is_dir() {
            if (*np).i_direntries > 2 {
                err = Some(FsError::DirectoryNotEmpty);
            } else if !(*oldip).is_dir() {
                err = Some(FsError::IsADirectory);
            } else if is_prefix(fs, oldip, np) {
                err = Some(FsError::InvalidArgument);
            }
        } else if (*oldip).is_dir() {
            err = Some(FsError::NotADirectory);
        }
        if let Some(e) = err {
            if !nd.parent.is_null() {
                iunlock(nd.parent);
            }
            iunlock(np);
            iunlock(od.parent);
            iunlock(oldip);
            return Err(e);
        }

        assert_eq!((*od.dirent).ino, (*oldip).i_number);
        (*nd.dirent).ino = (*oldip).i_number;
        (*nd.parent).i_mtime = current_time();

        // The entry points at the source before the displaced inode can
        // lose its last link and be reclaimed.
        fence(Ordering::SeqCst);

        (*od.dirent).ino = 0;
        (*od.parent).i_direntries -= 1;
        (*od.parent).i_mtime = current_time();

        (*np).i_nlink -= 1;
        if (*np).i_nlink == 0 {
            itrunc(fs, np); // np is locked
        }

        if !nd.parent.is_null() {
            iunlock(nd.parent);
        }
        iunlock(np);
        iunlock(od.parent);
        iunlock(oldip);
        Ok(())
    }
}
