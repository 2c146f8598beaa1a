//! Pathname resolution. `namei` walks a path component by component
//! against the directory entries stored in inode data blocks, locking
//! top-down along the way: at most the current directory and its parent
//! are locked at any moment, and a matched child is locked only after
//! the grandparent has been released.

use core::ptr;

use crate::config::*;
use crate::error::{FsError, Result};
use crate::fs::FileSystem;
use crate::inode::{dir_block, ilock, iunlock};
use crate::structs::{DirEnt, FileMode, Inode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Intent {
    Search,
    Create,
    Delete,
}

/// Side results of a walk.
pub(crate) struct NameiData {
    /// Parent directory of the result; null when the result is the
    /// starting directory itself. Locked on success.
    pub parent: *mut Inode,
    /// The matched entry slot inside the parent, for in-place deletion.
    pub dirent: *mut DirEnt,
    /// Byte index into the pathname where the walk stopped.
    pub cursor: usize,
}

impl NameiData {
    pub fn new() -> Self {
        Self {
            parent: ptr::null_mut(),
            dirent: ptr::null_mut(),
            cursor: 0,
        }
    }
}

/// Resolve `path` under the given intent.
///
/// Search: returns the named inode, locked; `nd.parent` (when any) is
/// locked too and is the caller's to release.
/// Create: an existing final component is `AlreadyExists`; a missing one
/// returns the locked would-be parent with `nd.cursor` past the end.
/// Delete: like Search, with `nd.dirent` naming the entry to clear.
///
/// On any error nothing is left locked.
pub(crate) fn namei(
    fs: &FileSystem,
    path: &str,
    intent: Intent,
    nd: &mut NameiData,
) -> Result<*mut Inode> {
    let r = fs.region;
    let p = path.as_bytes();
    nd.parent = ptr::null_mut();
    nd.dirent = ptr::null_mut();
    nd.cursor = 0;

    let mut dp = fs.cwd_inode();
    if p.first() == Some(&b'/') {
        dp = r.inode(ROOT_INO);
    }

    let mut cp = 0usize;
    while cp < p.len() && p[cp] == b'/' {
        cp += 1;
    }
    if cp >= p.len() && intent != Intent::Search {
        // You cannot create or delete "/".
        return Err(FsError::AlreadyExists);
    }

    // Each turn of the outer loop consumes one component of the path.
    loop {
        ilock(dp, fs.pid);
        if cp >= p.len() {
            if intent == Intent::Create {
                return fail(nd, dp, FsError::AlreadyExists);
            }
            nd.cursor = cp;
            return Ok(dp);
        }

        unsafe {
            if !(*dp).is_dir() {
                return fail(nd, dp, FsError::NotADirectory);
            }
            if (*dp).i_mode & FileMode::XUSR.bits() == 0 {
                return fail(nd, dp, FsError::NoExecPermission);
            }
        }

        // Slots in the directory file, deleted ones included.
        let mut entries = unsafe { (*dp).i_size1 } as usize / DIRENT_SIZE;
        let mut next_blk = 0u32;
        let mut offset = 0usize;
        let mut bp: *mut u8 = ptr::null_mut();

        loop {
            if entries == 0 {
                // End of directory without a match.
                if intent == Intent::Create {
                    while cp < p.len() && p[cp] != b'/' {
                        cp += 1;
                    }
                    while cp < p.len() && p[cp] == b'/' {
                        cp += 1;
                    }
                    if cp >= p.len() {
                        // Missing final component: dp is the parent-to-be.
                        nd.cursor = cp;
                        return Ok(dp);
                    }
                }
                return fail(nd, dp, FsError::NotFound);
            }

            if offset % BLOCK_SIZE == 0 {
                bp = dir_block(fs, dp, next_blk);
                next_blk += 1;
                offset = 0;
            }

            nd.dirent = unsafe { bp.add(offset) } as *mut DirEnt;
            offset += DIRENT_SIZE;
            entries -= 1;

            let de = unsafe { &*nd.dirent };
            if de.ino == 0 {
                continue; // deleted entry
            }
            let name = de.name();
            let rest = &p[cp..];
            if rest.len() < name.len() || &rest[..name.len()] != name {
                continue;
            }
            if rest.len() > name.len() && rest[name.len()] != b'/' {
                continue;
            }

            // Matched. Step down, releasing the grandparent first.
            cp += name.len();
            while cp < p.len() && p[cp] == b'/' {
                cp += 1;
            }
            assert!((de.ino as usize) < NINODES);
            if !nd.parent.is_null() {
                iunlock(nd.parent);
            }
            nd.parent = dp;
            dp = r.inode(de.ino);
            break;
        }
    }
}

fn fail(nd: &mut NameiData, dp: *mut Inode, e: FsError) -> Result<*mut Inode> {
    iunlock(dp);
    if !nd.parent.is_null() {
        iunlock(nd.parent);
        nd.parent = ptr::null_mut();
    }
    Err(e)
}

/// Extract the final component of `path` given the cursor a Create walk
/// left behind. `creat` refuses a trailing slash; mkdir and friends
/// strip it.
pub(crate) fn last_component(
    path: &[u8],
    end: usize,
    allow_trailing_slash: bool,
) -> Result<&[u8]> {
    let mut e = end;
    if e > 0 && path[e - 1] == b'/' {
        if !allow_trailing_slash {
            return Err(FsError::InvalidArgument);
        }
        while e > 0 && path[e - 1] == b'/' {
            e -= 1;
        }
    }
    let mut s = e;
    while s > 0 && path[s - 1] != b'/' {
        s -= 1;
        if e - s >= NAME_LEN {
            return Err(FsError::NameTooLong);
        }
    }
    Ok(&path[s..e])
}

/// Whether the directory `shortip` lies on the path leading to `longip`,
/// walked through the `..` entries from `longip` up to the root. Both
/// inodes are locked by the caller, so intermediate directories are read
/// without locks.
pub(crate) fn is_prefix(fs: &FileSystem, shortip: *mut Inode, longip: *mut Inode) -> bool {
    let r = fs.region;
    unsafe {
        assert!((*shortip).is_dir());
        assert!((*longip).is_dir());
        let mut ip = longip;
        while (*ip).i_number != ROOT_INO {
            if (*ip).i_number == (*shortip).i_number {
                return true;
            }
            // ".." is always the second entry of the first block.
            let first = r.abs((*ip).i_addr[0]);
            let de = &*(first.add(DIRENT_SIZE) as *const DirEnt);
            assert_eq!(de.name(), DOTDOT, "directory lost its .. entry");
            ip = r.inode(de.ino);
        }
    }
    false
}
