//! On-region records and the public flag/metadata types. All records are
//! `#[repr(C)]` and addressed through relative offsets from the region
//! base, so their sizes are pinned by const assertions.

use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::config::*;
use crate::sync::BiasedMutex;

/// Byte offset from the region base. Offset 0 is the null pointer; the
/// superblock sits there, so no real pointer is ever 0.
pub type RelPtr = u64;

/// Superblock, padded to exactly one block. Counter fields are atomics so
/// shared references suffice; every mutation still happens under the
/// corresponding subsystem lock.
#[repr(C)]
pub struct Superblock {
    pub magic: AtomicU32,
    /// Global lock guarding initialization and the attachment count.
    pub super_lock: AtomicU32,
    pub filelist_lock: BiasedMutex,
    pub bitmap_lock: BiasedMutex,
    pub inodelist_lock: BiasedMutex,
    /// Number of data blocks (the metadata sections are not counted).
    pub nblocks: AtomicU32,
    /// Allocation cursor; valid while the region has never wrapped.
    pub next_block: AtomicU32,
    /// Ending offset of the entire region.
    pub end_rel: AtomicU64,
    /// Number of processes attached to this region.
    pub nproc: AtomicU8,
    pub pad: [u8; 463],
}

const_assert_eq!(core::mem::size_of::<Superblock>(), BLOCK_SIZE);

impl Superblock {
    pub fn nblocks(&self) -> u32 {
        self.nblocks.load(Ordering::Relaxed)
    }

    pub fn end_rel(&self) -> RelPtr {
        self.end_rel.load(Ordering::Relaxed)
    }
}

/// The i-node record.
#[repr(C)]
pub struct Inode {
    pub lock: BiasedMutex,
    /// Reference count of open files. Kept from the original layout;
    /// nothing maintains it yet.
    pub i_count: u8,
    /// Index of this inode in the table. Index 0 is invalid; index 1 is
    /// the root directory.
    pub i_number: u16,
    /// Type and permission bits, see [`FileMode`].
    pub i_mode: u16,
    /// Number of directory entries referring to this inode. Zero means
    /// the inode is free and all its pointer slots are zero.
    pub i_nlink: u16,
    pub i_uid: u32,
    pub i_gid: u32,
    /// Size of the file in bytes. For directories this only ever grows;
    /// deleted entries leave holes counted out by `i_direntries`.
    pub i_size1: u32,
    /// Live directory entries; differs from `i_size1 / DIRENT_SIZE` once
    /// an entry has been deleted in place.
    pub i_direntries: u16,
    /// Seconds since the epoch of the last modification.
    pub i_mtime: u64,
    /// 12 direct pointers, then singly, doubly, triply indirect.
    pub i_addr: [RelPtr; 15],
}

const_assert_eq!(core::mem::size_of::<Inode>(), 160);

impl Inode {
    pub fn mode(&self) -> FileMode {
        FileMode::from_bits_retain(self.i_mode)
    }

    pub fn is_dir(&self) -> bool {
        self.mode().contains(FileMode::DIR)
    }
}

/// A directory's data blocks are a flat array of these.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirEnt {
    /// 0 marks a deleted or never-used slot.
    pub ino: u16,
    /// Null-padded; a name never reaches the full 30 bytes.
    pub name: [u8; NAME_LEN],
}

const_assert_eq!(core::mem::size_of::<DirEnt>(), DIRENT_SIZE);

impl DirEnt {
    /// The name with trailing padding removed.
    pub fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        &self.name[..end]
    }
}

/// One record per open/creat call, shared by all attached processes.
/// Holds the read/write offset.
#[repr(C)]
pub struct OpenFile {
    pub lock: BiasedMutex,
    pub f_flag: u8,
    /// Descriptors referring to this record; 0 means free.
    pub f_count: u8,
    _pad: [u8; 2],
    pub f_offset: u32,
    pub f_inode: RelPtr,
}

const_assert_eq!(core::mem::size_of::<OpenFile>(), 24);

/// Internal read/write permission bits held in `OpenFile::f_flag`.
pub(crate) const FREAD: u8 = 0o1;
pub(crate) const FWRITE: u8 = 0o2;

bitflags! {
    /// Type and permission word stored in an inode. The type nibble only
    /// distinguishes directories; everything else is a regular file.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileMode: u16 {
        const DIR  = 0o040000;
        const RUSR = 0o400;
        const WUSR = 0o200;
        const XUSR = 0o100;
        const RGRP = 0o40;
        const WGRP = 0o20;
        const XGRP = 0o10;
        const ROTH = 0o4;
        const WOTH = 0o2;
        const XOTH = 0o1;
    }
}

impl FileMode {
    /// Mode given to every directory.
    pub fn dir_default() -> Self {
        Self::DIR
            | Self::RUSR
            | Self::WUSR
            | Self::XUSR
            | Self::RGRP
            | Self::XGRP
            | Self::ROTH
            | Self::XOTH
    }

    pub fn file_default() -> Self {
        Self::RUSR | Self::WUSR | Self::RGRP | Self::ROTH
    }
}

bitflags! {
    /// Flags accepted by `open`. An empty value means read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u16 {
        const WRONLY = 0x0001;
        const RDWR   = 0x0002;
        const CREAT  = 0x0100;
        const TRUNC  = 0x0800;
        const APPEND = 0x1000;
    }
}

impl OpenFlags {
    pub const RDONLY: Self = Self::empty();
}

/// Reference point for `lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// What `stat` and `fstat` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub ino: u16,
    pub mode: FileMode,
    pub nlink: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
    pub mtime: u64,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.mode.contains(FileMode::DIR)
    }
}
