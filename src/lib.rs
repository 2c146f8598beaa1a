//! Pion is a Unix-like file system that lives entirely inside the
//! address space of the processes using it: library calls instead of
//! system calls, one contiguous memory region instead of a disk.
//!
//! Region layout, front to back:
//! - Superblock
//! - Open-file table
//! - Free-block bitmap
//! - Inode table
//! - Data blocks
//!
//! Every pointer stored in the region is an offset from the region base,
//! so cooperating processes can map it at different addresses. The
//! layers, bottom to top:
//! 1. Memory provider: sbrk-style growth of the region.    User implemented (see `MemoryProvider`)
//! 2. Region: relative pointers, section offsets.
//! 3. Bitmap + allocator: zero-filled blocks, one lock.
//! 4. Inode: multi-level block map, truncation.
//! 5. Directory/path: `namei`, fence-ordered entry updates.
//! 6. File: open-file table, byte-addressed read/write.
//! 7. FileSystem: one value per attached process.

mod bitmap;
mod config;
mod directory;
mod error;
mod file;
mod fs;
mod inode;
mod path;
mod region;
mod structs;
mod superblock;
mod sync;

pub use config::*;
pub use error::FsError;
pub use error::FsError as Error;
pub use error::Result;
pub use fs::{FileSystem, InitMode};
pub use region::{MemoryProvider, Region};
pub use structs::{DirEnt, FileMode, Metadata, OpenFlags, RelPtr, Superblock, Whence};
pub use sync::BiasedMutex;
