//! The public face of the file system. One `FileSystem` value represents
//! one process attached to a region: it carries the process's bias id,
//! its descriptor table and its current directory, while everything
//! shared lives inside the region itself.

use core::ptr;
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use crate::bitmap::get_bit;
use crate::config::*;
use crate::directory;
use crate::error::{FsError, Result};
use crate::file;
use crate::inode::{ilock, iunlock, make_root, stat_copy};
use crate::path::{Intent, NameiData, namei};
use crate::region::{BLOCKS_OFF, MemoryProvider, Region, check_aligned};
use crate::structs::{DirEnt, FileMode, Inode, Metadata, OpenFlags, Whence};
use crate::superblock::{init_file_table, init_freemap, init_inodes, init_superblock};
use crate::sync::{BiasedMutex, spin_lock, spin_unlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Create a fresh layout; the base must equal the provider's
    /// current break.
    Format,
    /// Join an existing layout.
    Attach,
}

/// Per-process state: descriptor table and current directory.
pub(crate) struct UserCtx {
    pub lock: BiasedMutex,
    pub uid: u32,
    pub gid: u32,
    /// Descriptors are indices here; each slot names a record in the
    /// shared open-file table.
    pub ofile: [Option<u32>; NOFILE],
    pub cwd: *mut Inode,
    pub cwd_str: [u8; CWD_MAX],
    pub cwd_len: usize,
}

impl UserCtx {
    fn new(pid: u8) -> Self {
        let mut cwd_str = [0u8; CWD_MAX];
        cwd_str[0] = b'/';
        Self {
            lock: BiasedMutex::new(pid),
            uid: 0,
            gid: 0,
            ofile: [None; NOFILE],
            cwd: ptr::null_mut(),
            cwd_str,
            cwd_len: 1,
        }
    }
}

/// A process's handle on a region-resident file system.
pub struct FileSystem {
    pub(crate) region: Region,
    pub(crate) provider: Arc<dyn MemoryProvider>,
    /// Attachment id; biases every lock this process initializes.
    pub(crate) pid: u8,
    /// Next growth step in blocks, doubling per request. Process-local.
    grow_blocks: AtomicUsize,
    ctx: UnsafeCell<UserCtx>,
}

impl core::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileSystem")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

// The region is shared mutable memory guarded by its own in-region
// locks; the context is guarded by its biased lock.
unsafe impl Send for FileSystem {}
unsafe impl Sync for FileSystem {}

impl FileSystem {
    /// Attach to (or create) the file system whose region starts at
    /// `base`. With `InitMode::Format` the base must be page-aligned and
    /// equal to the provider's current break; `size_hint`, when given,
    /// fixes the initial region size and must be a page multiple.
    pub fn init(
        provider: Arc<dyn MemoryProvider>,
        base: *mut u8,
        mode: InitMode,
        size_hint: Option<usize>,
    ) -> Result<Self> {
        check_aligned(base)?;
        match mode {
            InitMode::Format => Self::format(provider, base, size_hint),
            InitMode::Attach => Self::attach(provider, base),
        }
    }

    fn format(
        provider: Arc<dyn MemoryProvider>,
        base: *mut u8,
        size_hint: Option<usize>,
    ) -> Result<Self> {
        let brk = provider.current_break();
        if base != brk {
            if (base as usize) < (brk as usize)
                && Region::new(base).sup().magic.load(Ordering::Relaxed) == MAGIC
            {
                return Err(FsError::AlreadyInitialized);
            }
            return Err(FsError::EnvironmentFailure);
        }

        let fs = Self {
            region: Region::new(base),
            provider,
            pid: 0,
            grow_blocks: AtomicUsize::new(4),
            ctx: UnsafeCell::new(UserCtx::new(0)),
        };

        let total = match size_hint {
            Some(n) => {
                if n & PAGE_MASK != 0 || n < BLOCKS_OFF + BLOCK_SIZE {
                    return Err(FsError::InvalidArgument);
                }
                n
            }
            None => page_roundup(BLOCKS_OFF + fs.next_alloc_size()),
        };
        fs.provider
            .extend(total)
            .map_err(|_| FsError::EnvironmentFailure)?;

        init_superblock(fs.region, total, 0);
        let sup = fs.region.sup();
        spin_lock(&sup.super_lock);
        init_file_table(fs.region, 0);
        init_freemap(fs.region);
        init_inodes(fs.region, 0);
        make_root(&fs);
        spin_unlock(&sup.super_lock);

        fs.set_cwd_root();
        debug!("formatted region: {total} bytes, {} data blocks", sup.nblocks());
        Ok(fs)
    }

    fn attach(provider: Arc<dyn MemoryProvider>, base: *mut u8) -> Result<Self> {
        let region = Region::new(base);
        let sup = region.sup();
        spin_lock(&sup.super_lock);
        assert_eq!(
            sup.magic.load(Ordering::Relaxed),
            MAGIC,
            "attach: no file system at region base"
        );
        let nproc = sup.nproc.load(Ordering::Relaxed);
        if nproc == MAX_NPROC {
            spin_unlock(&sup.super_lock);
            return Err(FsError::TooManyProcesses);
        }
        sup.nproc.store(nproc + 1, Ordering::Relaxed);
        spin_unlock(&sup.super_lock);

        let fs = Self {
            region,
            provider,
            pid: nproc,
            grow_blocks: AtomicUsize::new(4),
            ctx: UnsafeCell::new(UserCtx::new(nproc)),
        };
        fs.set_cwd_root();
        Ok(fs)
    }

    fn set_cwd_root(&self) {
        unsafe {
            (*self.ctx.get()).cwd = self.region.inode(ROOT_INO);
        }
    }

    /// Size of the next region growth, doubling up to the cap.
    pub(crate) fn next_alloc_size(&self) -> usize {
        let mut n = self.grow_blocks.load(Ordering::Relaxed);
        if n < GROW_CAP_BLOCKS {
            n *= 2;
            self.grow_blocks.store(n, Ordering::Relaxed);
        }
        n * BLOCK_SIZE
    }

    pub(crate) fn ctx(&self) -> *mut UserCtx {
        self.ctx.get()
    }

    pub(crate) fn cwd_inode(&self) -> *mut Inode {
        unsafe { (*self.ctx.get()).cwd }
    }

    pub(crate) fn uid(&self) -> u32 {
        unsafe { (*self.ctx.get()).uid }
    }

    pub(crate) fn gid(&self) -> u32 {
        unsafe { (*self.ctx.get()).gid }
    }

    pub fn root_ino(&self) -> u16 {
        ROOT_INO
    }

    // File operations.

    /// Open `path`. A missing file is created when `CREAT` is given,
    /// with `mode`, and comes back open for write, truncated. `APPEND`
    /// seeks to the end of the file and implies write access.
    pub fn open(&self, path: &str, flags: OpenFlags, mode: FileMode) -> Result<usize> {
        file::open(self, path, flags, mode)
    }

    /// Create a regular file; `mode` must not carry the directory bit.
    pub fn creat(&self, path: &str, mode: FileMode) -> Result<usize> {
        file::creat(self, path, mode)
    }

    pub fn close(&self, fd: usize) -> Result<()> {
        file::close(self, fd)
    }

    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize> {
        file::read(self, fd, buf)
    }

    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize> {
        file::write(self, fd, buf)
    }

    pub fn lseek(&self, fd: usize, offset: i64, whence: Whence) -> Result<u64> {
        file::lseek(self, fd, offset, whence)
    }

    pub fn stat(&self, path: &str) -> Result<Metadata> {
        let mut nd = NameiData::new();
        let ip = namei(self, path, Intent::Search, &mut nd)?;
        if !nd.parent.is_null() {
            iunlock(nd.parent);
        }
        let m = stat_copy(ip);
        iunlock(ip);
        Ok(m)
    }

    pub fn fstat(&self, fd: usize) -> Result<Metadata> {
        let fidx = file::validate_fd(self, fd)?;
        unsafe {
            let fp = self.region.file(fidx);
            let ip = self.region.abs((*fp).f_inode) as *mut Inode;
            ilock(ip, self.pid);
            let m = stat_copy(ip);
            iunlock(ip);
            Ok(m)
        }
    }

    /// No symbolic links exist, so this is `stat`.
    pub fn lstat(&self, path: &str) -> Result<Metadata> {
        self.stat(path)
    }

    // Namespace operations.

    /// Make a directory. The mode argument is accepted for the usual
    /// signature but directories currently all get a fixed mode.
    pub fn mkdir(&self, path: &str, mode: FileMode) -> Result<()> {
        directory::mkdir(self, path, mode)
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        directory::rmdir(self, path)
    }

    /// Delete a name; the file goes once its last link does.
    pub fn unlink(&self, path: &str) -> Result<()> {
        directory::unlink(self, path)
    }

    /// Create a hard link to an existing file.
    pub fn link(&self, oldpath: &str, newpath: &str) -> Result<()> {
        directory::link(self, oldpath, newpath)
    }

    /// Move `oldpath` to `newpath`, replacing a compatible existing
    /// destination.
    pub fn rename(&self, oldpath: &str, newpath: &str) -> Result<()> {
        directory::rename(self, oldpath, newpath)
    }

    // Directory reading.

    pub fn opendir(&self, path: &str) -> Result<usize> {
        file::opendir(self, path)
    }

    pub fn readdir(&self, fd: usize) -> Result<DirEnt> {
        file::readdir(self, fd)
    }

    pub fn closedir(&self, fd: usize) -> Result<()> {
        file::close(self, fd)
    }

    // Process context.

    /// Change the current directory; the path must be absolute.
    pub fn chdir(&self, path: &str) -> Result<()> {
        let p = path.as_bytes();
        if p.first() != Some(&b'/') {
            return Err(FsError::NotAbsolutePath);
        }
        if p.len() >= CWD_MAX {
            return Err(FsError::NameTooLong);
        }

        let mut nd = NameiData::new();
        let ip = namei(self, path, Intent::Search, &mut nd)?;
        if !nd.parent.is_null() {
            iunlock(nd.parent);
        }
        iunlock(ip);

        unsafe {
            let ctx = self.ctx();
            (*ctx).lock.lock(self.pid);
            (*ctx).cwd = ip;
            (*ctx).cwd_str = [0; CWD_MAX];
            (&mut (*ctx).cwd_str)[..p.len()].copy_from_slice(p);
            (*ctx).cwd_len = p.len();
            (*ctx).lock.unlock();
        }
        Ok(())
    }

    /// Copy the current directory's pathname into `buf`.
    pub fn getcwd<'a>(&self, buf: &'a mut [u8]) -> Result<&'a str> {
        unsafe {
            let ctx = self.ctx();
            (*ctx).lock.lock(self.pid);
            let len = (*ctx).cwd_len;
            if len >= buf.len() {
                (*ctx).lock.unlock();
                return Err(FsError::RangeError);
            }
            buf[..len].copy_from_slice(&(&(*ctx).cwd_str)[..len]);
            (*ctx).lock.unlock();
            // The string was stored from &str; it stays utf-8.
            Ok(core::str::from_utf8_unchecked(&buf[..len]))
        }
    }

    // Housekeeping.

    /// Number of allocated data blocks, straight from the bitmap.
    pub fn used_blocks(&self) -> u32 {
        let map = self.region.freemap();
        let mut used = 0;
        for i in 0..(BMAP_BYTES * 8) as u32 {
            if get_bit(map, i) {
                used += 1;
            }
        }
        used
    }

    /// Give up this process's attachment slot so another process can
    /// take it.
    pub fn detach(&self) {
        let sup = self.region.sup();
        spin_lock(&sup.super_lock);
        let n = sup.nproc.load(Ordering::Relaxed);
        assert!(n > 0);
        sup.nproc.store(n - 1, Ordering::Relaxed);
        spin_unlock(&sup.super_lock);
    }

    /// Take an attachment slot back after `detach`.
    pub fn reattach(&self) {
        let sup = self.region.sup();
        spin_lock(&sup.super_lock);
        let n = sup.nproc.load(Ordering::Relaxed);
        assert!(n < MAX_NPROC);
        sup.nproc.store(n + 1, Ordering::Relaxed);
        spin_unlock(&sup.super_lock);
    }
}
