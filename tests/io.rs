#![allow(unused)]

mod common;

use common::fresh_fs;
use pion::{BLOCK_SIZE, Error, FileMode, OpenFlags, Whence};
use rand::{Rng, SeedableRng, rngs::StdRng};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_file(fs: &pion::FileSystem, path: &str, data: &[u8]) {
    let fd = fs.creat(path, FileMode::file_default()).unwrap();
    assert_eq!(fs.write(fd, data).unwrap(), data.len());
    fs.close(fd).unwrap();
}

fn read_file(fs: &pion::FileSystem, path: &str) -> Vec<u8> {
    let fd = fs.open(path, OpenFlags::RDONLY, FileMode::file_default()).unwrap();
    let size = fs.fstat(fd).unwrap().size as usize;
    let mut buf = vec![0u8; size + 64];
    let n = fs.read(fd, &mut buf).unwrap();
    assert_eq!(n, size);
    fs.close(fd).unwrap();
    buf.truncate(n);
    buf
}

#[test]
fn test_round_trips() {
    let (_arena, fs) = fresh_fs(32 << 20);
    // Zero, sub-block, exact block, just past a block, and well into the
    // doubly indirect range.
    for n in [0usize, 100, 512, 1025, 50_000] {
        let path = format!("/rt{n}");
        let data = pattern(n);
        write_file(&fs, &path, &data);
        assert_eq!(fs.stat(&path).unwrap().size as usize, n);
        assert_eq!(read_file(&fs, &path), data);
    }
}

#[test]
fn test_triply_indirect_round_trip() {
    let (_arena, fs) = fresh_fs(32 << 20);
    // 2.5 MiB crosses into the triply indirect tier (which starts at
    // block 4172).
    let mut data = vec![0u8; 2_500_000];
    let mut rng = StdRng::seed_from_u64(7);
    rng.fill(&mut data[..]);

    let before = fs.used_blocks();
    write_file(&fs, "/big", &data);
    assert_eq!(read_file(&fs, "/big"), data);

    // Dropping the last link frees the data and every pointer block.
    fs.unlink("/big").unwrap();
    assert_eq!(fs.used_blocks(), before);
}

#[test]
fn test_read_clamps_to_eof() {
    let (_arena, fs) = fresh_fs(8 << 20);
    write_file(&fs, "/f", b"0123456789");
    let fd = fs.open("/f", OpenFlags::RDONLY, FileMode::file_default()).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 10);
    assert_eq!(&buf[..10], b"0123456789");
    // At the end there is nothing left.
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    fs.close(fd).unwrap();
}

#[test]
fn test_empty_file_reads_nothing() {
    let (_arena, fs) = fresh_fs(8 << 20);
    let before = fs.used_blocks();
    let fd = fs.creat("/empty", FileMode::file_default()).unwrap();
    fs.close(fd).unwrap();

    let fd = fs.open("/empty", OpenFlags::RDONLY, FileMode::file_default()).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(fd, &mut buf).unwrap(), 0);
    fs.close(fd).unwrap();
    // The read allocated nothing.
    assert_eq!(fs.used_blocks(), before);

    // Zero-length writes are no-ops too.
    let fd = fs.open("/empty", OpenFlags::WRONLY, FileMode::file_default()).unwrap();
    assert_eq!(fs.write(fd, b"").unwrap(), 0);
    fs.close(fd).unwrap();
    assert_eq!(fs.used_blocks(), before);
}

#[test]
fn test_append() {
    let (_arena, fs) = fresh_fs(8 << 20);
    write_file(&fs, "/log", b"hello ");
    let fd = fs.open("/log", OpenFlags::APPEND, FileMode::file_default()).unwrap();
    assert_eq!(fs.write(fd, b"world").unwrap(), 5);
    fs.close(fd).unwrap();
    assert_eq!(read_file(&fs, "/log"), b"hello world");
}

#[test]
fn test_overwrite_in_place() {
    let (_arena, fs) = fresh_fs(8 << 20);
    write_file(&fs, "/f", &pattern(2000));
    let fd = fs.open("/f", OpenFlags::RDWR, FileMode::file_default()).unwrap();
    fs.lseek(fd, 512, Whence::Set).unwrap();
    assert_eq!(fs.write(fd, b"XYZ").unwrap(), 3);
    fs.close(fd).unwrap();

    let data = read_file(&fs, "/f");
    assert_eq!(data.len(), 2000);
    assert_eq!(&data[512..515], b"XYZ");
    assert_eq!(data[511], pattern(2000)[511]);
    assert_eq!(data[515], pattern(2000)[515]);
}

#[test]
fn test_seek_taxonomy() {
    let (_arena, fs) = fresh_fs(8 << 20);
    write_file(&fs, "/f", &pattern(100));
    let fd = fs.open("/f", OpenFlags::RDONLY, FileMode::file_default()).unwrap();

    assert_eq!(fs.lseek(fd, 50, Whence::Set).unwrap(), 50);
    let mut buf = [0u8; 10];
    fs.read(fd, &mut buf).unwrap();
    assert_eq!(buf[0], pattern(100)[50]);

    // The cursor sits at 60 now.
    assert_eq!(fs.lseek(fd, -20, Whence::Cur).unwrap(), 40);
    assert_eq!(fs.lseek(fd, 0, Whence::End).unwrap(), 100);
    assert_eq!(fs.lseek(fd, -100, Whence::End).unwrap(), 0);

    // No seeking outside [0, size]: holes are not supported.
    assert_eq!(fs.lseek(fd, 101, Whence::Set), Err(Error::Overflow));
    assert_eq!(fs.lseek(fd, -1, Whence::Set), Err(Error::Overflow));
    assert_eq!(fs.lseek(fd, 1, Whence::End), Err(Error::Overflow));
    assert_eq!(fs.lseek(fd, -101, Whence::End), Err(Error::Overflow));
    fs.close(fd).unwrap();
}

#[test]
fn test_truncate_idempotent() {
    let (_arena, fs) = fresh_fs(8 << 20);
    let base = {
        let fd = fs.creat("/f", FileMode::file_default()).unwrap();
        fs.close(fd).unwrap();
        fs.used_blocks()
    };

    // 10 KiB spans the direct tier and part of the singly indirect one.
    let fd = fs.open("/f", OpenFlags::WRONLY, FileMode::file_default()).unwrap();
    fs.write(fd, &pattern(10_240)).unwrap();
    fs.close(fd).unwrap();
    assert!(fs.used_blocks() > base);

    let fd = fs
        .open("/f", OpenFlags::WRONLY | OpenFlags::TRUNC, FileMode::file_default())
        .unwrap();
    fs.close(fd).unwrap();
    assert_eq!(fs.stat("/f").unwrap().size, 0);
    assert_eq!(fs.used_blocks(), base);

    // Truncating an already-empty file changes nothing.
    let fd = fs
        .open("/f", OpenFlags::WRONLY | OpenFlags::TRUNC, FileMode::file_default())
        .unwrap();
    fs.close(fd).unwrap();
    assert_eq!(fs.stat("/f").unwrap().size, 0);
    assert_eq!(fs.used_blocks(), base);
}

#[test]
fn test_descriptor_errors() {
    let (_arena, fs) = fresh_fs(8 << 20);
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(99, &mut buf), Err(Error::BadDescriptor));
    assert_eq!(fs.close(42), Err(Error::BadDescriptor));

    write_file(&fs, "/f", b"data");
    let rd = fs.open("/f", OpenFlags::RDONLY, FileMode::file_default()).unwrap();
    assert_eq!(fs.write(rd, b"x"), Err(Error::BadDescriptor));
    let wr = fs.open("/f", OpenFlags::WRONLY, FileMode::file_default()).unwrap();
    assert_eq!(fs.read(wr, &mut buf), Err(Error::BadDescriptor));
    fs.close(rd).unwrap();
    fs.close(wr).unwrap();
    assert_eq!(fs.close(rd), Err(Error::BadDescriptor));

    // Truncating needs write access.
    assert_eq!(
        fs.open("/f", OpenFlags::TRUNC, FileMode::file_default()),
        Err(Error::AccessDenied)
    );

    // Reading a directory through read() is refused.
    let fd = fs.open("/", OpenFlags::RDONLY, FileMode::file_default()).unwrap();
    assert_eq!(fs.read(fd, &mut buf), Err(Error::IsADirectory));
    fs.close(fd).unwrap();
}

#[test]
fn test_open_missing_without_creat() {
    let (_arena, fs) = fresh_fs(8 << 20);
    assert_eq!(
        fs.open("/missing", OpenFlags::RDONLY, FileMode::file_default()),
        Err(Error::NotFound)
    );
}
