#![allow(unused)]

mod common;

use common::fresh_fs;
use pion::{Error, FileMode, OpenFlags};

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
fn test_link_then_unlink() {
    let (_arena, fs) = fresh_fs(8 << 20);
    let fd = fs.creat("/a.txt", FileMode::file_default()).unwrap();
    fs.close(fd).unwrap();
    fs.link("/a.txt", "/b.txt").unwrap();

    let sa = fs.stat("/a.txt").unwrap();
    let sb = fs.stat("/b.txt").unwrap();
    assert_eq!(sa.ino, sb.ino);
    assert_eq!(sa.nlink, 2);

    let base = fs.used_blocks();
    let fd = fs.open("/a.txt", OpenFlags::WRONLY, FileMode::file_default()).unwrap();
    fs.write(fd, b"original content").unwrap();
    fs.close(fd).unwrap();
    assert!(fs.used_blocks() > base);

    // Dropping one name keeps the file alive through the other.
    fs.unlink("/a.txt").unwrap();
    assert_eq!(fs.stat("/a.txt"), Err(Error::NotFound));
    assert_eq!(fs.stat("/b.txt").unwrap().nlink, 1);
    assert_eq!(read_file(&fs, "/b.txt"), b"original content");

    // Dropping the last one frees every block.
    fs.unlink("/b.txt").unwrap();
    assert_eq!(fs.stat("/b.txt"), Err(Error::NotFound));
    assert_eq!(fs.used_blocks(), base);
}

#[test]
fn test_link_errors() {
    let (_arena, fs) = fresh_fs(8 << 20);
    fs.mkdir("/d", FileMode::dir_default()).unwrap();
    write_file(&fs, "/f", b"x");

    assert_eq!(fs.link("/d", "/d2"), Err(Error::IsADirectory));
    assert_eq!(fs.link("/missing", "/m2"), Err(Error::NotFound));
    assert_eq!(fs.link("/f", "/d"), Err(Error::AlreadyExists));
}

#[test]
fn test_rename_to_fresh_name() {
    let (_arena, fs) = fresh_fs(8 << 20);
    write_file(&fs, "/a.txt", b"payload");
    fs.mkdir("/sub", FileMode::dir_default()).unwrap();

    fs.rename("/a.txt", "/b.txt").unwrap();
    assert_eq!(fs.stat("/a.txt"), Err(Error::NotFound));
    assert_eq!(read_file(&fs, "/b.txt"), b"payload");

    // Across directories too.
    fs.rename("/b.txt", "/sub/c.txt").unwrap();
    assert_eq!(fs.stat("/b.txt"), Err(Error::NotFound));
    assert_eq!(read_file(&fs, "/sub/c.txt"), b"payload");
}

#[test]
fn test_rename_overwrites_existing_file() {
    let (_arena, fs) = fresh_fs(8 << 20);
    let base = {
        let fd = fs.creat("/a.txt", FileMode::file_default()).unwrap();
        fs.close(fd).unwrap();
        let fd = fs.creat("/b.txt", FileMode::file_default()).unwrap();
        fs.close(fd).unwrap();
        fs.used_blocks()
    };
    let fd = fs.open("/a.txt", OpenFlags::WRONLY, FileMode::file_default()).unwrap();
    fs.write(fd, b"AAA").unwrap();
    fs.close(fd).unwrap();
    let fd = fs.open("/b.txt", OpenFlags::WRONLY, FileMode::file_default()).unwrap();
    fs.write(fd, b"BBBBBB").unwrap();
    fs.close(fd).unwrap();

    fs.rename("/a.txt", "/b.txt").unwrap();
    assert_eq!(fs.stat("/a.txt"), Err(Error::NotFound));
    assert_eq!(read_file(&fs, "/b.txt"), b"AAA");
    // The displaced file's block went back to the bitmap; only AAA's
    // block remains.
    assert_eq!(fs.used_blocks(), base + 1);
}

#[test]
fn test_rename_same_file_is_a_noop() {
    let (_arena, fs) = fresh_fs(8 << 20);
    write_file(&fs, "/a", b"same");
    fs.link("/a", "/b").unwrap();
    fs.rename("/a", "/b").unwrap();
    // Both names survive, still one inode.
    assert_eq!(fs.stat("/a").unwrap().ino, fs.stat("/b").unwrap().ino);
    assert_eq!(fs.stat("/a").unwrap().nlink, 2);
}

#[test]
fn test_rename_directories() {
    let (_arena, fs) = fresh_fs(8 << 20);
    fs.mkdir("/d1", FileMode::dir_default()).unwrap();
    write_file(&fs, "/d1/f", b"inside");

    fs.rename("/d1", "/d2").unwrap();
    assert_eq!(fs.stat("/d1"), Err(Error::NotFound));
    assert_eq!(read_file(&fs, "/d2/f"), b"inside");

    // Over an empty directory: allowed, the empty one is reclaimed.
    fs.mkdir("/e", FileMode::dir_default()).unwrap();
    fs.rename("/d2", "/e").unwrap();
    assert_eq!(fs.stat("/d2"), Err(Error::NotFound));
    assert_eq!(read_file(&fs, "/e/f"), b"inside");

    // Over a non-empty directory: refused.
    fs.mkdir("/full", FileMode::dir_default()).unwrap();
    write_file(&fs, "/full/g", b"x");
    assert_eq!(fs.rename("/e", "/full"), Err(Error::DirectoryNotEmpty));

    // Type mismatches both ways. The emptiness check runs first, so the
    // destination must be an empty directory to see the type error.
    write_file(&fs, "/plain", b"y");
    fs.mkdir("/emptyd", FileMode::dir_default()).unwrap();
    assert_eq!(fs.rename("/plain", "/emptyd"), Err(Error::IsADirectory));
    assert_eq!(fs.rename("/e", "/plain"), Err(Error::NotADirectory));
}

#[test]
fn test_rename_into_own_subtree_rejected() {
    let (_arena, fs) = fresh_fs(8 << 20);
    fs.mkdir("/dir1", FileMode::dir_default()).unwrap();
    assert_eq!(fs.rename("/dir1", "/dir1/sub"), Err(Error::InvalidArgument));

    fs.mkdir("/dir1/a", FileMode::dir_default()).unwrap();
    assert_eq!(
        fs.rename("/dir1", "/dir1/a/deep"),
        Err(Error::InvalidArgument)
    );
    // The tree is untouched.
    assert!(fs.stat("/dir1/a").unwrap().is_dir());
}

#[test]
fn test_rmdir_protocol() {
    let (_arena, fs) = fresh_fs(8 << 20);
    fs.mkdir("/a", FileMode::dir_default()).unwrap();
    fs.mkdir("/a/b", FileMode::dir_default()).unwrap();

    assert_eq!(fs.rmdir("/a"), Err(Error::DirectoryNotEmpty));
    fs.rmdir("/a/b").unwrap();
    fs.rmdir("/a").unwrap();
    assert_eq!(fs.stat("/a"), Err(Error::NotFound));

    // Deleted directory entries do not keep a directory "occupied".
    fs.mkdir("/c", FileMode::dir_default()).unwrap();
    write_file(&fs, "/c/f", b"x");
    assert_eq!(fs.rmdir("/c"), Err(Error::DirectoryNotEmpty));
    fs.unlink("/c/f").unwrap();
    fs.rmdir("/c").unwrap();
}

#[test]
fn test_unlink_and_rmdir_type_checks() {
    let (_arena, fs) = fresh_fs(8 << 20);
    fs.mkdir("/d", FileMode::dir_default()).unwrap();
    write_file(&fs, "/f", b"x");

    assert_eq!(fs.unlink("/d"), Err(Error::IsADirectory));
    assert_eq!(fs.rmdir("/f"), Err(Error::NotADirectory));
    assert_eq!(fs.unlink("/missing"), Err(Error::NotFound));
    // The root cannot be deleted.
    assert!(fs.rmdir("/").is_err());
}

#[test]
fn test_deleted_entries_are_skipped_not_reused() {
    let (_arena, fs) = fresh_fs(8 << 20);
    for name in ["/f1", "/f2", "/f3"] {
        write_file(&fs, name, b"x");
    }
    let size_before = fs.stat("/").unwrap().size;
    fs.unlink("/f2").unwrap();
    // Deletion leaves the slot in place; the directory never shrinks.
    assert_eq!(fs.stat("/").unwrap().size, size_before);

    write_file(&fs, "/f4", b"x");
    // The new entry was appended, not dropped into f2's slot.
    assert_eq!(fs.stat("/").unwrap().size, size_before + 32);

    let dd = fs.opendir("/").unwrap();
    let mut names = Vec::new();
    loop {
        match fs.readdir(dd) {
            Ok(de) => names.push(String::from_utf8(de.name().to_vec()).unwrap()),
            Err(Error::EndOfDirectory) => break,
            Err(e) => panic!("readdir failed: {e}"),
        }
    }
    fs.closedir(dd).unwrap();
    assert_eq!(names, [".", "..", "f1", "f3", "f4"]);
}
