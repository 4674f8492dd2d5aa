//! Filesystem primitives shared by initial replication and live reflection
//!
//! ## Design Decisions
//!
//! - **Parents first**: every copy creates the missing destination parent
//!   directories before writing.
//! - **Metadata-preserving copy**: the destination keeps the source's
//!   modification time.
//! - **Byte comparison**: two files are identical only if their sizes match
//!   and their contents compare equal chunk by chunk.
//! - **Classified errors**: every `std::io::Error` is converted with
//!   [`SyncError::from_io`] so callers can tell recoverable failures apart.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use filetime::FileTime;
use tracing::{debug, instrument};

use crate::{Result, SyncError};

const COMPARE_CHUNK: usize = 64 * 1024;

/// Creates every missing ancestor directory of `dst`
pub fn ensure_parent_exists(dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| SyncError::from_io(parent, e))?;
        }
    }
    Ok(())
}

/// Copies `src` to `dst`, creating parents and preserving the modification time
#[instrument(level = "debug", skip_all, fields(src = %src.display(), dst = %dst.display()))]
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent_exists(dst)?;
    let bytes = fs::copy(src, dst).map_err(|e| SyncError::from_io(src, e))?;

    let metadata = fs::metadata(src).map_err(|e| SyncError::from_io(src, e))?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(dst, mtime).map_err(|e| SyncError::from_io(dst, e))?;

    debug!(bytes, "file copied");
    Ok(())
}

/// Returns true if both files exist with byte-identical contents
pub fn files_identical(a: &Path, b: &Path) -> Result<bool> {
    let meta_a = fs::metadata(a).map_err(|e| SyncError::from_io(a, e))?;
    let meta_b = fs::metadata(b).map_err(|e| SyncError::from_io(b, e))?;
    if !meta_a.is_file() || !meta_b.is_file() || meta_a.len() != meta_b.len() {
        return Ok(false);
    }

    let mut reader_a = BufReader::new(File::open(a).map_err(|e| SyncError::from_io(a, e))?);
    let mut reader_b = BufReader::new(File::open(b).map_err(|e| SyncError::from_io(b, e))?);
    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];

    loop {
        let read_a = read_full(&mut reader_a, &mut buf_a).map_err(|e| SyncError::from_io(a, e))?;
        let read_b = read_full(&mut reader_b, &mut buf_b).map_err(|e| SyncError::from_io(b, e))?;
        if read_a != read_b || buf_a[..read_a] != buf_b[..read_b] {
            return Ok(false);
        }
        if read_a == 0 {
            return Ok(true);
        }
    }
}

/// Fills `buf` as far as possible; returns fewer bytes only at end of file
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Removes `path`, whether a file or a whole directory tree
///
/// Returns `false` if there was nothing to remove.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn remove_path(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(SyncError::from_io(path, e)),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SyncError::from_io(path, e)),
    }
}

/// Renames `from` to `to`, replacing whatever is at `to`
#[instrument(level = "debug", skip_all, fields(from = %from.display(), to = %to.display()))]
pub fn rename_replacing(from: &Path, to: &Path) -> Result<()> {
    remove_path(to)?;
    ensure_parent_exists(to)?;
    fs::rename(from, to).map_err(|e| SyncError::from_io(from, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_creates_parents_and_keeps_mtime() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();
        let old = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        let dst = tmp.path().join("x").join("y").join("a.txt");
        copy_file(&src, &dst).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"hello");
        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
    }

    #[test]
    fn test_copy_missing_source_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = copy_file(&tmp.path().join("nope"), &tmp.path().join("dst")).unwrap_err();
        assert!(matches!(err, SyncError::PathNotFound(_)));
    }

    #[test]
    fn test_files_identical() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        let c = tmp.path().join("c");
        let d = tmp.path().join("d");
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut big_changed = big.clone();
        *big_changed.last_mut().unwrap() ^= 0xff;

        fs::write(&a, &big).unwrap();
        fs::write(&b, &big).unwrap();
        fs::write(&c, &big_changed).unwrap();
        fs::write(&d, b"short").unwrap();

        assert!(files_identical(&a, &b).unwrap());
        assert!(!files_identical(&a, &c).unwrap());
        assert!(!files_identical(&a, &d).unwrap());
        assert!(files_identical(&a, &tmp.path().join("missing")).is_err());
    }

    #[test]
    fn test_remove_path_file_tree_and_missing() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f.txt");
        let tree = tmp.path().join("tree");
        fs::write(&file, b"x").unwrap();
        fs::create_dir_all(tree.join("a/b")).unwrap();
        fs::write(tree.join("a/b/c.txt"), b"x").unwrap();

        assert!(remove_path(&file).unwrap());
        assert!(remove_path(&tree).unwrap());
        assert!(!file.exists());
        assert!(!tree.exists());
        assert!(!remove_path(&file).unwrap());
    }

    #[test]
    fn test_rename_replacing_overwrites_stale_target() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("old.txt");
        let to = tmp.path().join("new.txt");
        fs::write(&from, b"fresh").unwrap();
        fs::write(&to, b"stale").unwrap();

        rename_replacing(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"fresh");
    }
}
