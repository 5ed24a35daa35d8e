//! Compressed copies of imported captures, keyed by content hash.
//!
//! Layout: `<root>/<content_hash>.log.zst`. The bytes are archived exactly as
//! read so a capture can be re-imported or inspected later.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);
const TEMP_PREFIX: &str = ".switchmap.tmp.";
const EXTENSION: &str = "log.zst";

#[derive(Debug, Clone)]
pub struct CaptureArchive {
    root: PathBuf,
}

impl CaptureArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, content_hash: &str) -> io::Result<PathBuf> {
        if content_hash.len() != 64 || !content_hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{content_hash}` is not a capture fingerprint"),
            ));
        }
        Ok(self
            .root
            .join(format!("{}.{EXTENSION}", content_hash.to_ascii_lowercase())))
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.path_for(content_hash)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Archives `bytes` unless an entry for the hash already exists. Returns
    /// whether a new entry was written.
    pub fn store(&self, content_hash: &str, bytes: &[u8]) -> io::Result<bool> {
        let path = self.path_for(content_hash)?;
        if path.is_file() {
            return Ok(false);
        }
        let compressed = zstd::stream::encode_all(bytes, 0)?;
        atomic_write(&path, &compressed)?;
        Ok(true)
    }

    pub fn load(&self, content_hash: &str) -> io::Result<Vec<u8>> {
        let path = self.path_for(content_hash)?;
        let compressed = fs::read(&path)?;
        zstd::stream::decode_all(compressed.as_slice())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path `{}` has no parent directory", path.display()),
        )
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = temp_path(parent, path)?;
    let mut tmp_file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&tmp_path)?;

    let result = (|| -> io::Result<()> {
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
        drop(tmp_file);
        fs::rename(&tmp_path, path)?;
        sync_dir(parent)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn temp_path(parent: &Path, target: &Path) -> io::Result<PathBuf> {
    let name = target
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target filename"))?;
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    Ok(parent.join(format!(
        "{TEMP_PREFIX}{name}.{}.{counter}",
        std::process::id()
    )))
}

#[cfg(test)]
mod tests {
    use super::{CaptureArchive, TEMP_PREFIX};
    use crate::capture::fingerprint;
    use std::fs;

    #[test]
    fn stores_once_and_loads_exact_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = CaptureArchive::new(dir.path().join("captures"));
        let bytes = b"<Core>display lldp neighbor brief\r\n".to_vec();
        let hash = fingerprint(&bytes);

        assert!(archive.store(&hash, &bytes).expect("store"));
        assert!(!archive.store(&hash, &bytes).expect("second store"));
        assert!(archive.contains(&hash));
        assert_eq!(archive.load(&hash).expect("load"), bytes);

        let leftovers = fs::read_dir(dir.path().join("captures"))
            .expect("list dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(TEMP_PREFIX))
            .collect::<Vec<_>>();
        assert!(leftovers.is_empty(), "temp files left: {leftovers:?}");
    }

    #[test]
    fn refuses_paths_that_are_not_fingerprints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = CaptureArchive::new(dir.path());
        assert!(archive.path_for("../../etc/passwd").is_err());
        assert!(archive.load(&"0".repeat(64)).is_err());
        assert!(!archive.contains("abc"));
    }
}
