//! The packer's view of the tree being packed: a minimal open/stat/list
//! seam so the writer never touches a concrete filesystem directly.

use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::error::Result;
use crate::wire::Mode;

/// Metadata for one source entry.
#[derive(Debug, Clone)]
pub struct SourceStat {
    /// Base name of the entry; the root reports ".".
    pub name: String,
    /// Payload length in bytes; ignored for directories.
    pub size: u64,
    pub mode: Mode,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
}

/// One opened entry. Dropping the handle closes it.
pub trait SourceEntry: Read {
    fn stat(&self) -> Result<SourceStat>;

    /// Base names of this directory's children, in any order. Names must
    /// be unique within the directory. Only called on directories.
    fn children(&mut self) -> Result<Vec<String>>;
}

/// A read-only tree the packer can walk: `open(".")` yields the root,
/// descendants are opened by slash-separated relative path.
pub trait SourceFs {
    type Entry: SourceEntry;

    fn open(&self, path: &str) -> Result<Self::Entry>;
}

/// Source tree rooted at a real directory. Symlinks are followed the way
/// `std::fs::File::open` follows them; dangling links fail the pack.
pub struct OsSource {
    root: PathBuf,
}

impl OsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path == "." {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

pub struct OsEntry {
    path: PathBuf,
    name: String,
    // Regular files hold their reader open for the payload copy;
    // directories have none.
    file: Option<fs::File>,
}

impl SourceFs for OsSource {
    type Entry = OsEntry;

    fn open(&self, path: &str) -> Result<OsEntry> {
        let full = self.resolve(path);
        let name = if path == "." {
            ".".to_string()
        } else {
            path.rsplit('/').next().unwrap_or(path).to_string()
        };
        let meta = fs::metadata(&full)?;
        let file = if meta.is_dir() {
            None
        } else {
            Some(fs::File::open(&full)?)
        };
        Ok(OsEntry {
            path: full,
            name,
            file,
        })
    }
}

impl Read for OsEntry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.file {
            Some(file) => file.read(buf),
            None => Err(io::Error::other("read on a directory entry")),
        }
    }
}

impl SourceEntry for OsEntry {
    fn stat(&self) -> Result<SourceStat> {
        let meta = fs::metadata(&self.path)?;
        let mut mode = Mode::from_bits_retain((meta.permissions().mode() & 0o777) as u64);
        if meta.is_dir() {
            mode |= Mode::DIR;
        }
        let mtime = match meta.modified()?.duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        };
        Ok(SourceStat {
            name: self.name.clone(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mode,
            mtime,
        })
    }

    fn children(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for dent in fs::read_dir(&self.path)? {
            names.push(dent?.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}
