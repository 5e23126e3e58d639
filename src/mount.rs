//! Random-access reader for packed streams.
//!
//! Nothing is cached beyond the root header: path lookup binary-searches
//! directory blocks directly on disk, so a mounted stream costs a few
//! header-sized reads per component no matter how large the tree is.

use std::cmp::Ordering;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::wire::{Header, Mode, HEADER_SIZE, SHORT_NAME_LEN};

// === Shared source === //

// The underlying source has a single seek cursor, so every seek+read pair
// must be atomic. The mutex is held for exactly one coherent read (one
// header, one run of child headers, one name, one payload chunk) and
// released in between, so concurrent handles interleave at that grain.
#[derive(Debug)]
struct Shared<R> {
    source: Mutex<R>,
}

impl<R: Read + Seek> Shared<R> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut source = self.source.lock();
        source.seek(SeekFrom::Start(offset))?;
        source.read_exact(buf)?;
        Ok(())
    }

    // Like read_exact_at, but a short read means a record was cut off
    // rather than a generic I/O failure.
    fn read_record_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_exact_at(offset, buf).map_err(|err| match err {
            Error::Io(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => {
                Error::TruncatedRecord
            }
            other => other,
        })
    }

    fn read_header(&self, offset: u64) -> Result<Header> {
        let mut buf = [0u8; HEADER_SIZE];
        self.read_record_bytes(offset, &mut buf)?;
        let header = Header::decode(&buf);
        header.validate()?;
        Ok(header)
    }

    // Full base name of an entry; only long names cost a locked read.
    fn read_name_bytes(&self, header: &Header) -> Result<Vec<u8>> {
        let size = header.name_size as usize;
        if size <= SHORT_NAME_LEN {
            return Ok(header.short_name_bytes().to_vec());
        }
        let mut buf = vec![0u8; size];
        self.read_record_bytes(header.name_offset, &mut buf)?;
        Ok(buf)
    }

    fn read_name(&self, header: &Header) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.read_name_bytes(header)?).into_owned())
    }

    // Byte-lexicographic comparison of a wanted name against an on-disk
    // entry, touching the out-of-line name only when unavoidable: the
    // header always carries the first min(8, NameSize) bytes, so a prefix
    // decides unless both names exceed 8 bytes and tie on their first 8.
    fn compare_name(&self, needle: &[u8], entry: &Header) -> Result<Ordering> {
        let short = entry.short_name_bytes();
        let entry_is_long = entry.name_size > SHORT_NAME_LEN as u64;
        if needle.len() <= SHORT_NAME_LEN || !entry_is_long {
            let ord = needle.cmp(short);
            // equal to the prefix of a longer stored name: prefix sorts first
            if ord == Ordering::Equal && entry_is_long {
                return Ok(Ordering::Less);
            }
            return Ok(ord);
        }
        match needle[..SHORT_NAME_LEN].cmp(short) {
            Ordering::Equal => {
                let full = self.read_name_bytes(entry)?;
                Ok(needle.cmp(full.as_slice()))
            }
            ord => Ok(ord),
        }
    }

    // Binary search over the contiguous, name-sorted child block. One lock
    // acquisition per header inspected, so other readers interleave
    // between steps.
    fn lookup_child(&self, dir: &Header, needle: &[u8]) -> Result<Header> {
        let mut lo: i64 = 0;
        let mut hi: i64 = dir.size as i64 - 1;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let offset = dir.data_offset + mid as u64 * HEADER_SIZE as u64;
            let header = self.read_header(offset)?;
            match self.compare_name(needle, &header)? {
                Ordering::Equal => return Ok(header),
                Ordering::Less => hi = mid - 1,
                Ordering::Greater => lo = mid + 1,
            }
        }
        Err(Error::NotFound)
    }
}

// === FlatFs === //

/// A mounted packed stream.
///
/// Cloning is cheap: clones and [`FlatFs::sub`] views share the same
/// underlying source and the same access lock, never a copy of either.
#[derive(Debug)]
pub struct FlatFs<R> {
    shared: Arc<Shared<R>>,
    root: Header,
    root_name: String,
}

impl<R> Clone for FlatFs<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            root: self.root,
            root_name: self.root_name.clone(),
        }
    }
}

impl<R: Read + Seek> FlatFs<R> {
    /// Mount a packed stream: decode and validate the header at byte 0,
    /// which must describe a directory.
    pub fn load(source: R) -> Result<Self> {
        let shared = Arc::new(Shared {
            source: Mutex::new(source),
        });
        let root = shared.read_header(0)?;
        if !root.is_dir() {
            return Err(Error::RootNotDirectory);
        }
        let root_name = shared.read_name(&root)?;
        debug!(root = %root.short_label(), children = root.size, "mounted packed stream");
        Ok(Self {
            shared,
            root,
            root_name,
        })
    }

    /// Open an entry by slash-separated relative path; `"."` is the root.
    pub fn open(&self, path: &str) -> Result<OpenEntry<R>> {
        let (header, name) = self.resolve(path)?;
        trace!(path = %path, "open");
        let cursor = if header.is_dir() {
            Cursor::Dir(0)
        } else {
            Cursor::File(0)
        };
        Ok(OpenEntry {
            shared: self.shared.clone(),
            header,
            name,
            cursor,
        })
    }

    /// Re-root a view at an interior directory. The result shares this
    /// handle's source and lock.
    pub fn sub(&self, path: &str) -> Result<FlatFs<R>> {
        let (header, name) = self.resolve(path)?;
        if !header.is_dir() {
            return Err(Error::NotADirectory.at(path));
        }
        Ok(FlatFs {
            shared: self.shared.clone(),
            root: header,
            root_name: name,
        })
    }

    fn resolve(&self, path: &str) -> Result<(Header, String)> {
        if path == "." {
            return Ok((self.root, self.root_name.clone()));
        }
        validate_path(path)?;

        let components: SmallVec<[&str; 8]> = path.split('/').collect();
        let mut current = self.root;
        for (i, component) in components.iter().enumerate() {
            if !current.is_dir() {
                return Err(Error::NotADirectory.at(&components[..=i].join("/")));
            }
            current = self
                .shared
                .lookup_child(&current, component.as_bytes())
                .map_err(|err| err.at(&components[..=i].join("/")))?;
        }
        Ok((current, components.last().unwrap().to_string()))
    }
}

// Path rules: relative, slash-delimited, no empty components, and no `.`
// or `..` anywhere (the bare string "." is handled before validation).
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(Error::InvalidPath(path.to_string()));
    }
    for component in path.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(Error::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}

// === Open entries === //

#[derive(Debug)]
enum Cursor {
    File(u64),
    Dir(u64),
}

/// What an entry looks like from the outside: returned by
/// [`OpenEntry::metadata`] and [`OpenEntry::read_dir`].
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub name: String,
    /// Payload bytes for files; child count for directories.
    pub size: u64,
    pub mode: Mode,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
}

impl EntryMeta {
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }
}

/// An opened file or directory inside a packed stream.
///
/// Handles hold no lock between operations and do not keep the stream
/// alive on their own; dropping one is "close".
#[derive(Debug)]
pub struct OpenEntry<R> {
    shared: Arc<Shared<R>>,
    header: Header,
    name: String,
    cursor: Cursor,
}

impl<R: Read + Seek> OpenEntry<R> {
    pub fn metadata(&self) -> EntryMeta {
        EntryMeta {
            name: self.name.clone(),
            size: self.header.size,
            mode: self.header.mode,
            mtime: self.header.mtime,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.header.is_dir()
    }

    /// Read up to `n` child entries, or all remaining when `n <= 0`.
    ///
    /// Returns an empty vec once the directory is exhausted. The directory
    /// cursor only moves forward; there is no rewind.
    pub fn read_dir(&mut self, n: isize) -> Result<Vec<EntryMeta>> {
        let size = self.header.size;
        let Cursor::Dir(index) = &mut self.cursor else {
            return Err(Error::NotADirectory);
        };

        let remaining = size - *index;
        let count = if n <= 0 {
            remaining
        } else {
            (n as u64).min(remaining)
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        // one lock hold for the whole contiguous run of child headers
        let mut block = vec![0u8; count as usize * HEADER_SIZE];
        let offset = self.header.data_offset + *index * HEADER_SIZE as u64;
        self.shared.read_record_bytes(offset, &mut block)?;

        let mut entries = Vec::with_capacity(count as usize);
        for chunk in block.chunks_exact(HEADER_SIZE) {
            let header = Header::decode(chunk.try_into().unwrap());
            header.validate()?;
            entries.push(EntryMeta {
                name: self.shared.read_name(&header)?,
                size: header.size,
                mode: header.mode,
                mtime: header.mtime,
            });
        }
        *index += count;
        Ok(entries)
    }
}

impl<R: Read + Seek> Read for OpenEntry<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.header.size;
        let Cursor::File(pos) = &mut self.cursor else {
            return Err(Error::IsADirectory.into());
        };
        if *pos >= size || buf.is_empty() {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(size - *pos) as usize;
        self.shared
            .read_exact_at(self.header.data_offset + *pos, &mut buf[..n])
            .map_err(io::Error::from)?;
        *pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for OpenEntry<R> {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let size = self.header.size;
        let Cursor::File(pos) = &mut self.cursor else {
            return Err(Error::IsADirectory.into());
        };
        let next = match target {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => *pos as i128 + delta as i128,
            SeekFrom::End(delta) => size as i128 + delta as i128,
        };
        if next < 0 {
            return Err(Error::NegativeSeek.into());
        }
        if next > u64::MAX as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek out of range",
            ));
        }
        // past-end positions are fine; reads there return end-of-input
        *pos = next as u64;
        Ok(*pos)
    }
}
