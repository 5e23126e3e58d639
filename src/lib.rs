//! flatfs packs a read-only directory tree into one flat, seekable byte
//! stream and mounts that stream for random-access reads.
//!
//! The stream is self-describing: byte 0 holds the root directory's header
//! record, every header carries the offsets of its name and payload, and a
//! directory's children sit in one contiguous name-sorted block, so lookups
//! binary-search the stream directly instead of loading the tree into
//! memory. Packed streams are immutable once written.
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::Read;
//!
//! use flatfs::{pack, FlatFs, OsSource, PackOptions};
//!
//! # fn demo() -> flatfs::Result<()> {
//! let mut image = File::create("tree.ffs")?;
//! pack(&OsSource::new("some/dir"), &mut image, PackOptions::default())?;
//!
//! let fs = FlatFs::load(File::open("tree.ffs")?)?;
//! let mut contents = String::new();
//! fs.open("etc/hostname")?.read_to_string(&mut contents)?;
//! # Ok(())
//! # }
//! ```

pub mod commands;
mod error;
mod mount;
mod pack;
mod seekbuf;
mod source;
#[cfg(test)]
mod testfs;
mod wire;

pub use error::{Error, Result};
pub use mount::{EntryMeta, FlatFs, OpenEntry};
pub use pack::{pack, PackOptions};
pub use seekbuf::SeekBuf;
pub use source::{OsSource, SourceEntry, SourceFs, SourceStat};
pub use wire::{Header, Mode, HEADER_SIZE, MAGIC};
