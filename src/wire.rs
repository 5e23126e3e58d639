//! The on-stream header record: a fixed-width little-endian block that
//! begins every file or directory in a packed stream. All offsets are
//! absolute from byte 0 of the stream.

use std::mem::size_of;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

/// Identifies every header record in a packed stream.
pub const MAGIC: [u8; 8] = *b"1337FILE";

/// Bytes of the base name stored inline in the header. Longer names spill
/// out of line, but their first eight bytes still live here.
pub const SHORT_NAME_LEN: usize = 8;

/// Size in bytes of one encoded header record.
pub const HEADER_SIZE: usize = size_of::<RawHeader>();

// A record must be wider than the integers it frames; anything this small
// means the field layout below got mangled.
const _: () = assert!(HEADER_SIZE > 8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub(crate) struct LeU64(u64);

impl LeU64 {
    pub fn new(value: u64) -> Self {
        Self(value.to_le())
    }

    pub fn get(self) -> u64 {
        u64::from_le(self.0)
    }
}

/// Serialized field layout. Every field is eight bytes, so the struct has
/// no padding and can round-trip through `bytemuck`.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 8],
    mode: LeU64,
    short_name: [u8; SHORT_NAME_LEN],
    name_offset: LeU64,
    name_size: LeU64,
    data_offset: LeU64,
    size: LeU64,
    mtime: LeU64,
}

bitflags! {
    /// Permission and type bits carried in an entry's mode word. The
    /// directory bit is the sole source of truth for "is a directory".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mode: u64 {
        /// Set on directory entries.
        const DIR = 1 << 31;
    }
}

impl Mode {
    pub fn is_dir(self) -> bool {
        self.contains(Mode::DIR)
    }

    /// Unix permission bits, `rwxrwxrwx`.
    pub fn permissions(self) -> u32 {
        (self.bits() & 0o777) as u32
    }
}

/// One decoded header record.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: [u8; 8],
    pub mode: Mode,
    pub short_name: [u8; SHORT_NAME_LEN],
    /// Offset of the out-of-line name bytes; 0 (and unread) when the name
    /// fits inline.
    pub name_offset: u64,
    /// Length in bytes of the entry's base name.
    pub name_size: u64,
    /// Payload offset for files; offset of the first child header for
    /// directories.
    pub data_offset: u64,
    /// Payload length in bytes for files; child count for directories.
    pub size: u64,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        bytemuck::cast(RawHeader {
            magic: self.magic,
            mode: LeU64::new(self.mode.bits()),
            short_name: self.short_name,
            name_offset: LeU64::new(self.name_offset),
            name_size: LeU64::new(self.name_size),
            data_offset: LeU64::new(self.data_offset),
            size: LeU64::new(self.size),
            mtime: LeU64::new(self.mtime as u64),
        })
    }

    /// Decoding a full-sized record cannot fail; a short read upstream is
    /// the "record smaller than expected" case and surfaces there.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Header {
        let raw: RawHeader = bytemuck::cast(*buf);
        Header {
            magic: raw.magic,
            mode: Mode::from_bits_retain(raw.mode.get()),
            short_name: raw.short_name,
            name_offset: raw.name_offset.get(),
            name_size: raw.name_size.get(),
            data_offset: raw.data_offset.get(),
            size: raw.size.get(),
            mtime: raw.mtime.get() as i64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::BadMagic);
        }
        if self.is_dir() && self.size > i32::MAX as u64 {
            return Err(Error::OversizeDirectory(self.size));
        }
        Ok(())
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    /// The inline portion of the base name: the first min(8, NameSize)
    /// bytes, always present regardless of name length.
    pub fn short_name_bytes(&self) -> &[u8] {
        &self.short_name[..self.name_size.min(SHORT_NAME_LEN as u64) as usize]
    }

    /// Diagnostic label: the inline name prefix, with an ellipsis when the
    /// full name lives out of line.
    pub fn short_label(&self) -> String {
        let prefix = String::from_utf8_lossy(self.short_name_bytes());
        if self.name_size > SHORT_NAME_LEN as u64 {
            format!("{prefix}...")
        } else {
            prefix.into_owned()
        }
    }
}

/// Inline name field for a given base name: first eight bytes, zero-padded.
pub(crate) fn pack_short_name(name: &[u8]) -> [u8; SHORT_NAME_LEN] {
    let mut short = [0u8; SHORT_NAME_LEN];
    let n = name.len().min(SHORT_NAME_LEN);
    short[..n].copy_from_slice(&name[..n]);
    short
}
