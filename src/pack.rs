/*
 * flatfs packer: walks a source tree depth-first and emits the packed
 * stream in a single pass over a write+seek sink.
 *
 * every entry gets a fixed-size header slot reserved the moment its parent
 * enumerates it, and all of a directory's child slots are reserved before
 * any child is processed. that keeps sibling headers contiguous and sorted
 * on disk, which is what lets the reader binary-search a directory without
 * loading it. payloads and out-of-line names land wherever the end of the
 * stream happens to be; each header is back-patched once its offsets are
 * known.
 */

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::source::{SourceEntry, SourceFs};
use crate::wire::{pack_short_name, Header, HEADER_SIZE, MAGIC, SHORT_NAME_LEN};

const COPY_BUF_SIZE: usize = 65536;

/// Caps applied while packing. The default is no limits and no progress
/// log. A cap of `None` is unlimited.
#[derive(Default)]
pub struct PackOptions<'a> {
    /// Maximum directory depth; the root is depth 0.
    pub max_depth: Option<u32>,
    /// Maximum total stream length in bytes.
    pub max_output_size: Option<u64>,
    /// Maximum number of packed entries, the root included.
    pub max_total_entries: Option<u64>,
    /// Per-entry progress lines are appended here when set.
    pub status_log: Option<&'a mut dyn Write>,
}

struct Task<E> {
    entry: E,
    path: String,
    slot: u64,
    depth: u32,
}

/// Pack `source` into `sink` as one self-describing stream.
///
/// On error the sink is left with whatever bytes were written before the
/// failure; nothing is rolled back.
pub fn pack<S, W>(source: &S, sink: &mut W, opts: PackOptions) -> Result<()>
where
    S: SourceFs,
    W: Write + Seek,
{
    let mut packer = Packer {
        sink,
        opts,
        entries: 0,
    };

    let root = source.open(".")?;
    let slot = packer.reserve_slot()?;
    let mut stack = vec![Task {
        entry: root,
        path: ".".to_string(),
        slot,
        depth: 0,
    }];

    // LIFO pop order gives depth-first traversal. Processing order within
    // a directory is irrelevant; only slot order matters for lookup.
    while let Some(task) = stack.pop() {
        let path = task.path.clone();
        packer
            .pack_one(source, task, &mut stack)
            .map_err(|err| err.at(&path))?;
    }

    debug!(entries = packer.entries, "pack complete");
    Ok(())
}

struct Packer<'a, 'o, W: Write + Seek> {
    sink: &'a mut W,
    opts: PackOptions<'o>,
    entries: u64,
}

impl<W: Write + Seek> Packer<'_, '_, W> {
    fn pack_one<S: SourceFs>(
        &mut self,
        source: &S,
        task: Task<S::Entry>,
        stack: &mut Vec<Task<S::Entry>>,
    ) -> Result<()> {
        let Task {
            mut entry,
            path,
            slot,
            depth,
        } = task;

        let stat = entry.stat()?;
        if let Some(log) = self.opts.status_log.as_mut() {
            writeln!(log, "adding {path}")?;
        }
        trace!(path = %path, slot, depth, "packing entry");

        let name = stat.name.as_bytes();
        let name_offset = if name.len() > SHORT_NAME_LEN {
            self.append_name(name)?
        } else {
            0
        };

        let mut header = Header {
            magic: MAGIC,
            mode: stat.mode,
            short_name: pack_short_name(name),
            name_offset,
            name_size: name.len() as u64,
            data_offset: 0,
            size: 0,
            mtime: stat.mtime,
        };

        if !stat.mode.is_dir() {
            if stat.size > 0 {
                header.data_offset = self.copy_payload(&mut entry, stat.size)?;
            }
            header.size = stat.size;
            return self.patch_header(slot, &header);
        }

        let mut names = entry.children()?;
        names.sort_unstable_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                return Err(Error::DuplicateName(pair[0].clone()));
            }
        }

        if names.is_empty() {
            return self.patch_header(slot, &header);
        }

        if let Some(max) = self.opts.max_depth {
            if depth + 1 > max {
                return Err(Error::DepthLimit {
                    depth: depth + 1,
                    max,
                });
            }
        }

        // Reserve every child's slot before any child is processed so the
        // sibling headers form one contiguous block in sorted order.
        let data_offset = self.seek_end()?;
        for name in &names {
            let child_path = if path == "." {
                name.clone()
            } else {
                format!("{path}/{name}")
            };
            let child = source
                .open(&child_path)
                .map_err(|err| err.at(&child_path))?;
            let child_slot = self.reserve_slot()?;
            stack.push(Task {
                entry: child,
                path: child_path,
                slot: child_slot,
                depth: depth + 1,
            });
        }

        header.data_offset = data_offset;
        header.size = names.len() as u64;
        self.patch_header(slot, &header)
    }

    fn seek_end(&mut self) -> Result<u64> {
        Ok(self.sink.seek(SeekFrom::End(0))?)
    }

    fn check_growth(&self, end_after: u64) -> Result<()> {
        if let Some(max) = self.opts.max_output_size {
            if end_after > max {
                return Err(Error::SizeLimit {
                    need: end_after,
                    max,
                });
            }
        }
        Ok(())
    }

    // Reserve one zero-filled header slot at the end of the stream and
    // return its offset. Checks the entry cap before committing.
    fn reserve_slot(&mut self) -> Result<u64> {
        if let Some(max) = self.opts.max_total_entries {
            if self.entries + 1 > max {
                return Err(Error::EntryLimit(max));
            }
        }
        self.entries += 1;

        let slot = self.seek_end()?;
        self.check_growth(slot + HEADER_SIZE as u64)?;
        self.sink.write_all(&[0u8; HEADER_SIZE])?;
        Ok(slot)
    }

    // Append out-of-line name bytes at the end of the stream.
    fn append_name(&mut self, name: &[u8]) -> Result<u64> {
        let offset = self.seek_end()?;
        self.check_growth(offset + name.len() as u64)?;
        self.sink.write_all(name)?;
        Ok(offset)
    }

    // Stream exactly `size` payload bytes from the source entry to the end
    // of the stream, checking the size cap as the end grows.
    fn copy_payload(&mut self, entry: &mut impl Read, size: u64) -> Result<u64> {
        let start = self.seek_end()?;
        let mut end = start;
        let mut remaining = size;
        let mut buf = vec![0u8; COPY_BUF_SIZE.min(size as usize)];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let got = entry.read(&mut buf[..want])?;
            if got == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source file shrank while packing",
                )));
            }
            self.check_growth(end + got as u64)?;
            self.sink.write_all(&buf[..got])?;
            end += got as u64;
            remaining -= got as u64;
        }
        Ok(start)
    }

    fn patch_header(&mut self, slot: u64, header: &Header) -> Result<()> {
        header.validate()?;
        self.check_growth(slot + HEADER_SIZE as u64)?;
        self.sink.seek(SeekFrom::Start(slot))?;
        self.sink.write_all(&header.encode())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seekbuf::SeekBuf;
    use crate::testfs::{MemSource, Node};
    use crate::wire::Mode;

    fn sample_tree() -> MemSource {
        MemSource::new(
            Node::dir()
                .add("test1.txt", Node::file("test1"))
                .add("test2.txt", Node::file("test2"))
                .add("a", Node::dir())
                .add(
                    "b",
                    Node::dir().add(
                        "c",
                        Node::dir()
                            .add("test1.txt", Node::file("t1"))
                            .add("test2.txt", Node::file("t2"))
                            .add("hi.png", Node::file(&[0x89u8, 0x50, 0x4e, 0x47][..])),
                    ),
                ),
        )
    }

    fn pack_to_buf(source: &MemSource, opts: PackOptions) -> Result<SeekBuf> {
        let mut buf = SeekBuf::new();
        pack(source, &mut buf, opts)?;
        Ok(buf)
    }

    // Strip path wrappers down to the root cause.
    fn inner(err: &Error) -> &Error {
        match err {
            Error::Path { source, .. } => inner(source),
            other => other,
        }
    }

    fn header_at(bytes: &[u8], offset: u64) -> Header {
        let offset = offset as usize;
        let header = Header::decode(bytes[offset..offset + HEADER_SIZE].try_into().unwrap());
        header.validate().unwrap();
        header
    }

    fn name_of(bytes: &[u8], header: &Header) -> Vec<u8> {
        if header.name_size <= SHORT_NAME_LEN as u64 {
            header.short_name_bytes().to_vec()
        } else {
            let start = header.name_offset as usize;
            bytes[start..start + header.name_size as usize].to_vec()
        }
    }

    #[test]
    fn root_header_is_a_valid_directory() {
        let buf = pack_to_buf(&sample_tree(), PackOptions::default()).unwrap();
        let root = header_at(buf.as_slice(), 0);
        assert!(root.is_dir());
        assert_eq!(root.size, 4);
        assert_eq!(name_of(buf.as_slice(), &root), b".");
    }

    #[test]
    fn sibling_headers_are_contiguous_and_sorted() {
        let buf = pack_to_buf(&sample_tree(), PackOptions::default()).unwrap();
        let bytes = buf.as_slice();
        let root = header_at(bytes, 0);

        let mut names = Vec::new();
        for i in 0..root.size {
            let child = header_at(bytes, root.data_offset + i * HEADER_SIZE as u64);
            names.push(name_of(bytes, &child));
        }
        assert_eq!(names, vec![b"a".to_vec(), b"b".to_vec(), b"test1.txt".to_vec(), b"test2.txt".to_vec()]);
        for pair in names.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn long_names_spill_out_of_line_with_inline_prefix() {
        let source = MemSource::new(
            Node::dir()
                .add("a_very_long_file_name.txt", Node::file("x"))
                .add("short", Node::file("y")),
        );
        let buf = pack_to_buf(&source, PackOptions::default()).unwrap();
        let bytes = buf.as_slice();
        let root = header_at(bytes, 0);

        let long = header_at(bytes, root.data_offset);
        assert_eq!(long.name_size, 25);
        assert_ne!(long.name_offset, 0);
        assert_eq!(&long.short_name, b"a_very_l");
        assert_eq!(name_of(bytes, &long), b"a_very_long_file_name.txt");

        let short = header_at(bytes, root.data_offset + HEADER_SIZE as u64);
        assert_eq!(short.name_size, 5);
        assert_eq!(short.name_offset, 0);
        assert_eq!(short.short_name_bytes(), b"short");
    }

    #[test]
    fn empty_directory_packs_with_zero_size() {
        let source = MemSource::new(Node::dir().add("empty", Node::dir()));
        let buf = pack_to_buf(&source, PackOptions::default()).unwrap();
        let bytes = buf.as_slice();
        let root = header_at(bytes, 0);
        let empty = header_at(bytes, root.data_offset);
        assert!(empty.is_dir());
        assert_eq!(empty.size, 0);
    }

    #[test]
    fn file_payload_and_metadata_roundtrip_on_disk() {
        let source = MemSource::new(Node::dir().add("data.bin", Node::file("payload!")));
        let buf = pack_to_buf(&source, PackOptions::default()).unwrap();
        let bytes = buf.as_slice();
        let root = header_at(bytes, 0);
        let file = header_at(bytes, root.data_offset);

        assert!(!file.is_dir());
        assert_eq!(file.size, 8);
        assert_eq!(file.mode.permissions(), 0o644);
        assert_eq!(file.mtime, 1_700_000_000);
        let start = file.data_offset as usize;
        assert_eq!(&bytes[start..start + 8], b"payload!");
    }

    #[test]
    fn entry_limit_is_enforced() {
        let source = MemSource::new(
            Node::dir()
                .add("file1", Node::file("hi"))
                .add("file2", Node::file("hi 2")),
        );

        let err = pack_to_buf(
            &source,
            PackOptions {
                max_total_entries: Some(1),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(inner(&err), Error::EntryLimit(1)));

        pack_to_buf(
            &source,
            PackOptions {
                max_total_entries: Some(8),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn size_limit_is_enforced() {
        let source = MemSource::new(Node::dir().add("big", Node::file(vec![0xabu8; 4096])));

        let err = pack_to_buf(
            &source,
            PackOptions {
                max_output_size: Some(1024),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(inner(&err), Error::SizeLimit { .. }));

        pack_to_buf(
            &source,
            PackOptions {
                max_output_size: Some(64 * 1024),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut node = Node::file("leaf");
        for i in (0..12).rev() {
            node = Node::dir().add(&format!("d{i}"), node);
        }
        let source = MemSource::new(node);

        let err = pack_to_buf(
            &source,
            PackOptions {
                max_depth: Some(6),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(inner(&err), Error::DepthLimit { .. }));

        pack_to_buf(
            &source,
            PackOptions {
                max_depth: Some(12),
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let source = MemSource::new(
            Node::dir()
                .add("twin", Node::file("a"))
                .add("twin", Node::file("b")),
        );
        let err = pack_to_buf(&source, PackOptions::default()).unwrap_err();
        assert!(matches!(inner(&err), Error::DuplicateName(_)));
    }

    #[test]
    fn status_log_gets_one_line_per_entry() {
        let mut log = Vec::new();
        let mut buf = SeekBuf::new();
        pack(
            &sample_tree(),
            &mut buf,
            PackOptions {
                status_log: Some(&mut log),
                ..Default::default()
            },
        )
        .unwrap();

        let log = String::from_utf8(log).unwrap();
        assert_eq!(log.lines().count(), 9);
        assert!(log.lines().any(|line| line == "adding ."));
        assert!(log.lines().any(|line| line == "adding b/c/hi.png"));
    }

    #[test]
    fn empty_file_has_no_payload() {
        let source = MemSource::new(Node::dir().add("void", Node::file("")));
        let buf = pack_to_buf(&source, PackOptions::default()).unwrap();
        let bytes = buf.as_slice();
        let root = header_at(bytes, 0);
        let void = header_at(bytes, root.data_offset);
        assert_eq!(void.size, 0);
        assert_eq!(void.data_offset, 0);
    }

    #[test]
    fn mode_directory_bit_matches_entry_kind() {
        let buf = pack_to_buf(&sample_tree(), PackOptions::default()).unwrap();
        let bytes = buf.as_slice();
        let root = header_at(bytes, 0);
        for i in 0..root.size {
            let child = header_at(bytes, root.data_offset + i * HEADER_SIZE as u64);
            let name = name_of(bytes, &child);
            let expect_dir = name == b"a" || name == b"b";
            assert_eq!(child.is_dir(), expect_dir, "entry {:?}", name);
            assert_eq!(child.mode.contains(Mode::DIR), expect_dir);
        }
    }
}
