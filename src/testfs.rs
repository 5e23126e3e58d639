//! In-memory source tree for tests: a `SourceFs` built from literal nodes,
//! so packing scenarios don't touch the real filesystem.

use std::io::{self, Cursor, Read};

use crate::error::{Error, Result};
use crate::source::{SourceEntry, SourceFs, SourceStat};
use crate::wire::Mode;

const TEST_MTIME: i64 = 1_700_000_000;

pub(crate) enum Node {
    File { data: Vec<u8> },
    // children as a plain list so tests can express duplicate names and
    // unsorted insertion order
    Dir { children: Vec<(String, Node)> },
}

impl Node {
    pub fn file(data: impl Into<Vec<u8>>) -> Node {
        Node::File { data: data.into() }
    }

    pub fn dir() -> Node {
        Node::Dir {
            children: Vec::new(),
        }
    }

    pub fn add(mut self, name: &str, node: Node) -> Node {
        match &mut self {
            Node::Dir { children } => children.push((name.to_string(), node)),
            Node::File { .. } => panic!("add() on a file node"),
        }
        self
    }
}

pub(crate) struct MemSource {
    root: Node,
}

impl MemSource {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    fn find(&self, path: &str) -> Option<&Node> {
        if path == "." {
            return Some(&self.root);
        }
        let mut node = &self.root;
        for component in path.split('/') {
            match node {
                Node::Dir { children } => {
                    node = children
                        .iter()
                        .find(|(name, _)| name == component)
                        .map(|(_, child)| child)?;
                }
                Node::File { .. } => return None,
            }
        }
        Some(node)
    }
}

pub(crate) struct MemEntry {
    stat: SourceStat,
    data: Cursor<Vec<u8>>,
    children: Vec<String>,
}

impl SourceFs for MemSource {
    type Entry = MemEntry;

    fn open(&self, path: &str) -> Result<MemEntry> {
        let node = self.find(path).ok_or(Error::NotFound)?;
        let name = if path == "." {
            ".".to_string()
        } else {
            path.rsplit('/').next().unwrap().to_string()
        };
        Ok(match node {
            Node::File { data } => MemEntry {
                stat: SourceStat {
                    name,
                    size: data.len() as u64,
                    mode: Mode::from_bits_retain(0o644),
                    mtime: TEST_MTIME,
                },
                data: Cursor::new(data.clone()),
                children: Vec::new(),
            },
            Node::Dir { children } => MemEntry {
                stat: SourceStat {
                    name,
                    size: 0,
                    mode: Mode::from_bits_retain(0o755) | Mode::DIR,
                    mtime: TEST_MTIME,
                },
                data: Cursor::new(Vec::new()),
                children: children.iter().map(|(name, _)| name.clone()).collect(),
            },
        })
    }
}

impl Read for MemEntry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl SourceEntry for MemEntry {
    fn stat(&self) -> Result<SourceStat> {
        Ok(self.stat.clone())
    }

    fn children(&mut self) -> Result<Vec<String>> {
        Ok(self.children.clone())
    }
}
