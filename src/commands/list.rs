use std::fs::File;
use std::io::{self, Read, Seek, Write};

use crate::mount::FlatFs;

pub fn main(image: &str) -> anyhow::Result<()> {
    let fs = FlatFs::load(File::open(image)?)?;
    let mut stdout = io::stdout().lock();
    walk(&fs, ".", &mut stdout)?;
    Ok(())
}

fn walk<R: Read + Seek>(
    fs: &FlatFs<R>,
    path: &str,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut dir = fs.open(path)?;
    for entry in dir.read_dir(-1)? {
        let child = if path == "." {
            entry.name.clone()
        } else {
            format!("{path}/{}", entry.name)
        };
        if entry.is_dir() {
            writeln!(out, "{child}/")?;
            walk(fs, &child, out)?;
        } else {
            writeln!(out, "{child}\t{}", entry.size)?;
        }
    }
    Ok(())
}
