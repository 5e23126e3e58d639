use std::fs::File;
use std::io;

use crate::mount::FlatFs;

pub fn main(image: &str, path: &str) -> anyhow::Result<()> {
    let fs = FlatFs::load(File::open(image)?)?;
    let mut entry = fs.open(path)?;
    io::copy(&mut entry, &mut io::stdout().lock())?;
    Ok(())
}
