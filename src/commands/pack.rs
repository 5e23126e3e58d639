use std::fs::File;
use std::io;

use crate::pack::{pack, PackOptions};
use crate::source::OsSource;

pub fn main(src_dir: &str, out_path: &str) -> anyhow::Result<()> {
    let source = OsSource::new(src_dir);
    let mut out = File::create(out_path)?;

    let mut stderr = io::stderr();
    pack(
        &source,
        &mut out,
        PackOptions {
            status_log: Some(&mut stderr),
            ..Default::default()
        },
    )?;

    Ok(())
}
