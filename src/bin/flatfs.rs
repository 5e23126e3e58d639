use anyhow::anyhow;
use flatfs::commands;

// no clap: three subcommands with positional args don't justify the
// dependency or the startup cost
pub fn main() -> anyhow::Result<()> {
    let args = std::env::args().collect::<Vec<_>>();

    let subcommand = args.get(1).ok_or_else(|| anyhow!("missing subcommand"))?;
    match subcommand.as_str() {
        "pack" => {
            let src_dir = args.get(2).ok_or_else(|| anyhow!("missing source dir"))?;
            let out_path = args.get(3).ok_or_else(|| anyhow!("missing output path"))?;
            commands::pack::main(src_dir, out_path)
        }

        "list" => {
            let image = args.get(2).ok_or_else(|| anyhow!("missing image path"))?;
            commands::list::main(image)
        }

        "cat" => {
            let image = args.get(2).ok_or_else(|| anyhow!("missing image path"))?;
            let path = args.get(3).ok_or_else(|| anyhow!("missing entry path"))?;
            commands::cat::main(image, path)
        }

        _ => Err(anyhow!("unknown subcommand: {}", subcommand)),
    }
}
