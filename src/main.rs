use aufs::cli_interface::{run, AufsCli};
use clap::Parser;
/// a CLI interface to users to create our filesystem,
/// or to inspect and change the files of an image without mounting it in the kernel.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = AufsCli::parse();
    let stdout = std::io::stdout();
    run(args, &mut stdout.lock())
}
