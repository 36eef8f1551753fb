//! `fumount`: unmount a device mounted with `fmount`.

use clap::Parser;
use fmount_cli::{FumountArgs, init_logging, run_fumount};

fn main() {
    let args = FumountArgs::parse();
    init_logging(args.verbose, args.dry_run);
    std::process::exit(run_fumount(args));
}
