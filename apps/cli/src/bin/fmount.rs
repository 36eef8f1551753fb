//! `fmount`: mount a removable or encrypted device.

use clap::Parser;
use fmount_cli::{FmountArgs, init_logging, run_fmount};

fn main() {
    let args = FmountArgs::parse();
    init_logging(args.verbose, args.dry_run);
    std::process::exit(run_fmount(args));
}
