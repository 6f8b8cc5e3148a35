//! Binary entrypoint for the `smart-recall` command-line tool.

use std::process::ExitCode;

use smart_recall::cli;

fn main() -> ExitCode {
    cli::run()
}
