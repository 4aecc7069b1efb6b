//! The main entrypoint for ksaccounts, which applies kickstart account
//! directives to a target system.

use std::io::Write;

use anyhow::Result;
use owo_colors::OwoColorize;

fn run() -> Result<()> {
    ksaccounts_utils::initialize_tracing();
    tracing::trace!("starting {}", env!("CARGO_PKG_NAME"));
    ksaccounts_lib::cli::run_from_iter(std::env::args())
}

fn main() {
    // In order to print the error in a custom format (with :#) our
    // main simply invokes a run() where all the work is done.
    // This code just captures any errors.
    if let Err(e) = run() {
        let mut stderr = anstream::stderr();
        // Don't panic if writing fails
        let _ = writeln!(stderr, "{}{:#}", "error: ".red(), e);
        std::process::exit(1);
    }
}
