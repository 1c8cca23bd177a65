#![forbid(unsafe_code)]

//! dlobby — rclone remote capacity overview, CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    cli_app::init_logging(&args);
    if let Err(e) = cli_app::run(&args) {
        eprintln!("dlobby: {e}");
        std::process::exit(e.exit_code());
    }
}
