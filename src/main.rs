use std::process::ExitCode;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use gatecheck::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_env("GATECHECK_LOG")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.run() {
        Ok(code) => code,
        Err(err) => {
            // An internal failure must never reject the push; the commits
            // are accepted and the error is surfaced to the pusher.
            eprintln!();
            eprintln!(
                "{} an internal error occurred, the commits are accepted: {err:#}",
                style("⚠").yellow()
            );
            ExitCode::SUCCESS
        }
    }
}
