//! Command-line interface for gatecheck
//!
//! The binary is the pre-receive hook itself: it reads ref-update lines on
//! stdin, evaluates every check and maps the decision to the exit status.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::debug;

use crate::checks::Context;
use crate::config::GatecheckConfig;
use crate::exec::evaluate_push;
use crate::git::refs::read_updates;
use crate::git::Repo;

pub mod report;

/// gatecheck - reject pushes that fail the configured checks
#[derive(Parser)]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Server-side configuration file overriding the pushed one
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Suppress the closing verdict line
    #[arg(short, long)]
    pub quiet: bool,

    /// Log check scheduling and subprocess lifecycle to stderr
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    /// Evaluate the push described on stdin and return the exit status git
    /// expects from a pre-receive hook.
    pub fn run(&self) -> Result<ExitCode> {
        let updates = read_updates(io::stdin().lock())
            .context("failed to read ref updates from stdin")?;
        if updates.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }

        let repo = Repo::open().context("failed to open the repository")?;
        let config = match &self.config {
            Some(path) => GatecheckConfig::from_file(path)?,
            None => GatecheckConfig::from_push(&repo, &updates),
        };
        debug!(updates = updates.len(), "evaluating push");

        let ctx = Context::new(&repo, &config);
        let results = evaluate_push(&ctx, &updates);

        let mut stdout = io::stdout().lock();
        report::render(&results, &mut stdout)?;
        if !self.quiet {
            report::render_verdict(&results, &mut stdout)?;
        }

        if report::push_blocked(&results) {
            Ok(ExitCode::FAILURE)
        } else {
            Ok(ExitCode::SUCCESS)
        }
    }
}
