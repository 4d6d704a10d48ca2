//! # gatecheck - Server-side push gatekeeper
//!
//! A pre-receive hook that inspects every newly pushed commit and the files
//! it touches, runs structural and style checks (external syntax checkers
//! included) and rejects the push when a non-waivable problem is found.
//!
//! ## How a push is evaluated
//!
//! - Ref-update lines arrive on stdin, one per pushed ref.
//! - The newly introduced commits are materialized per ref, oldest first,
//!   each commit checked at most once per push.
//! - Checks run at three scopes: the whole commit list, each commit, and
//!   each changed file. External checkers run concurrently in a bounded
//!   worker pool with the blob content piped to their stdin.
//! - Every problem is reported before the decision; commits tagged `[WIP]`,
//!   `[HOTFIX]`, `[MESS]` or `[TEMP]` may fail softly.

pub mod checks;
pub mod cli;
pub mod config;
pub mod exec;
pub mod git;

pub use checks::{CheckResult, Context, Problem, Severity};
pub use cli::Cli;
pub use config::GatecheckConfig;

/// Result type alias for gatecheck operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
