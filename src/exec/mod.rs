//! Concurrent check executor
//!
//! Walks the pushed refs in input order, runs every in-process check inline
//! and pools the external checker invocations. Result slots are allocated
//! in traversal order (list checks, commits oldest first, files in diff
//! order) so the report sequence is stable no matter which subprocess
//! finished first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use git2::Oid;
use tracing::debug;

use crate::checks::{
    self, CheckResult, Context, FileCheck, Problem, Severity,
};
use crate::config::checkers::{checker_by_name, CheckerSpec};
use crate::git::commit::{ChangedFile, Commit};
use crate::git::refs::{build_commit_list, RefUpdate};

pub mod pool;

pub use pool::CommandJob;

/// Evaluate one push: every applicable check against every ref update, all
/// problems collected before any decision. Results keep their scheduling
/// order.
pub fn evaluate_push(ctx: &Context, updates: &[RefUpdate]) -> Vec<CheckResult> {
    let list_checks = checks::list_checks(ctx.config);
    let commit_checks = checks::commit_checks(ctx.config);
    let file_checks = checks::file_checks(ctx.config);
    let timeout = Duration::from_secs(ctx.config.executor.timeout_secs);

    let mut slots: Vec<Option<CheckResult>> = Vec::new();
    let mut jobs: Vec<CommandJob> = Vec::new();
    let mut seen_commits: HashSet<Oid> = HashSet::new();

    for update in updates {
        if !update.relevant() {
            debug!(ref_name = %update.ref_name, "skipping unrecognized ref");
            continue;
        }
        if update.is_delete() {
            // Deletions never carry content and never fail.
            continue;
        }

        let list = match build_commit_list(ctx.git, update, &mut seen_commits) {
            Ok(list) => list,
            Err(err) => {
                // Fatal for this ref update only; the others continue.
                slots.push(Some(
                    CheckResult::new("ResolveRef", update.ref_name.as_str()).with_problems(vec![
                        Problem::new(Severity::Error, err.to_string()),
                    ]),
                ));
                continue;
            }
        };
        if list.commits.is_empty() {
            // Delete-only updates and pushes of already-known commits are
            // accepted unconditionally.
            continue;
        }

        for check in &list_checks {
            if !check.applies_to(&list) {
                continue;
            }
            slots.push(Some(
                CheckResult::new(check.name(), list.description())
                    .with_problems(check.run(ctx, &list)),
            ));
        }

        if list.is_tag {
            // The tagged commit was already validated when it reached a
            // branch; only the list-level checks apply.
            continue;
        }

        let tip = list.commits.last().cloned();
        let mut configs_present: HashMap<&'static str, bool> = HashMap::new();

        for commit in &list.commits {
            let waivable = commit.has_waiver_tag(&ctx.config.waivers.tags);

            for check in &commit_checks {
                if !check.applies_to(commit) {
                    continue;
                }
                slots.push(Some(
                    CheckResult::new(check.name(), commit.short_id())
                        .with_problems(check.run(ctx, commit))
                        .waivable(waivable),
                ));
            }

            let files = match ctx.git.changed_files(commit) {
                Ok(files) => files,
                Err(err) => {
                    slots.push(Some(
                        CheckResult::new("ResolveCommit", commit.short_id())
                            .with_problems(vec![Problem::new(Severity::Error, err.to_string())]),
                    ));
                    continue;
                }
            };

            for file in files.iter().filter(|f| f.checkable()) {
                let content = match ctx.git.blob(file.new_blob) {
                    Ok(content) => content,
                    Err(err) => {
                        slots.push(Some(
                            CheckResult::new("ResolveBlob", file.describe(commit))
                                .with_problems(vec![Problem::new(
                                    Severity::Error,
                                    err.to_string(),
                                )]),
                        ));
                        continue;
                    }
                };

                for check in &file_checks {
                    if !check.applies_to(file, &content) {
                        continue;
                    }
                    match *check {
                        FileCheck::Command(spec) => {
                            if !command_ready(ctx, spec, tip.as_deref(), &mut configs_present) {
                                continue;
                            }
                            if superseded(ctx, spec, file, &content, tip.as_deref(), &mut configs_present) {
                                continue;
                            }
                            let slot = slots.len();
                            slots.push(None);
                            jobs.push(build_job(
                                ctx, slot, spec, commit, file, content.clone(), waivable, timeout,
                            ));
                        }
                        inline => {
                            slots.push(Some(
                                CheckResult::new(inline.name(), file.describe(commit))
                                    .with_problems(inline.run(ctx, commit, file, &content))
                                    .waivable(waivable),
                            ));
                        }
                    }
                }
            }
        }
    }

    for (slot, result) in pool::run_jobs(jobs, ctx.config.executor.max_workers) {
        slots[slot] = Some(result);
    }
    slots.into_iter().flatten().collect()
}

/// Whether a checker can run at all: binary on PATH, config requirement
/// satisfied against the pushed tip. Absence skips the checker, it never
/// fails the push.
fn command_ready(
    ctx: &Context,
    spec: &'static CheckerSpec,
    tip: Option<&Commit>,
    configs_present: &mut HashMap<&'static str, bool>,
) -> bool {
    if ctx.command_path(spec.name).is_none() {
        debug!(checker = spec.name, "skipping checker, binary not on PATH");
        return false;
    }
    let present = *configs_present
        .entry(spec.name)
        .or_insert_with(|| config_committed(ctx, spec, tip));
    if spec.config_required && !present {
        debug!(checker = spec.name, "skipping checker, required config not committed");
        return false;
    }
    true
}

/// Config candidates are resolved against the tip tree of the branch being
/// pushed, never against the server's working directory.
fn config_committed(ctx: &Context, spec: &CheckerSpec, tip: Option<&Commit>) -> bool {
    let Some(tip) = tip else {
        return false;
    };
    spec.config_files
        .iter()
        .any(|candidate| ctx.git.tree_has_path(tip, candidate).unwrap_or(false))
}

/// A checker stands down when a preferred alternative would run on the same
/// file.
fn superseded(
    ctx: &Context,
    spec: &CheckerSpec,
    file: &ChangedFile,
    content: &[u8],
    tip: Option<&Commit>,
    configs_present: &mut HashMap<&'static str, bool>,
) -> bool {
    spec.preferred.iter().any(|name| {
        checker_by_name(name).is_some_and(|preferred| {
            preferred.applies_to(file, content)
                && command_ready(ctx, preferred, tip, configs_present)
        })
    })
}

#[allow(clippy::too_many_arguments)]
fn build_job(
    ctx: &Context,
    slot: usize,
    spec: &'static CheckerSpec,
    commit: &Commit,
    file: &ChangedFile,
    content: Arc<[u8]>,
    waivable: bool,
    timeout: Duration,
) -> CommandJob {
    let mut args: Vec<String> = spec.args[1..].iter().map(|s| s.to_string()).collect();
    if spec.append_filepath {
        args.push(file.path.clone());
    }
    CommandJob {
        slot,
        check_name: FileCheck::Command(spec).name(),
        target: file.describe(commit),
        // PATH resolution was already cached by command_ready.
        exe: ctx.command_path(spec.name).unwrap_or_default(),
        args,
        content,
        spec,
        waivable,
        waive_tool_failures: ctx.config.waivers.cover_tool_failures,
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatecheckConfig;
    use crate::git::fake::{oid, FakeGit};

    const NOW: i64 = 1_800_000_000;

    fn update(old: u64, new: u64, ref_name: &str) -> RefUpdate {
        RefUpdate {
            old: if old == 0 { Oid::zero() } else { oid(old) },
            new: if new == 0 { Oid::zero() } else { oid(new) },
            ref_name: ref_name.to_string(),
        }
    }

    fn clean_repo() -> FakeGit {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base module\n");
        git.add_commit(2, &[1], "Add follow-up module\n");
        git
    }

    #[test]
    fn delete_updates_yield_zero_results() {
        let git = clean_repo();
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);
        let results = evaluate_push(&ctx, &[update(2, 0, "refs/heads/main")]);
        assert!(results.is_empty());
    }

    #[test]
    fn clean_push_produces_no_failures() {
        let git = clean_repo();
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);
        let results = evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]);
        assert!(results.iter().all(|r| !r.failed()));
    }

    #[test]
    fn duplicate_summaries_fail_the_push() {
        let mut git = FakeGit::new();
        let summary = "Add nagios check for early expiration of licenses";
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], &format!("{summary}\n"));
        git.add_commit(3, &[2], &format!("{summary}\n"));
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);

        let results = evaluate_push(&ctx, &[update(1, 3, "refs/heads/main")]);
        let duplicates: Vec<&CheckResult> = results
            .iter()
            .filter(|r| r.check_name == "CheckDuplicateCommitSummaries" && r.failed())
            .collect();
        assert_eq!(duplicates.len(), 1);
        assert!(duplicates[0].problems[0].message.contains("duplicated 2 times"));
        assert!(results.iter().any(|r| r.blocks_push()));
    }

    #[test]
    fn unknown_object_fails_only_that_ref() {
        let git = clean_repo();
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);
        let results = evaluate_push(
            &ctx,
            &[
                update(1, 99, "refs/heads/broken"),
                update(1, 2, "refs/heads/main"),
            ],
        );
        let resolve_failures: Vec<&CheckResult> = results
            .iter()
            .filter(|r| r.check_name == "ResolveRef")
            .collect();
        assert_eq!(resolve_failures.len(), 1);
        assert!(resolve_failures[0].failed());
        // The healthy ref was still evaluated.
        assert!(results.iter().any(|r| r.check_name == "CheckCommitSummary"));
    }

    #[test]
    fn waiver_tag_softens_file_problems() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "[WIP] Quick patch\n");
        git.add_blob(10, b"{broken json");
        git.add_file(2, "conf/settings.json", 10, 0o100644);
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);

        let results = evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]);
        let json_result = results
            .iter()
            .find(|r| r.check_name == "CheckJson")
            .expect("json check ran");
        assert!(json_result.failed());
        assert!(json_result.can_soft_fail());
        assert!(results.iter().all(|r| !r.blocks_push()));
    }

    #[test]
    fn malformed_file_without_waiver_blocks() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add settings\n");
        git.add_blob(10, b"{broken json");
        git.add_file(2, "conf/settings.json", 10, 0o100644);
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);

        let results = evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]);
        assert!(results.iter().any(|r| r.blocks_push()));
    }

    #[test]
    fn tag_updates_run_list_checks_only() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "this summary would warn\n");
        git.add_blob(10, b"{broken json");
        git.add_file(1, "conf/settings.json", 10, 0o100644);
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);

        let results = evaluate_push(&ctx, &[update(0, 1, "refs/tags/v1.0")]);
        assert!(results
            .iter()
            .all(|r| r.check_name != "CheckJson" && r.check_name != "CheckCommitSummary"));
    }

    #[test]
    fn executable_bit_scenario() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add runner script\n");
        git.add_blob(10, b"echo hi\n");
        git.add_file(2, "bin/runner", 10, 0o100755);
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);

        let results = evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]);
        let executable = results
            .iter()
            .find(|r| r.check_name == "CheckExecutable")
            .expect("executable check ran");
        assert!(executable.failed());
        assert!(executable.problems[0]
            .message
            .contains("executable file without shebang"));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "add messy summary.\n");
        git.add_blob(10, b"{\"ok\": true}");
        git.add_file(2, "conf/settings.json", 10, 0o100644);
        let config = GatecheckConfig::default();

        let render = |results: &[CheckResult]| {
            results
                .iter()
                .map(|r| {
                    format!(
                        "{}|{}|{}",
                        r.check_name,
                        r.target,
                        r.problems
                            .iter()
                            .map(|p| p.message.clone())
                            .collect::<Vec<_>>()
                            .join(";")
                    )
                })
                .collect::<Vec<_>>()
        };

        let ctx = Context::with_now(&git, &config, NOW);
        let first = render(&evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]));
        let ctx = Context::with_now(&git, &config, NOW);
        let second = render(&evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]));
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn results_keep_traversal_order() {
        let mut git = FakeGit::new();
        git.add_commit(1, &[], "Add base\n");
        git.add_commit(2, &[1], "Add files\n");
        git.add_blob(10, b"{\"ok\": true}");
        git.add_blob(11, b"key: value\n");
        git.add_file(2, "a.json", 10, 0o100644);
        git.add_file(2, "b.yaml", 11, 0o100644);
        let config = GatecheckConfig::default();
        let ctx = Context::with_now(&git, &config, NOW);

        let results = evaluate_push(&ctx, &[update(1, 2, "refs/heads/main")]);
        let positions: Vec<usize> = ["CheckJson", "CheckYaml"]
            .iter()
            .map(|name| {
                results
                    .iter()
                    .position(|r| r.check_name.as_str() == *name)
                    .expect("check ran")
            })
            .collect();
        // Commit-level results come first, then files in diff order.
        assert!(positions[0] < positions[1]);
        let summary_position = results
            .iter()
            .position(|r| r.check_name == "CheckCommitSummary")
            .expect("summary check ran");
        assert!(summary_position < positions[0]);
    }
}
