//! Checks over a whole commit list

use std::sync::Arc;

use crate::git::commit::{Commit, CommitList};

use super::{Context, Problem, Severity};

/// Flag repeated commit summaries within one push.
///
/// Summaries are prefix-matched, not exact-matched, so "Fix the bug" and
/// "Fix the bug really" count as duplicates too.
pub fn duplicate_summaries(list: &CommitList) -> Vec<Problem> {
    let mut sorted: Vec<&Arc<Commit>> = list.commits.iter().collect();
    sorted.sort_by(|a, b| a.summary().cmp(b.summary()));

    let mut problems = Vec::new();
    let mut group: Vec<&Arc<Commit>> = Vec::new();
    for commit in sorted {
        if let Some(first) = group.first() {
            if !first.summary().is_empty() && commit.summary().starts_with(first.summary()) {
                group.push(commit);
                continue;
            }
            flush_group(&group, &mut problems);
        }
        group = vec![commit];
    }
    flush_group(&group, &mut problems);
    problems
}

fn flush_group(group: &[&Arc<Commit>], problems: &mut Vec<Problem>) {
    if group.len() < 2 {
        return;
    }
    // Sorted order puts the prefix first.
    let summary = group[0].summary();
    let commits = group
        .iter()
        .map(|c| c.short_id())
        .collect::<Vec<_>>()
        .join(", ");
    problems.push(Problem::new(
        Severity::Error,
        format!(
            "summary \"{}\" duplicated {} times ({})",
            summary,
            group.len(),
            commits
        ),
    ));
}

/// Validate commit timestamps across the list: nothing in the future, the
/// author never after the committer, and committer timestamps never going
/// backwards along the history.
pub fn timestamps(ctx: &Context, list: &CommitList) -> Vec<Problem> {
    let tolerance = ctx.config.timestamp_tolerance_secs;
    let mut problems = Vec::new();
    let mut previous_author = i64::MIN;
    let mut previous_committer = i64::MIN;

    for commit in &list.commits {
        let author = commit.author.timestamp;
        let committer = commit.committer.timestamp;
        if author > ctx.now + tolerance {
            problems.push(Problem::new(
                Severity::Error,
                format!("author timestamp of commit {} in future", commit.short_id()),
            ));
        }
        if committer > ctx.now + tolerance {
            problems.push(Problem::new(
                Severity::Error,
                format!(
                    "committer timestamp of commit {} in future",
                    commit.short_id()
                ),
            ));
        }
        if author > committer {
            problems.push(Problem::new(
                Severity::Error,
                format!(
                    "author timestamp of commit {} after committer",
                    commit.short_id()
                ),
            ));
        }
        if previous_author > author {
            problems.push(Problem::new(
                Severity::Notice,
                format!(
                    "author timestamp of commit {} before previous commit",
                    commit.short_id()
                ),
            ));
        }
        if previous_committer > committer {
            problems.push(Problem::new(
                Severity::Error,
                format!(
                    "committer timestamp of commit {} before previous commit",
                    commit.short_id()
                ),
            ));
        }
        previous_author = author;
        previous_committer = committer;
    }
    problems
}
