//! Checks on a single commit

use std::collections::HashSet;

use globset::{Glob, GlobSet, GlobSetBuilder};
use lazy_static::lazy_static;
use regex::Regex;

use crate::git::commit::{Commit, Contribution};

use super::{Context, Problem, Severity};

/// Commit tags recognized on summaries, `[TAG]` style.
pub const KNOWN_TAGS: [&str; 15] = [
    "BREAKING",
    "BUGFIX",
    "CLEANUP",
    "FEATURE",
    "HOTFIX",
    "MESS",
    "MIGRATE",
    "REFACTORING",
    "REVIEW",
    "SECURITY",
    "STYLE",
    "TASK",
    "TEMP",
    "WIP",
    "!!",
];

/// Author and committer stamped more than a month apart is suspicious.
const CONTRIBUTION_SKEW_SECS: i64 = 30 * 24 * 60 * 60;

lazy_static! {
    static ref EMAIL_PATTERN: Regex = Regex::new(r"^[^@\s<>]+@[^@\s<>]+\.[^@\s<>]+$").unwrap();
}

/// Validate the message body: a single-line summary followed by a blank
/// line, and body lines without stray whitespace or overlong text.
/// Indented and quoted lines are exempt from the length limit.
pub fn message_format(ctx: &Context, commit: &Commit) -> Vec<Problem> {
    let mut problems = Vec::new();
    for (line_id, line) in commit.message_lines().enumerate() {
        if line_id == 0 {
            continue;
        }
        if line_id == 1 {
            if !line.trim().is_empty() {
                problems.push(Problem::new(
                    Severity::Error,
                    "no single line commit summary",
                ));
            }
        } else if line.starts_with("    ") || line.starts_with('>') {
            continue;
        }
        if !line.is_empty() {
            line_problems(ctx, line_id + 1, line, &mut problems);
        }
    }
    problems
}

fn line_problems(ctx: &Context, line_number: usize, line: &str, problems: &mut Vec<Problem>) {
    let mut rest = line;
    if rest.trim_end() != rest {
        rest = rest.trim_end();
        problems.push(Problem::new(
            Severity::Error,
            format!("line {line_number}: trailing space"),
        ));
    }
    if rest.trim_start() != rest {
        rest = rest.trim_start();
        problems.push(Problem::new(
            Severity::Warning,
            format!("line {line_number}: leading space"),
        ));
    }
    let limit = ctx.config.message.body_line_length;
    if rest.chars().count() > limit {
        problems.push(Problem::new(
            Severity::Warning,
            format!("line {line_number}: longer than {limit}"),
        ));
    }
}

/// Validate the summary line: tag tokens, revert shape, length limits,
/// optional `category: ` prefix and title style.
pub fn summary_format(ctx: &Context, commit: &Commit) -> Vec<Problem> {
    let mut problems = Vec::new();
    let (tags, mut rest) = commit.parse_tags();
    if rest.starts_with('[') {
        problems.push(Problem::new(Severity::Warning, "not terminated commit tags"));
    }
    if !tags.is_empty() {
        tag_problems(&tags, rest, &mut problems);
        rest = rest.get(1..).unwrap_or("");
    }

    if let Some(reverted) = rest.strip_prefix("Revert") {
        if !reverted.starts_with(" \"") || !reverted.ends_with('"') {
            problems.push(Problem::new(
                Severity::Warning,
                "ill-formatted revert commit message",
            ));
        }
        return problems;
    }

    summary_problems(ctx, rest, &mut problems);
    problems
}

fn tag_problems(tags: &[&str], rest: &str, problems: &mut Vec<Problem>) {
    let mut used = Vec::new();
    for tag in tags {
        let upper = tag.to_uppercase();
        if *tag != upper {
            problems.push(Problem::new(
                Severity::Error,
                format!("commit tag [{tag}] not upper-case"),
            ));
        }
        if !KNOWN_TAGS.contains(&upper.as_str()) {
            problems.push(Problem::new(
                Severity::Warning,
                format!(
                    "commit tag [{}] not on the list {}",
                    tag,
                    KNOWN_TAGS
                        .iter()
                        .map(|t| format!("[{t}]"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        if used.contains(&upper) {
            problems.push(Problem::new(
                Severity::Error,
                format!("duplicate commit tag [{tag}]"),
            ));
        }
        used.push(upper);
    }
    if !rest.starts_with(' ') {
        problems.push(Problem::new(
            Severity::Warning,
            "commit tags not separated with space",
        ));
    }
}

fn summary_problems(ctx: &Context, rest: &str, problems: &mut Vec<Problem>) {
    if rest.is_empty() {
        problems.push(Problem::new(Severity::Error, "no commit summary"));
        return;
    }

    let length = rest.chars().count();
    let hard = ctx.config.message.summary_hard_length;
    let soft = ctx.config.message.summary_soft_length;
    if length > hard {
        problems.push(Problem::new(
            Severity::Warning,
            format!("commit summary longer than {hard} characters"),
        ));
    } else if length > soft {
        problems.push(Problem::new(
            Severity::Warning,
            format!("commit summary longer than {soft} characters"),
        ));
    }

    if rest.contains("  ") {
        problems.push(Problem::new(Severity::Warning, "multiple spaces"));
    }

    // A short leading `category: ` prefix is allowed before the title.
    let mut title = rest;
    if let Some(category_end) = rest.find(": ") {
        let after = category_end + 2;
        if category_end < 24 && rest.len() > after {
            category_problems(&rest[..category_end], problems);
            title = &rest[after..];
        }
    }

    title_problems(title, problems);
}

fn category_problems(category: &str, problems: &mut Vec<Problem>) {
    if !category.chars().next().is_some_and(char::is_alphabetic) {
        problems.push(Problem::new(
            Severity::Warning,
            "commit category starts with non-letter",
        ));
    }
    if category.to_lowercase() != category {
        problems.push(Problem::new(
            Severity::Warning,
            "commit category has upper-case letter",
        ));
    }
    if category.trim_end() != category {
        problems.push(Problem::new(
            Severity::Warning,
            "commit category with trailing space",
        ));
    }
}

fn title_problems(title: &str, problems: &mut Vec<Problem>) {
    let Some(first_letter) = title.chars().next() else {
        problems.push(Problem::new(Severity::Error, "no commit title"));
        return;
    };

    if !first_letter.is_alphabetic() {
        problems.push(Problem::new(
            Severity::Warning,
            "commit title starts with non-letter",
        ));
    } else if first_letter.to_uppercase().to_string() != first_letter.to_string() {
        problems.push(Problem::new(
            Severity::Warning,
            "commit title not capitalized",
        ));
    }

    if title.ends_with('.') {
        problems.push(Problem::new(
            Severity::Warning,
            "commit title ends with a dot",
        ));
    }

    let first_word = title.split(' ').next().unwrap_or("");
    if first_word.ends_with("ed") {
        problems.push(Problem::new(
            Severity::Warning,
            "past tense used on commit title",
        ));
    }
    if first_word.ends_with("ing") {
        problems.push(Problem::new(
            Severity::Warning,
            "continuous tense used on commit title",
        ));
    }
}

/// Validate the paths a commit touches: allowed patterns, length, portable
/// characters and the lower-case rule for script extensions.
pub fn changed_paths(ctx: &Context, commit: &Commit) -> Vec<Problem> {
    let mut problems = Vec::new();
    let allowed = match allowed_globset(&ctx.config.paths.allowed_patterns) {
        Ok(globset) => globset,
        Err(err) => {
            problems.push(Problem::new(
                Severity::Error,
                format!("invalid allowed_patterns configuration: {err}"),
            ));
            return problems;
        }
    };

    let files = match ctx.git.changed_files(commit) {
        Ok(files) => files,
        Err(err) => {
            problems.push(Problem::new(
                Severity::Error,
                format!("could not resolve changed files: {err}"),
            ));
            return problems;
        }
    };

    for file in files.iter().filter(|f| f.checkable()) {
        let path = file.path.as_str();
        if !allowed.is_match(path) {
            problems.push(Problem::new(
                Severity::Error,
                format!("{path} outside the allowed path patterns"),
            ));
        }
        if path.len() > ctx.config.paths.max_length {
            problems.push(Problem::new(
                Severity::Warning,
                format!(
                    "{path} longer than {} characters",
                    ctx.config.paths.max_length
                ),
            ));
        }
        if path
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '\\')
        {
            problems.push(Problem::new(
                Severity::Error,
                format!("{path} contains whitespace or control characters"),
            ));
        }
        if let Some(extension) = file.extension() {
            let extension = extension.to_lowercase();
            if ctx.config.paths.lower_case_extensions.contains(&extension)
                && path != path.to_lowercase()
            {
                problems.push(Problem::new(
                    Severity::Error,
                    format!("{path} has upper case"),
                ));
            }
        }
    }
    problems
}

fn allowed_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// Flag merge commits that smuggle direct edits: a path changed relative to
/// every parent was not brought in by any merged branch.
pub fn misleading_merge(ctx: &Context, commit: &Commit) -> Vec<Problem> {
    if !commit.is_merge() {
        return Vec::new();
    }

    let mut smuggled: Option<HashSet<String>> = None;
    for &parent in &commit.parents {
        let paths: HashSet<String> = match ctx.git.changed_paths_against(commit, parent) {
            Ok(paths) => paths.into_iter().collect(),
            Err(err) => {
                return vec![Problem::new(
                    Severity::Error,
                    format!("could not diff against parent {parent}: {err}"),
                )];
            }
        };
        smuggled = Some(match smuggled {
            None => paths,
            Some(previous) => previous.intersection(&paths).cloned().collect(),
        });
        if smuggled.as_ref().is_some_and(HashSet::is_empty) {
            return Vec::new();
        }
    }

    let mut paths: Vec<String> = smuggled.unwrap_or_default().into_iter().collect();
    if paths.is_empty() {
        return Vec::new();
    }
    paths.sort();
    vec![Problem::new(
        Severity::Error,
        format!(
            "merge commit carries direct changes not from any parent: {}",
            paths.join(", ")
        ),
    )]
}

/// Validate author and committer identities and their relative timestamps.
pub fn contribution(_ctx: &Context, commit: &Commit) -> Vec<Problem> {
    let mut problems = Vec::new();
    for (role, contributor) in [("author", &commit.author), ("committer", &commit.committer)] {
        contributor_problems(role, contributor, &mut problems);
    }
    if (commit.author.timestamp - commit.committer.timestamp).abs() > CONTRIBUTION_SKEW_SECS {
        problems.push(Problem::new(
            Severity::Warning,
            "author and committer timestamps more than a month apart",
        ));
    }
    problems
}

fn contributor_problems(role: &str, contributor: &Contribution, problems: &mut Vec<Problem>) {
    if contributor.name.trim().is_empty() {
        problems.push(Problem::new(Severity::Error, format!("{role} name is empty")));
    }
    if !EMAIL_PATTERN.is_match(&contributor.email) {
        problems.push(Problem::new(
            Severity::Error,
            format!("{role} email \"{}\" is malformed", contributor.email),
        ));
    }
    if contributor.timestamp <= 0 {
        problems.push(Problem::new(
            Severity::Error,
            format!("{role} timestamp is implausible"),
        ));
    }
}
