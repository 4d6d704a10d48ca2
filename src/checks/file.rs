//! Checks on a single committed file
//!
//! Executable-bit/shebang consistency, symlink target validation and
//! in-process format validation for structured files. All of them work on
//! the blob content that will actually be stored, never on a checkout.

use crate::config::checkers::{interpreter_pattern, known_script_extension};
use crate::git::commit::{ChangedFile, Commit};

use super::{Context, FileFormat, Problem, Severity};

/// Executable names that are fine without an extension.
pub const GENERAL_NAMES: [&str; 5] = ["exec", "go", "install", "run", "setup"];

fn first_line(content: &[u8]) -> &[u8] {
    content.split(|&b| b == b'\n').next().unwrap_or(content)
}

/// The shebang interpreter path, e.g. `/usr/bin/env` or `/bin/sh`.
pub fn shebang(content: &[u8]) -> Option<String> {
    let line = first_line(content);
    if !line.starts_with(b"#!") {
        return None;
    }
    String::from_utf8_lossy(&line[2..])
        .split_whitespace()
        .next()
        .map(str::to_string)
}

/// The interpreter name the shebang resolves to: the argument of
/// `/usr/bin/env`, the basename otherwise.
pub fn shebang_exe(content: &[u8]) -> Option<String> {
    let interpreter = shebang(content)?;
    if interpreter == "/usr/bin/env" {
        let line = String::from_utf8_lossy(first_line(content)).into_owned();
        return line
            .strip_prefix("#!")?
            .split_whitespace()
            .nth(1)
            .map(str::to_string);
    }
    interpreter.rsplit('/').next().map(str::to_string)
}

/// Validate the executable bit against the shebang.
pub fn executable(ctx: &Context, file: &ChangedFile, content: &[u8]) -> Vec<Problem> {
    let mut problems = Vec::new();

    if file.is_executable() {
        match shebang(content) {
            None => {
                problems.push(Problem::new(
                    Severity::Error,
                    "executable file without shebang",
                ));
            }
            Some(interpreter) => {
                if !interpreter.starts_with('/') {
                    problems.push(Problem::new(
                        Severity::Error,
                        format!("shebang executable {interpreter} is not full path"),
                    ));
                } else if interpreter.starts_with("/usr") && interpreter != "/usr/bin/env" {
                    problems.push(Problem::new(
                        Severity::Warning,
                        "shebang is not portable (use /usr/bin/env)",
                    ));
                }
                exe_problems(ctx, file, content, &mut problems);
            }
        }
    } else {
        // Reading content for unknown extensions is not worth it; only
        // extensionless files and known script extensions are suspicious.
        let extension = file.extension();
        if extension.is_none() || extension.is_some_and(known_script_extension) {
            if shebang(content).is_some() {
                problems.push(Problem::new(
                    Severity::Warning,
                    "non-executable file with shebang",
                ));
            }
        }
    }
    problems
}

fn exe_problems(ctx: &Context, file: &ChangedFile, content: &[u8], problems: &mut Vec<Problem>) {
    let exe = shebang_exe(content);

    match file.extension() {
        None => {
            let name = file.filename();
            if known_script_extension(name) {
                problems.push(Problem::new(Severity::Error, "file extension without a name"));
            }
            if GENERAL_NAMES.contains(&name) {
                problems.push(Problem::new(Severity::Warning, "general executable name"));
            }
        }
        Some(extension) => {
            let Some(exe) = exe.as_deref() else {
                problems.push(Problem::new(Severity::Error, "no shebang executable"));
                return;
            };
            if let Some(pattern) = interpreter_pattern(extension) {
                if !pattern.is_match(exe) {
                    problems.push(Problem::new(
                        Severity::Error,
                        format!(
                            "shebang executable \"{}\" doesn't match pattern \"{}\"",
                            exe,
                            pattern.as_str()
                        ),
                    ));
                    return;
                }
                // General names are white-listed to carry an extension.
                if !GENERAL_NAMES.contains(&file.stem()) {
                    problems.push(Problem::new(Severity::Warning, "redundant file extension"));
                }
                return;
            }
        }
    }

    if let Some(exe) = exe {
        if ctx.command_path(&exe).is_none() {
            problems.push(Problem::new(
                Severity::Warning,
                format!("shebang executable \"{exe}\" not found on PATH"),
            ));
        }
    }
}

/// Validate that a symlink target exists inside the commit's tree.
pub fn symlink(ctx: &Context, commit: &Commit, file: &ChangedFile, content: &[u8]) -> Vec<Problem> {
    let target = String::from_utf8_lossy(content).trim().to_string();
    if target.is_empty() {
        return vec![Problem::new(Severity::Warning, "symlink without a target")];
    }

    let exists = resolve_target(&file.path, &target)
        .map(|resolved| ctx.git.tree_has_path(commit, &resolved).unwrap_or(false))
        .unwrap_or(false);
    if exists {
        Vec::new()
    } else {
        vec![Problem::new(
            Severity::Warning,
            format!("symlink target {target} doesn't exist on repository"),
        )]
    }
}

/// Normalize a symlink target against the link's directory. `None` when the
/// target is absolute or escapes the repository root.
fn resolve_target(link_path: &str, target: &str) -> Option<String> {
    if target.starts_with('/') {
        return None;
    }
    let mut segments: Vec<&str> = link_path.split('/').collect();
    segments.pop();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

/// Parse the blob as a structured format; any parse failure is a problem.
pub fn format(file_format: FileFormat, content: &[u8]) -> Vec<Problem> {
    match file_format {
        FileFormat::Json => match serde_json::from_slice::<serde::de::IgnoredAny>(content) {
            Ok(_) => Vec::new(),
            Err(err) => {
                let line = err.line();
                let column = err.column();
                vec![Problem {
                    severity: Severity::Error,
                    message: strip_location(&err.to_string()),
                    line: (line > 0).then_some(line as u32),
                    column: (column > 0).then_some(column as u32),
                }]
            }
        },
        FileFormat::Yaml => match serde_yaml::from_slice::<serde::de::IgnoredAny>(content) {
            Ok(_) => Vec::new(),
            Err(err) => {
                let location = err.location();
                vec![Problem {
                    severity: Severity::Error,
                    message: strip_location(&err.to_string()),
                    line: location.as_ref().map(|l| l.line() as u32),
                    column: location.as_ref().map(|l| l.column() as u32),
                }]
            }
        },
        FileFormat::Toml => {
            let text = match std::str::from_utf8(content) {
                Ok(text) => text,
                Err(_) => {
                    return vec![Problem::new(Severity::Error, "file is not valid UTF-8")];
                }
            };
            match text.parse::<toml::Table>() {
                Ok(_) => Vec::new(),
                Err(err) => {
                    let (line, column) = err
                        .span()
                        .map(|span| line_col_at(text, span.start))
                        .unzip();
                    vec![Problem {
                        severity: Severity::Error,
                        message: err.message().to_string(),
                        line,
                        column,
                    }]
                }
            }
        }
    }
}

/// Parsers embed "at line X column Y" in their message; the location is
/// reported structurally instead.
fn strip_location(message: &str) -> String {
    message
        .split(" at line ")
        .next()
        .unwrap_or(message)
        .to_string()
}

fn line_col_at(text: &str, offset: usize) -> (u32, u32) {
    let prefix = &text[..offset.min(text.len())];
    let line = prefix.bytes().filter(|&b| b == b'\n').count() as u32 + 1;
    let column = prefix
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count() as u32 + 1)
        .unwrap_or(1);
    (line, column)
}
