//! Checker output grammar
//!
//! External checkers speak line-oriented dialects: `name:line:col: message`
//! (unix/gcc/emacs reporters), `line N, col N` prefixes, or free text. The
//! parser extracts position and severity where it can; anything else
//! degrades into an Info-severity raw-text problem so no complaint is ever
//! dropped.

use crate::config::checkers::CheckerSpec;

use super::{Problem, Severity};

/// Parse the captured output of one checker run. Header/footer trims apply
/// to stdout only; stderr is parsed as-is.
pub fn parse_output(spec: &CheckerSpec, stdout: &[u8], stderr: &[u8]) -> Vec<Problem> {
    let stdout = String::from_utf8_lossy(stdout);
    let stdout_lines: Vec<&str> = stdout.lines().collect();
    let kept = stdout_lines
        .len()
        .saturating_sub(spec.footer)
        .max(spec.header.min(stdout_lines.len()));

    let stderr = String::from_utf8_lossy(stderr);
    stdout_lines[spec.header.min(stdout_lines.len())..kept]
        .iter()
        .copied()
        .chain(stderr.lines())
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect()
}

/// Parse a single output line into a structured problem.
///
/// The file name field is dropped: the content went in on stdin and the
/// report header already names the file.
pub fn parse_line(raw: &str) -> Problem {
    let trimmed = raw.trim();

    // `name:line:col: message`, the common unix reporter shape.
    let parts: Vec<&str> = trimmed.splitn(4, ':').collect();
    if parts.len() == 4 && parts[0].len() >= "stdin".len() {
        if let (Ok(line), Ok(column)) = (parts[1].parse::<u32>(), parts[2].parse::<u32>()) {
            let (severity, message) = Severity::split(parts[3].trim());
            return Problem {
                severity,
                message: message.to_string(),
                line: Some(line),
                column: Some(column),
            };
        }
    }

    // Drop a leading stdin-ish field, then pick off `line N` / `col N`.
    let mut rest = if parts.len() >= 2 && parts[0].to_lowercase().contains("stdin") {
        parts[1..].join(":").trim().to_string()
    } else {
        trimmed.to_string()
    };

    let mut line = None;
    let mut column = None;
    if let Some((number, remainder)) = take_numbered_prefix(&rest, "line ") {
        line = Some(number);
        rest = remainder;
    }
    if let Some((number, remainder)) = take_numbered_prefix(&rest, "col ") {
        column = Some(number);
        rest = remainder;
    }

    let (severity, message) = Severity::split(&rest);
    Problem {
        severity,
        message: message.to_string(),
        line,
        column,
    }
}

fn take_numbered_prefix(rest: &str, keyword: &str) -> Option<(u32, String)> {
    let stripped = rest.strip_prefix(keyword)?;
    let mut parts = stripped.splitn(2, ' ');
    let number = parts
        .next()?
        .trim_matches([':', ','].as_slice())
        .parse()
        .ok()?;
    let remainder = parts
        .next()
        .unwrap_or("")
        .trim_start_matches([':', ',', ' '].as_slice())
        .to_string();
    Some((number, remainder))
}
