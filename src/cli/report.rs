//! Report rendering and the pass/fail decision
//!
//! Results are printed as grouped sections, one per (check, target) pair
//! with problems, each problem on its own severity-prefixed line. Styling
//! goes through `console` so severities stand out on a tty and degrade to
//! plain text through the git sideband.

use std::io::Write;

use console::style;

use crate::checks::{CheckResult, Problem, Severity};

/// Render all non-empty results as report sections.
pub fn render(results: &[CheckResult], out: &mut impl Write) -> std::io::Result<()> {
    for result in results {
        if result.problems.is_empty() {
            continue;
        }
        writeln!(out, "=== {} on {} ===", result.check_name, result.target)?;
        for problem in &result.problems {
            writeln!(out, "{}", format_problem(problem))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Render the closing verdict line.
pub fn render_verdict(results: &[CheckResult], out: &mut impl Write) -> std::io::Result<()> {
    let blocking = results.iter().filter(|r| r.blocks_push()).count();
    let waived = results
        .iter()
        .filter(|r| r.failed() && r.can_soft_fail())
        .count();
    if blocking > 0 {
        writeln!(
            out,
            "{} push rejected: {} failing check{}",
            style("✖").red(),
            blocking,
            if blocking == 1 { "" } else { "s" }
        )?;
    } else if waived > 0 {
        writeln!(
            out,
            "{} push accepted with waived failures",
            style("⚠").yellow()
        )?;
    }
    Ok(())
}

fn format_problem(problem: &Problem) -> String {
    let severity = match problem.severity {
        Severity::Error => style(problem.severity.label()).red().to_string(),
        Severity::Warning => style(problem.severity.label()).yellow().to_string(),
        Severity::Notice => style(problem.severity.label()).cyan().to_string(),
        Severity::Info => style(problem.severity.label()).dim().to_string(),
    };
    let mut position = String::new();
    if let Some(line) = problem.line {
        position.push_str(&format!("line {line}: "));
    }
    if let Some(column) = problem.column {
        position.push_str(&format!("col {column}: "));
    }
    format!("{severity}: {position}{}", problem.message)
}

/// The push is rejected only when a non-waivable result failed.
pub fn push_blocked(results: &[CheckResult]) -> bool {
    results.iter().any(|r| r.blocks_push())
}
