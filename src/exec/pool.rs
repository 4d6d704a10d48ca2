//! Bounded worker pool for checker subprocesses
//!
//! Work items are distributed over crossbeam channels to a bounded set of
//! scoped worker threads; each worker owns one subprocess at a time. Every
//! result carries the slot index it was scheduled under, so the caller can
//! reassemble the deterministic report order no matter which worker
//! finished first.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::bounded;
use tracing::{debug, error};

use crate::checks::command::parse_output;
use crate::checks::{CheckResult, Problem, Severity};
use crate::config::checkers::CheckerSpec;

/// Hard ceiling on concurrent checker subprocesses.
const MAX_WORKERS: usize = 16;

/// Polling interval while waiting on a subprocess.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// One resolved (checker, file) work item.
#[derive(Debug)]
pub struct CommandJob {
    /// Result slot allocated in traversal order.
    pub slot: usize,
    pub check_name: String,
    pub target: String,
    pub exe: PathBuf,
    /// Argv tail after the command itself.
    pub args: Vec<String>,
    /// New blob content, piped to the checker's stdin.
    pub content: Arc<[u8]>,
    pub spec: &'static CheckerSpec,
    /// The owning commit carries a waiver tag.
    pub waivable: bool,
    /// Waiver tags also cover crashed or timed-out checkers.
    pub waive_tool_failures: bool,
    pub timeout: Duration,
}

fn optimal_workers(configured: usize, job_count: usize) -> usize {
    let cap = if configured > 0 {
        configured
    } else {
        MAX_WORKERS.min(num_cpus::get())
    };
    cap.min(job_count).max(1)
}

/// Run all jobs with bounded concurrency, returning `(slot, result)` pairs
/// in completion order.
pub fn run_jobs(jobs: Vec<CommandJob>, configured_workers: usize) -> Vec<(usize, CheckResult)> {
    let job_count = jobs.len();
    if job_count == 0 {
        return Vec::new();
    }
    let workers = optimal_workers(configured_workers, job_count);
    debug!(jobs = job_count, workers, "dispatching checker subprocesses");

    let (work_tx, work_rx) = bounded::<CommandJob>(workers * 2);
    let (result_tx, result_rx) = bounded::<(usize, CheckResult)>(workers * 2);

    let collected = crossbeam::thread::scope(|s| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            s.spawn(move |_| {
                while let Ok(job) = work_rx.recv() {
                    let result = run_job(&job);
                    if result_tx.send((job.slot, result)).is_err() {
                        break;
                    }
                }
            });
        }

        let producer_tx = work_tx.clone();
        s.spawn(move |_| {
            for job in jobs {
                if producer_tx.send(job).is_err() {
                    break;
                }
            }
            drop(producer_tx);
        });

        // Drop the originals so the workers see the channels close.
        drop(work_tx);
        drop(result_tx);

        let mut results = Vec::with_capacity(job_count);
        while results.len() < job_count {
            match result_rx.recv() {
                Ok(entry) => results.push(entry),
                Err(_) => break,
            }
        }
        results
    });

    match collected {
        Ok(results) => results,
        Err(_) => {
            error!("worker thread panicked while running checkers");
            Vec::new()
        }
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    WaitFailed(std::io::Error),
}

/// Run one checker subprocess: pipe the blob in, capture both output
/// streams, enforce the timeout and reap the child on every path.
fn run_job(job: &CommandJob) -> CheckResult {
    let mut result =
        CheckResult::new(job.check_name.clone(), job.target.clone()).waivable(job.waivable);

    let mut child = match Command::new(&job.exe)
        .args(&job.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => {
            return tool_failure(result, job, format!("failed to spawn checker: {err}"));
        }
    };

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (outcome, stdout_buf, stderr_buf) = std::thread::scope(|s| {
        let content = job.content.clone();
        // The writer runs on its own thread so a checker that floods its
        // output before draining stdin cannot deadlock against us. A broken
        // pipe just means the checker did not want the whole file.
        s.spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&content);
            }
        });
        let stdout_reader = s.spawn(move || drain(stdout));
        let stderr_reader = s.spawn(move || drain(stderr));

        let deadline = Instant::now() + job.timeout;
        let outcome = loop {
            match child.try_wait() {
                Ok(Some(status)) => break WaitOutcome::Exited(status),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        break WaitOutcome::TimedOut;
                    }
                    std::thread::sleep(WAIT_POLL);
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break WaitOutcome::WaitFailed(err);
                }
            }
        };

        // Killing the child closed the pipes, so the readers finish.
        let stdout_buf = stdout_reader.join().unwrap_or_default();
        let stderr_buf = stderr_reader.join().unwrap_or_default();
        (outcome, stdout_buf, stderr_buf)
    });

    match outcome {
        WaitOutcome::TimedOut => tool_failure(
            result,
            job,
            format!("check timed out after {}s", job.timeout.as_secs()),
        ),
        WaitOutcome::WaitFailed(err) => {
            tool_failure(result, job, format!("failed to wait on checker: {err}"))
        }
        WaitOutcome::Exited(status) => {
            result.problems = parse_output(job.spec, &stdout_buf, &stderr_buf);
            if !job.spec.bogus_return_code && !status.success() {
                if result.problems.is_empty() {
                    // A crashed checker must not be mistaken for a clean file.
                    return tool_failure(result, job, describe_exit(&status));
                }
                // The checker complained and its exit code agrees; the
                // complaints may all be informational, the result fails
                // regardless.
                result.exit_failed = true;
            }
            result
        }
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("command failed with exit status {code}"),
        None => "command terminated by signal".to_string(),
    }
}

fn tool_failure(mut result: CheckResult, job: &CommandJob, message: String) -> CheckResult {
    result.problems.push(Problem::new(Severity::Error, message));
    result.waivable = job.waivable && job.waive_tool_failures;
    result
}

fn drain<R: Read>(reader: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        let _ = reader.read_to_end(&mut buffer);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::checkers::checker_by_name;

    fn job_for(exe: &str, args: &[&str], content: &[u8], timeout_secs: u64) -> CommandJob {
        CommandJob {
            slot: 0,
            check_name: "CheckCommand \"test\"".to_string(),
            target: "file at 00000001".to_string(),
            exe: PathBuf::from(exe),
            args: args.iter().map(|s| s.to_string()).collect(),
            content: Arc::from(content),
            spec: checker_by_name("golint").unwrap(),
            waivable: false,
            waive_tool_failures: false,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[test]
    fn clean_exit_produces_no_problems() {
        let job = job_for("/bin/cat", &[], b"hello\n", 10);
        let result = run_job(&job);
        // cat echoes the content back; it parses as an Info raw-text line.
        assert!(!result.failed());
    }

    #[test]
    fn missing_binary_is_a_tool_failure() {
        let job = job_for("/nonexistent/checker", &[], b"", 10);
        let result = run_job(&job);
        assert!(result.failed());
        assert!(result.problems[0].message.contains("failed to spawn"));
    }

    #[test]
    fn nonzero_exit_without_output_fails() {
        let job = job_for("/bin/false", &[], b"", 10);
        let result = run_job(&job);
        assert!(result.failed());
        assert!(result.problems[0].message.contains("command failed with exit status"));
    }

    #[test]
    fn timeout_kills_and_reports() {
        let job = job_for("/bin/sleep", &["5"], b"", 1);
        let result = run_job(&job);
        assert!(result.failed());
        assert!(result.problems[0].message.contains("timed out"));
    }

    #[test]
    fn tool_failures_respect_the_policy_switch() {
        let mut job = job_for("/bin/false", &[], b"", 10);
        job.waivable = true;
        let result = run_job(&job);
        // Waiver tags do not cover tool failures by default.
        assert!(result.blocks_push());

        job.waive_tool_failures = true;
        let result = run_job(&job);
        assert!(result.failed());
        assert!(!result.blocks_push());
    }

    #[test]
    fn results_come_back_for_every_slot() {
        let jobs: Vec<CommandJob> = (0..5)
            .map(|slot| {
                let mut job = job_for("/bin/cat", &[], b"data\n", 10);
                job.slot = slot;
                job
            })
            .collect();
        let mut results = run_jobs(jobs, 2);
        results.sort_by_key(|(slot, _)| *slot);
        let slots: Vec<usize> = results.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, vec![0, 1, 2, 3, 4]);
    }
}
