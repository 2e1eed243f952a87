//! Uniform subprocess execution for every external tool.
//!
//! Each stage builds a [`ToolInvocation`] and hands it to [`invoke`], which
//! owns the whole process lifecycle:
//!
//! ```text
//! spawn ──▶ drain stdout/stderr ──▶ wait (≤ timeout) ──▶ log ──▶ classify
//!                                        │
//!                                        └─ elapsed: kill, drain, fallback?
//! ```
//!
//! Streams are always piped, never inherited, so output of concurrent
//! workers cannot interleave on the terminal; it reaches the log through the
//! shared [`ToolLog`]. The invoker guarantees only that the process ran and
//! its exit status was observed. Callers normalise version-dependent output
//! locations themselves.

use crate::error::OcrPdfError;
use crate::tools::logsink::ToolLog;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to keep draining pipes after a timed-out process was killed.
///
/// A grandchild that inherited the pipes can hold them open after the
/// direct child died; its output is abandoned after this grace period.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Keep at most this many bytes of stderr in error messages.
const STDERR_TAIL: usize = 2000;

/// Synthesises a substitute output after a timeout.
pub type FallbackFn = Box<dyn FnOnce() -> Result<(), OcrPdfError> + Send>;

/// One external process call: program, arguments and optional timeout.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    label: &'static str,
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Option<Duration>,
}

impl ToolInvocation {
    /// `label` names the tool in logs and errors (e.g. `"ghostscript"`).
    pub fn new(label: &'static str, program: impl Into<PathBuf>) -> Self {
        Self {
            label,
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Full argument vector, program first, for logs and error reports.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited with this status code.
    Exited(i32),
    /// Terminated by a signal (no exit code).
    Signalled,
    /// Killed by the invoker after the timeout elapsed.
    TimedOut,
}

/// What [`invoke`] observed.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub outcome: ExitOutcome,
    pub stdout: String,
    pub stderr: String,
    /// True when the process timed out and the fallback produced the output.
    pub fallback_applied: bool,
    pub elapsed: Duration,
}

/// Run `invocation` to completion.
///
/// # Errors
/// - [`OcrPdfError::ToolNotFound`] when the program cannot be spawned
/// - [`OcrPdfError::ToolTimeout`] when the timeout elapsed and no fallback
///   was supplied
/// - [`OcrPdfError::ToolExecution`] on a non-zero exit or a signal
/// - whatever the fallback itself returns
pub async fn invoke(
    invocation: &ToolInvocation,
    log: &ToolLog,
    on_timeout: Option<FallbackFn>,
) -> Result<InvocationResult, OcrPdfError> {
    let label = invocation.label;
    let start = Instant::now();
    debug!(tool = label, argv = %invocation.argv().join(" "), "Spawning");

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| OcrPdfError::ToolNotFound {
            program: invocation.program.display().to_string(),
            source: e,
        })?;

    let stdout_task = child.stdout.take().map(drain);
    let stderr_task = child.stderr.take().map(drain);

    let status = match invocation.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status),
            Err(_) => {
                warn!(
                    tool = label,
                    "Timed out after {:.1}s, killing process",
                    limit.as_secs_f64()
                );
                if let Err(e) = child.kill().await {
                    warn!(tool = label, "Kill failed: {}", e);
                }
                None
            }
        },
        None => Some(child.wait().await),
    };

    let timed_out = status.is_none();
    let stdout = collect(stdout_task, timed_out).await;
    let stderr = collect(stderr_task, timed_out).await;
    log.stdout(label, &stdout);
    log.stderr(label, &stderr);

    let outcome = match status {
        None => ExitOutcome::TimedOut,
        Some(Ok(s)) => s
            .code()
            .map(ExitOutcome::Exited)
            .unwrap_or(ExitOutcome::Signalled),
        Some(Err(e)) => {
            return Err(OcrPdfError::Internal(format!(
                "waiting for {label} failed: {e}"
            )))
        }
    };

    let mut result = InvocationResult {
        outcome,
        stdout,
        stderr,
        fallback_applied: false,
        elapsed: start.elapsed(),
    };

    match outcome {
        ExitOutcome::Exited(0) => {
            debug!(tool = label, "Finished in {}ms", result.elapsed.as_millis());
            Ok(result)
        }
        ExitOutcome::TimedOut => match on_timeout {
            Some(fallback) => {
                fallback()?;
                result.fallback_applied = true;
                warn!(tool = label, "Substituted fallback output after timeout");
                Ok(result)
            }
            None => Err(OcrPdfError::ToolTimeout {
                program: label.to_string(),
                secs: invocation.timeout.map(|t| t.as_secs()).unwrap_or(0),
            }),
        },
        ExitOutcome::Exited(code) => Err(execution_error(invocation, Some(code), &result.stderr)),
        ExitOutcome::Signalled => Err(execution_error(invocation, None, &result.stderr)),
    }
}

fn execution_error(invocation: &ToolInvocation, exit_code: Option<i32>, stderr: &str) -> OcrPdfError {
    OcrPdfError::ToolExecution {
        program: invocation.label.to_string(),
        exit_code,
        argv: invocation.argv(),
        stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
    }
}

fn drain<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        // A read error just truncates the captured text.
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(task: Option<JoinHandle<Vec<u8>>>, after_kill: bool) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    let bytes = if after_kill {
        match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                task.abort();
                Vec::new()
            }
        }
    } else {
        task.await.unwrap_or_default()
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Last `max` bytes of `s`, cut on a char boundary.
pub(crate) fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolInvocation {
        ToolInvocation::new("sh", "/bin/sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr_separately() {
        let log = ToolLog::new();
        let r = invoke(&sh("echo out; echo err >&2"), &log, None)
            .await
            .unwrap();
        assert_eq!(r.outcome, ExitOutcome::Exited(0));
        assert_eq!(r.stdout.trim(), "out");
        assert_eq!(r.stderr.trim(), "err");
        assert!(!r.fallback_applied);
    }

    #[tokio::test]
    async fn nonzero_exit_is_tool_execution_error() {
        let log = ToolLog::new();
        let err = invoke(&sh("echo broken >&2; exit 3"), &log, None)
            .await
            .unwrap_err();
        match err {
            OcrPdfError::ToolExecution {
                program,
                exit_code,
                argv,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(exit_code, Some(3));
                assert_eq!(argv[0], "/bin/sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_without_fallback_fails() {
        let log = ToolLog::new();
        let inv = sh("exec sleep 5").timeout(Duration::from_millis(200));
        let start = Instant::now();
        let err = invoke(&inv, &log, None).await.unwrap_err();
        assert!(matches!(err, OcrPdfError::ToolTimeout { .. }), "{err:?}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn timeout_with_fallback_substitutes_output() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fallback.txt");
        let written = target.clone();
        let log = ToolLog::new();
        let inv = sh("exec sleep 5").timeout(Duration::from_millis(200));
        let fallback: FallbackFn = Box::new(move || {
            std::fs::write(&written, "empty").map_err(|e| OcrPdfError::io(&written, e))
        });

        let r = invoke(&inv, &log, Some(fallback)).await.unwrap();
        assert_eq!(r.outcome, ExitOutcome::TimedOut);
        assert!(r.fallback_applied);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "empty");
    }

    #[tokio::test]
    async fn fallback_not_used_when_process_finishes() {
        let log = ToolLog::new();
        let inv = sh("exit 0").timeout(Duration::from_secs(5));
        let fallback: FallbackFn = Box::new(|| panic!("fallback must not run"));
        let r = invoke(&inv, &log, Some(fallback)).await.unwrap();
        assert!(!r.fallback_applied);
    }

    #[tokio::test]
    async fn missing_program_is_tool_not_found() {
        let log = ToolLog::new();
        let inv = ToolInvocation::new("ghost", "/definitely/not/a/program");
        let err = invoke(&inv, &log, None).await.unwrap_err();
        assert!(matches!(err, OcrPdfError::ToolNotFound { .. }));
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }
}
