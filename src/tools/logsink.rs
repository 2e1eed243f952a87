//! Shared sink for captured tool output.
//!
//! Tools run concurrently, one per worker. Their captured stdout/stderr is
//! multi-line, and emitting it line by line from several workers at once
//! would shuffle lines of one tool's report between another's. Every block
//! is therefore emitted while holding a single mutex, so a tool's output
//! always appears contiguously in the log.

use std::sync::Mutex;
use tracing::{debug, error};

/// Mutex-guarded logging façade shared by all workers of a job.
#[derive(Debug, Default)]
pub struct ToolLog {
    guard: Mutex<()>,
}

impl ToolLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a tool's stdout at DEBUG. Blank output is dropped.
    pub fn stdout(&self, tool: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let _held = self.hold();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            debug!(tool, "{}", line);
        }
    }

    /// Emit a tool's stderr at ERROR. Blank output is dropped.
    pub fn stderr(&self, tool: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let _held = self.hold();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            error!(tool, "{}", line);
        }
    }

    fn hold(&self) -> std::sync::MutexGuard<'_, ()> {
        self.guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
