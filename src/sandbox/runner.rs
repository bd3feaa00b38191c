//! Isolated subprocess execution of the evaluation harness.
//!
//! Limits are layered: `RLIMIT_CPU` (2 s) and `RLIMIT_AS` (512 MiB) applied
//! in `pre_exec`, the 5 s alarm inside the harness, and a host-side
//! wall-clock kill as the backstop. Sandbox failures never propagate as
//! errors; they come back as an outcome with zero passes.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::harness;
use crate::catalogue::TaskDef;

/// CPU seconds before the kernel delivers SIGKILL (soft, +1 hard headroom).
const CPU_LIMIT_SECS: u64 = 2;
/// Address-space cap.
const ADDRESS_SPACE_BYTES: u64 = 512 * 1024 * 1024;
/// Host-side wall-clock backstop; generous over the in-harness alarm.
const WALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdict emitted by the harness (or synthesised on sandbox failure).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOutcome {
    pub compiled: bool,
    pub symbol_present: bool,
    pub passed: u32,
    pub total: u32,
    pub error: Option<String>,
}

impl SandboxOutcome {
    fn failed(total: u32, error: impl Into<String>) -> Self {
        Self {
            compiled: false,
            symbol_present: false,
            passed: 0,
            total,
            error: Some(error.into()),
        }
    }

    pub fn correctness(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.passed) / f64::from(self.total)
    }
}

pub struct SandboxRunner {
    python: String,
    /// Hidden fuzz cases generated per evaluation, in addition to the
    /// task's fixed cases.
    pub fuzz_cases: usize,
}

impl SandboxRunner {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
            fuzz_cases: 5,
        }
    }

    /// Evaluate extracted candidate code against a task's fixed and fuzz
    /// cases, expecting `symbol` as the top-level definition (the batch
    /// alias during sweeps). Infallible by design: every failure mode maps
    /// to an outcome.
    pub async fn run(&self, task: &TaskDef, code: &str, symbol: &str) -> SandboxOutcome {
        let cases = task.all_cases(self.fuzz_cases);
        let total = cases.len() as u32;

        let scratch = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!("sandbox scratch dir: {e}");
                return SandboxOutcome::failed(total, format!("scratch dir: {e}"));
            }
        };
        let scratch_path = scratch.path().to_string_lossy().to_string();
        let source = harness::render(code, symbol, task.driver, &cases, &scratch_path);
        let harness_path = scratch.path().join(format!("eval_{}.py", Uuid::new_v4()));
        if let Err(e) = std::fs::write(&harness_path, source) {
            warn!("sandbox harness write: {e}");
            return SandboxOutcome::failed(total, format!("harness write: {e}"));
        }

        let mut command = Command::new(&self.python);
        command
            .arg(&harness_path)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: setrlimit is async-signal-safe; nothing else runs between
        // fork and exec.
        unsafe {
            command.pre_exec(|| {
                let cpu = libc::rlimit {
                    rlim_cur: CPU_LIMIT_SECS,
                    rlim_max: CPU_LIMIT_SECS + 1,
                };
                if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                let space = libc::rlimit {
                    rlim_cur: ADDRESS_SPACE_BYTES,
                    rlim_max: ADDRESS_SPACE_BYTES,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &space) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("sandbox spawn {}: {e}", self.python);
                return SandboxOutcome::failed(total, format!("spawn: {e}"));
            }
        };

        let output = match tokio::time::timeout(WALL_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return SandboxOutcome::failed(total, format!("wait: {e}")),
            // kill_on_drop reaps the child when the future is dropped.
            Err(_) => return SandboxOutcome::failed(total, "wall-clock timeout"),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let verdict = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|line| serde_json::from_str::<SandboxOutcome>(line).ok());

        match verdict {
            Some(outcome) => {
                debug!(
                    "sandbox {}: {}/{} passed, error={:?}",
                    task.slug, outcome.passed, outcome.total, outcome.error
                );
                outcome
            }
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = stderr.lines().last().unwrap_or("no verdict").to_string();
                SandboxOutcome::failed(total, format!("harness: {reason}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::task_by_slug;

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn canonical_solution_passes_all_cases() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let task = task_by_slug("two-sum-indices").unwrap();
        let code = "def two_sum(nums, target):\n    seen = {}\n    for i, v in enumerate(nums):\n        if target - v in seen:\n            return [seen[target - v], i]\n        seen[v] = i\n    return []\n";
        let outcome = SandboxRunner::new("python3").run(task, code, task.expected_symbol).await;
        assert!(outcome.compiled);
        assert!(outcome.symbol_present);
        assert_eq!(outcome.passed, outcome.total);
    }

    #[tokio::test]
    async fn syntax_error_reports_zero_without_panic() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let task = task_by_slug("two-sum-indices").unwrap();
        let outcome = SandboxRunner::new("python3")
            .run(task, "def two_sum(nums, target:\n    broken", task.expected_symbol)
            .await;
        assert!(!outcome.compiled);
        assert_eq!(outcome.passed, 0);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn missing_symbol_detected() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let task = task_by_slug("two-sum-indices").unwrap();
        let outcome = SandboxRunner::new("python3")
            .run(task, "def other(a, b):\n    return a\n", task.expected_symbol)
            .await;
        assert!(outcome.compiled);
        assert!(!outcome.symbol_present);
        assert_eq!(outcome.passed, 0);
    }

    #[tokio::test]
    async fn banned_import_is_blocked() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let task = task_by_slug("two-sum-indices").unwrap();
        let code = "import socket\n\ndef two_sum(nums, target):\n    return []\n";
        let outcome = SandboxRunner::new("python3").run(task, code, task.expected_symbol).await;
        // The import raises during exec, so nothing passes.
        assert_eq!(outcome.passed, 0);
    }

    #[tokio::test]
    async fn class_sequence_driver_runs() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let task = task_by_slug("lru-cache").unwrap();
        let code = r#"
from collections import OrderedDict

class LRUCache:
    def __init__(self, capacity):
        self.capacity = capacity
        self.data = OrderedDict()

    def get(self, key):
        if key not in self.data:
            return -1
        self.data.move_to_end(key)
        return self.data[key]

    def put(self, key, value):
        if key in self.data:
            self.data.move_to_end(key)
        self.data[key] = value
        if len(self.data) > self.capacity:
            self.data.popitem(last=False)
"#;
        let outcome = SandboxRunner::new("python3").run(task, code, task.expected_symbol).await;
        assert!(outcome.symbol_present);
        assert_eq!(outcome.passed, outcome.total);
    }

    #[tokio::test]
    async fn infinite_loop_is_killed() {
        if !python_available() {
            eprintln!("skipping: python3 not on PATH");
            return;
        }
        let task = task_by_slug("two-sum-indices").unwrap();
        let code = "def two_sum(nums, target):\n    while True:\n        pass\n";
        let outcome = SandboxRunner::new("python3").run(task, code, task.expected_symbol).await;
        assert_eq!(outcome.passed, 0);
        assert!(outcome.error.is_some());
    }
}
