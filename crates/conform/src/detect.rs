//! Failure detection for external tool invocations.
//!
//! The external toolchain gives no reliable exit-code contract, so the default policy
//! scans diagnostic text for known error prefixes. Tools that do report a meaningful
//! exit status can opt into `exit-status` or `marker-or-exit-status`.

use clap::ValueEnum;
use serde::Deserialize;

use crate::exec::StageResult;

/// Diagnostic prefixes matched case-insensitively against a stage's stderr.
pub const ERROR_MARKERS: &[&str] = &["error:", "error["];

/// Substring the unit-test runner prints when nothing failed.
pub const DEFAULT_UNIT_TEST_PASS_MARKER: &str = "failed: 0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[clap(rename_all = "kebab_case")]
pub enum DetectionPolicy {
    /// Scan captured text for error markers; ignore the exit status.
    #[default]
    Marker,
    /// Treat any non-zero (or missing) exit status as failure.
    ExitStatus,
    /// Fail on either signal.
    MarkerOrExitStatus,
}

impl DetectionPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionPolicy::Marker => "marker",
            DetectionPolicy::ExitStatus => "exit-status",
            DetectionPolicy::MarkerOrExitStatus => "marker-or-exit-status",
        }
    }

    fn uses_marker(self) -> bool {
        matches!(
            self,
            DetectionPolicy::Marker | DetectionPolicy::MarkerOrExitStatus
        )
    }

    fn uses_exit_status(self) -> bool {
        matches!(
            self,
            DetectionPolicy::ExitStatus | DetectionPolicy::MarkerOrExitStatus
        )
    }

    /// Failure check for the static-analysis gate and the compile/native-build stages.
    pub fn stage_failed(self, result: &StageResult) -> bool {
        (self.uses_marker() && has_error_marker(&result.stderr))
            || (self.uses_exit_status() && !result.success())
    }

    /// Failure check for the unit-test gate. Under the marker policies the pass marker
    /// must appear in stdout.
    pub fn unit_tests_failed(self, result: &StageResult, pass_marker: &str) -> bool {
        (self.uses_marker() && !contains_bytes(&result.stdout, pass_marker.as_bytes()))
            || (self.uses_exit_status() && !result.success())
    }

    /// Failure check for running the produced executable. Any stderr output fails the
    /// case; exit-status policies also reject a non-zero exit.
    pub fn execution_failed(self, result: &StageResult) -> bool {
        !result.stderr.is_empty() || (self.uses_exit_status() && !result.success())
    }
}

pub fn has_error_marker(text: &[u8]) -> bool {
    let lower = text.to_ascii_lowercase();
    ERROR_MARKERS
        .iter()
        .any(|m| contains_bytes(&lower, m.as_bytes()))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_status: Option<i32>, stdout: &str, stderr: &str) -> StageResult {
        StageResult {
            exit_status,
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn error_markers_match_case_insensitively() {
        assert!(has_error_marker(b"src/main.mbt:3:1 Error: unbound name"));
        assert!(has_error_marker(b"ERROR[E0425]: cannot find value"));
        assert!(has_error_marker(b"fib.ll:1:1: error: expected top-level entity"));
    }

    #[test]
    fn error_markers_need_the_punctuation() {
        assert!(!has_error_marker(b""));
        assert!(!has_error_marker(b"warning: unused variable `error`"));
        assert!(!has_error_marker(b"0 errors, 2 warnings"));
    }

    #[test]
    fn marker_policy_ignores_exit_status() {
        let quiet_nonzero = result(Some(1), "", "");
        assert!(!DetectionPolicy::Marker.stage_failed(&quiet_nonzero));
        assert!(DetectionPolicy::ExitStatus.stage_failed(&quiet_nonzero));
        assert!(DetectionPolicy::MarkerOrExitStatus.stage_failed(&quiet_nonzero));

        let noisy_zero = result(Some(0), "", "error: nope");
        assert!(DetectionPolicy::Marker.stage_failed(&noisy_zero));
        assert!(!DetectionPolicy::ExitStatus.stage_failed(&noisy_zero));
        assert!(DetectionPolicy::MarkerOrExitStatus.stage_failed(&noisy_zero));
    }

    #[test]
    fn unit_test_gate_requires_pass_marker_in_stdout() {
        let passed = result(Some(0), "Total tests: 12, passed: 12, failed: 0.\n", "");
        let failed = result(Some(0), "Total tests: 12, passed: 11, failed: 1.\n", "");
        let marker_on_stderr = result(Some(0), "", "failed: 0");

        let policy = DetectionPolicy::Marker;
        assert!(!policy.unit_tests_failed(&passed, DEFAULT_UNIT_TEST_PASS_MARKER));
        assert!(policy.unit_tests_failed(&failed, DEFAULT_UNIT_TEST_PASS_MARKER));
        assert!(policy.unit_tests_failed(&marker_on_stderr, DEFAULT_UNIT_TEST_PASS_MARKER));
    }

    #[test]
    fn execution_fails_on_any_stderr() {
        let policy = DetectionPolicy::Marker;
        assert!(policy.execution_failed(&result(Some(0), "1\n", "warning\n")));
        assert!(!policy.execution_failed(&result(Some(3), "1\n", "")));
        assert!(DetectionPolicy::ExitStatus.execution_failed(&result(Some(3), "1\n", "")));
        assert!(DetectionPolicy::ExitStatus.execution_failed(&result(None, "", "")));
    }
}
