//! Heuristic success/failure classification of tool output.
//!
//! Tool executors are black boxes that only return text, so classification is
//! a case-insensitive keyword match rather than an exit-code check. This is a
//! known precision/recall tradeoff: a program that legitimately prints
//! "failed" is classified as a failure, and a non-zero exit whose output
//! avoids every keyword is classified as a success.

/// Lowercase substrings that mark a result as failed.
pub const FAILURE_INDICATORS: &[&str] = &[
    "error:",
    "failed",
    "exception",
    "traceback",
    "exit code: 1",
    "command not found",
    "module not found",
];

/// Return true if `result` contains any failure indicator.
pub fn is_failure(result: &str) -> bool {
    let lowered = result.to_lowercase();
    FAILURE_INDICATORS
        .iter()
        .any(|indicator| lowered.contains(indicator))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_shell_output_is_not_a_failure() {
        assert!(!is_failure("Exit Code: 0\nOutput:\nfoo.txt\n"));
    }

    #[test]
    fn every_indicator_is_detected_case_insensitively() {
        for indicator in FAILURE_INDICATORS {
            let text = format!("prefix {} suffix", indicator.to_uppercase());
            assert!(is_failure(&text), "expected failure for {text:?}");
        }
    }

    #[test]
    fn dispatch_errors_are_failures() {
        assert!(is_failure("Error: Unknown tool 'sql_runner'"));
        assert!(is_failure(
            "Traceback (most recent call last):\n  File \"x.py\", line 1"
        ));
        assert!(is_failure("Exit Code: 127\nErrors:\nfoo: command not found"));
    }

    #[test]
    fn legitimate_output_mentioning_failed_is_a_false_positive() {
        assert!(is_failure("Exit Code: 0\nOutput:\n0 tests failed\n"));
    }

    #[test]
    fn empty_output_is_success() {
        assert!(!is_failure(""));
    }
}
