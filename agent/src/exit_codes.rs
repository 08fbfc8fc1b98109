//! Stable exit codes for the `agent` CLI.

/// The run completed (or the command succeeded).
pub const OK: i32 = 0;
/// Invalid config, arguments, or an error outside the workflow.
pub const INVALID: i32 = 1;
/// Planning failed or a step ended in error.
pub const FAILED: i32 = 2;
/// The step budget stopped the run before every step executed.
pub const LIMIT_REACHED: i32 = 3;
