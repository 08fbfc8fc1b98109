//! External tool executors.
//!
//! Each executor takes the tool-specific input extracted from a step and
//! returns the raw result text the classifier inspects. Expected failures
//! (rejected commands, timeouts, missing helpers) come back as `Error: ...`
//! text rather than `Err`; `Err` is reserved for unexpected I/O problems.

pub mod browser;
pub mod code;
pub mod shell;

use anyhow::Result;

use crate::io::progress::ProgressSink;

pub use browser::BrowserTool;
pub use code::CodeTool;
pub use shell::ShellTool;

/// Abstraction over one tool backend.
pub trait ToolExecutor {
    /// Run the tool and return its result text. Must terminate within the
    /// executor's own timeout.
    fn run(&self, input: &str, sink: &dyn ProgressSink) -> Result<String>;
}

impl<T: ToolExecutor + ?Sized> ToolExecutor for &T {
    fn run(&self, input: &str, sink: &dyn ProgressSink) -> Result<String> {
        (**self).run(input, sink)
    }
}
