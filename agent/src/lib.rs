//! Autonomous task-execution agent.
//!
//! A user goal is turned into a plan of tool calls by a language model; each
//! step runs through a shell, code or browser tool, failed steps are repaired
//! with model-proposed corrections, and progress is streamed to an observer.
//!
//! - **[`core`]**: Pure logic (plan parsing, JSON repair, failure
//!   classification, the per-step retry machine, run records). No I/O.
//! - **[`io`]**: Side-effecting collaborators (config, Ollama, child
//!   processes, prompts, progress sinks, tool executors).
//!
//! Orchestration ([`dispatch`], [`correction`], [`step`], [`workflow`]) wires
//! core logic to the collaborators through traits so every layer can be tested
//! with scripted doubles. [`session`] builds the real collaborators.
//!
//! ## External helpers
//!
//! Browser steps are delegated to a helper program that this crate does not
//! ship. `browser.helper_script` in `agent.toml` (default
//! `run_browser_task.py`, resolved from the working directory) must point at
//! a script that accepts one JSON argument `{"instructions", "model"}` and
//! prints one JSON object, `{"result": ..}` or `{"error": ..}`. Any browser
//! automation library works behind that contract. Without it, browser steps
//! fail with `Error: helper script not found at <path>` and go through the
//! normal correction loop; shell and code steps are unaffected.

pub mod cancel;
pub mod core;
pub mod correction;
pub mod dispatch;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
