//! Deterministic, pure logic shared by the agent core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod json_repair;
pub mod plan;
pub mod step_machine;
pub mod types;
