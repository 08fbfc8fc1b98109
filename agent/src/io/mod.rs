//! Side-effecting collaborators: configuration, the language model, child
//! processes, progress delivery, prompts and tool executors.

pub mod config;
pub mod llm;
pub mod process;
pub mod progress;
pub mod prompt;
pub mod tools;
