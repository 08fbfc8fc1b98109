//! Prompt rendering for planning, corrections and the browser tool.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::types::Step;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const PLAN_REQUEST_TEMPLATE: &str = include_str!("prompts/plan_request.md");
const CORRECTION_TEMPLATE: &str = include_str!("prompts/correction.md");
const BROWSER_TEMPLATE: &str = include_str!("prompts/browser.md");

/// Failure text beyond this many bytes is cut before it reaches a prompt.
pub const FAILURE_BUDGET_BYTES: usize = 4_000;

/// Capability advertised to the planner.
#[derive(Debug, Clone, Serialize)]
struct ToolSpec {
    name: &'static str,
    summary: &'static str,
    field: &'static str,
    field_type: &'static str,
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "shell_terminal",
        summary: "run one whitelisted shell command without a shell (no pipes or redirects)",
        field: "command",
        field_type: "array of strings: program followed by its arguments",
    },
    ToolSpec {
        name: "code_interpreter",
        summary: "execute a Python script; missing modules are installed automatically",
        field: "code",
        field_type: "string: complete Python source",
    },
    ToolSpec {
        name: "browser",
        summary: "browse web pages and extract information",
        field: "input",
        field_type: "string: instruction for the browser agent",
    },
];

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("plan_request", PLAN_REQUEST_TEMPLATE)
            .expect("plan request template should be valid");
        env.add_template("correction", CORRECTION_TEMPLATE)
            .expect("correction template should be valid");
        env.add_template("browser", BROWSER_TEMPLATE)
            .expect("browser template should be valid");
        Self { env }
    }

    /// System message describing the tools and the plan format.
    pub fn planner_system(&self, max_steps: usize) -> Result<String> {
        let template = self.env.get_template("planner")?;
        Ok(template.render(context! {
            tools => TOOLS,
            max_steps => max_steps,
        })?)
    }

    pub fn plan_request(&self, query: &str) -> Result<String> {
        let template = self.env.get_template("plan_request")?;
        Ok(template.render(context! { query => query.trim() })?)
    }

    /// Prompt asking for one replacement step. `attempt` is zero-based.
    pub fn correction(
        &self,
        failed: &Step,
        failure: &str,
        attempt: u32,
        max_retries: u32,
    ) -> Result<String> {
        let template = self.env.get_template("correction")?;
        let tools: Vec<&str> = TOOLS.iter().map(|tool| tool.name).collect();
        Ok(template.render(context! {
            attempt => attempt + 1,
            max_attempts => max_retries + 1,
            step_json => failed.to_json(),
            failure => truncate_for_prompt(failure.trim(), FAILURE_BUDGET_BYTES),
            tools => tools,
        })?)
    }

    /// Instruction handed to the isolated browser agent.
    pub fn browser_instructions(&self, instruction: &str, max_actions: u32) -> Result<String> {
        let template = self.env.get_template("browser")?;
        Ok(template.render(context! {
            instruction => instruction.trim(),
            max_actions => max_actions,
        })?)
    }
}

/// Cut `text` to at most `budget` bytes on a char boundary, marking the cut.
pub fn truncate_for_prompt(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut end = budget;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {} bytes]", &text[..end], text.len() - end)
}
