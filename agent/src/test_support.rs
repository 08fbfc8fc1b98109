//! Test doubles for the language model, tool executors, dispatch and
//! progress delivery.
//!
//! All doubles are single-threaded and record what they were asked so tests
//! can assert on prompts, inputs and emitted frames.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::json;

use crate::core::types::Step;
use crate::dispatch::Dispatcher;
use crate::io::llm::LanguageModel;
use crate::io::progress::{ProgressEvent, ProgressSink};
use crate::io::tools::ToolExecutor;

/// Language model that answers from a queue. An exhausted queue answers `None`.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: RefCell<VecDeque<Option<String>>>,
    prompts: RefCell<Vec<String>>,
    systems: RefCell<Vec<Option<String>>>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(
                responses
                    .into_iter()
                    .map(|response| response.map(Into::into))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// User prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    /// System messages received so far, one per request.
    pub fn systems(&self) -> Vec<Option<String>> {
        self.systems.borrow().clone()
    }
}

impl LanguageModel for ScriptedLlm {
    fn complete(&self, _model: &str, prompt: &str, system: Option<&str>) -> Option<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.systems.borrow_mut().push(system.map(str::to_string));
        self.responses.borrow_mut().pop_front().flatten()
    }
}

/// Queue of scripted outcomes with an optional repeating fallback.
#[derive(Debug, Default)]
struct Script {
    queued: VecDeque<std::result::Result<String, String>>,
    fallback: Option<std::result::Result<String, String>>,
}

impl Script {
    fn from_items<'a>(items: impl IntoIterator<Item = std::result::Result<&'a str, &'a str>>) -> Self {
        Self {
            queued: items
                .into_iter()
                .map(|item| item.map(str::to_string).map_err(str::to_string))
                .collect(),
            fallback: None,
        }
    }

    fn next(&mut self) -> Result<String> {
        let outcome = self
            .queued
            .pop_front()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| Err("script exhausted".to_string()));
        outcome.map_err(|message| anyhow!(message))
    }
}

/// Tool executor with scripted results that records its inputs.
#[derive(Debug, Default)]
pub struct ScriptedTool {
    script: RefCell<Script>,
    inputs: RefCell<Vec<String>>,
}

impl ScriptedTool {
    pub fn new<'a>(items: impl IntoIterator<Item = std::result::Result<&'a str, &'a str>>) -> Self {
        Self {
            script: RefCell::new(Script::from_items(items)),
            inputs: RefCell::default(),
        }
    }

    /// Returns `result` for every call.
    pub fn repeating(result: &str) -> Self {
        let tool = Self::default();
        tool.script.borrow_mut().fallback = Some(Ok(result.to_string()));
        tool
    }

    /// Fails every call with `message`.
    pub fn failing(message: &str) -> Self {
        let tool = Self::default();
        tool.script.borrow_mut().fallback = Some(Err(message.to_string()));
        tool
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.borrow().clone()
    }
}

impl ToolExecutor for ScriptedTool {
    fn run(&self, input: &str, _sink: &dyn ProgressSink) -> Result<String> {
        self.inputs.borrow_mut().push(input.to_string());
        self.script.borrow_mut().next()
    }
}

/// Dispatcher with scripted results that records every dispatched step.
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    script: RefCell<Script>,
    dispatched: RefCell<Vec<Step>>,
}

impl ScriptedDispatcher {
    pub fn new<'a>(items: impl IntoIterator<Item = std::result::Result<&'a str, &'a str>>) -> Self {
        Self {
            script: RefCell::new(Script::from_items(items)),
            dispatched: RefCell::default(),
        }
    }

    pub fn repeating(result: &str) -> Self {
        let dispatcher = Self::default();
        dispatcher.script.borrow_mut().fallback = Some(Ok(result.to_string()));
        dispatcher
    }

    /// Queued results first, then `result` for every later call.
    pub fn then_repeating(self, result: &str) -> Self {
        self.script.borrow_mut().fallback = Some(Ok(result.to_string()));
        self
    }

    pub fn dispatched(&self) -> Vec<Step> {
        self.dispatched.borrow().clone()
    }
}

impl Dispatcher for ScriptedDispatcher {
    fn dispatch(&self, step: &Step, _sink: &dyn ProgressSink) -> Result<String> {
        self.dispatched.borrow_mut().push(step.clone());
        self.script.borrow_mut().next()
    }
}

/// Sink that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events rendered as wire frames.
    pub fn frames(&self) -> Vec<String> {
        self.events().iter().map(ProgressEvent::to_frame).collect()
    }
}

impl ProgressSink for RecordingSink {
    fn send(&self, event: ProgressEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("recording sink poisoned"))?
            .push(event);
        Ok(())
    }
}

/// Shell step running `argv`.
pub fn shell_step(description: &str, argv: &[&str]) -> Step {
    Step::new("shell_terminal", description).with_param("command", json!(argv))
}

/// Planner answer listing `count` shell steps named `Step 1`, `Step 2`, ...
pub fn shell_plan_json(count: usize) -> String {
    let steps: Vec<_> = (1..=count)
        .map(|n| json!({"tool": "shell_terminal", "description": format!("Step {n}"), "command": ["echo", n.to_string()]}))
        .collect();
    serde_json::Value::Array(steps).to_string()
}
