//! Plan parsing: raw language-model text into validated, ordered steps.

use std::fmt;

use serde_json::{Map, Value};

use crate::core::json_repair::parse_lenient;
use crate::core::types::Step;

/// Why a plan was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanFormatErrorKind {
    /// No decoding strategy produced JSON.
    InvalidJson(String),
    /// Top-level value is neither an array nor an object.
    UnexpectedTopLevel(&'static str),
    ElementNotObject { index: usize },
    MissingTool { index: usize },
}

/// A plan that could not be turned into steps. Keeps the raw text for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanFormatError {
    pub kind: PlanFormatErrorKind,
    pub raw: String,
}

impl fmt::Display for PlanFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PlanFormatErrorKind::InvalidJson(reason) => {
                write!(f, "plan is not valid JSON: {reason}")
            }
            PlanFormatErrorKind::UnexpectedTopLevel(found) => {
                write!(f, "plan must be a JSON array of steps, found {found}")
            }
            PlanFormatErrorKind::ElementNotObject { index } => {
                write!(f, "plan step {index} is not a JSON object")
            }
            PlanFormatErrorKind::MissingTool { index } => {
                write!(f, "plan step {index} is missing `tool`")
            }
        }
    }
}

impl std::error::Error for PlanFormatError {}

/// Parse raw planner output into steps.
///
/// Accepts a JSON array of step objects, a single step object (wrapped into a
/// one-element plan), or an object whose `steps` field holds the array.
/// Missing or empty descriptions are synthesized as `Execute {tool} step {n}`.
pub fn parse_plan(raw: &str) -> Result<Vec<Step>, PlanFormatError> {
    let fail = |kind| PlanFormatError {
        kind,
        raw: raw.to_string(),
    };

    let (value, _) =
        parse_lenient(raw).map_err(|err| fail(PlanFormatErrorKind::InvalidJson(err.to_string())))?;

    let elements = match value {
        Value::Array(items) => items,
        Value::Object(map) if map.contains_key("tool") => vec![Value::Object(map)],
        Value::Object(mut map) => match map.remove("steps") {
            Some(Value::Array(items)) => items,
            _ => return Err(fail(PlanFormatErrorKind::MissingTool { index: 0 })),
        },
        other => {
            return Err(fail(PlanFormatErrorKind::UnexpectedTopLevel(json_type(
                &other,
            ))));
        }
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| match element {
            Value::Object(map) => {
                step_from_object(map, index).ok_or_else(|| fail(PlanFormatErrorKind::MissingTool { index }))
            }
            _ => Err(fail(PlanFormatErrorKind::ElementNotObject { index })),
        })
        .collect()
}

/// Build a step from one decoded object. Returns `None` when `tool` is absent,
/// empty, or not a string.
///
/// `index` is zero-based; the synthesized description numbers steps from one.
pub fn step_from_object(map: Map<String, Value>, index: usize) -> Option<Step> {
    step_with_default_description(map, |tool| format!("Execute {tool} step {}", index + 1))
}

/// Like [`step_from_object`], with a caller-chosen fallback description.
pub fn step_with_default_description(
    mut map: Map<String, Value>,
    default_description: impl FnOnce(&str) -> String,
) -> Option<Step> {
    let tool = match map.remove("tool") {
        Some(Value::String(tool)) if !tool.trim().is_empty() => tool.trim().to_string(),
        _ => return None,
    };
    let description = match map.remove("description") {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        _ => default_description(&tool),
    };
    Some(Step {
        tool,
        description,
        parameters: map,
    })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
