//! Forgiving JSON decoding for language-model output.
//!
//! Decoding is an ordered pipeline of pure strategies:
//!
//! 1. [`strip_code_fence`] removes markdown fencing and surrounding prose.
//! 2. [`repair_json`] rewrites near-miss JSON (single quotes, Python literals,
//!    bare words, trailing commas, unclosed brackets) and the result is parsed.
//! 3. The fence-stripped text is parsed as-is.
//!
//! The first strategy that yields a value wins; [`parse_lenient`] reports the
//! strict parser's error when every strategy fails.

use serde_json::Value;

/// Which pipeline stage produced the decoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Repaired,
    Strict,
}

/// Return the contents of the first markdown code fence, or the trimmed input
/// when it carries no fence.
///
/// An opening fence without a closing one (truncated output) yields everything
/// after the opening line.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_start = &trimmed[start + 3..];
    // Skip the info string (e.g. `json`) on the opening line.
    let body = match after_start.find('\n') {
        Some(pos) => &after_start[pos + 1..],
        None => after_start.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Rewrite near-miss JSON into something `serde_json` accepts.
///
/// Leading prose before the first `[`/`{` and anything after the top-level
/// value closes are dropped. Returns `None` when the text holds no JSON
/// container or its brackets are mismatched.
pub fn repair_json(input: &str) -> Option<String> {
    let start = input.find(['[', '{'])?;
    let body = &input[start..];

    let mut out = String::with_capacity(body.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            match c {
                '\\' => match chars.next() {
                    // `\'` is not a JSON escape.
                    Some('\'') => out.push('\''),
                    Some(next) => {
                        out.push('\\');
                        out.push(next);
                    }
                    None => {}
                },
                c if c == q => {
                    out.push('"');
                    quote = None;
                }
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c => out.push(c),
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push('"');
            }
            '{' => {
                closers.push('}');
                out.push(c);
            }
            '[' => {
                closers.push(']');
                out.push(c);
            }
            '}' | ']' => {
                trim_trailing_comma(&mut out);
                if closers.pop() != Some(c) {
                    return None;
                }
                out.push(c);
                if closers.is_empty() {
                    return Some(out);
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                if out.ends_with(|p: char| p.is_ascii_digit() || p == '.') {
                    // Exponent of a number literal (`1e5`).
                    out.push(c);
                    continue;
                }
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' || next == '-' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "true" | "True" => out.push_str("true"),
                    "false" | "False" => out.push_str("false"),
                    "null" | "None" => out.push_str("null"),
                    _ => {
                        out.push('"');
                        out.push_str(&word);
                        out.push('"');
                    }
                }
            }
            c => out.push(c),
        }
    }

    // Truncated output: close whatever is still open.
    if quote.is_some() {
        out.push('"');
    }
    while let Some(closer) = closers.pop() {
        trim_trailing_comma(&mut out);
        out.push(closer);
    }
    Some(out)
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}

/// Decode language-model output through the full pipeline.
///
/// Repair is tried from each opening bracket in turn. A value that holds an
/// object wins; otherwise the first value that decodes at all is kept, so a
/// bracketed aside such as `Plan [draft]:` does not shadow the real payload.
pub fn parse_lenient(raw: &str) -> Result<(Value, ParseStrategy), serde_json::Error> {
    let cleaned = strip_code_fence(raw);
    let mut fallback = None;
    for (start, _) in cleaned.match_indices(['[', '{']) {
        let Some(value) = repair_json(&cleaned[start..])
            .and_then(|repaired| serde_json::from_str::<Value>(&repaired).ok())
        else {
            continue;
        };
        if holds_object(&value) {
            return Ok((value, ParseStrategy::Repaired));
        }
        fallback.get_or_insert(value);
    }
    if let Some(value) = fallback {
        return Ok((value, ParseStrategy::Repaired));
    }
    serde_json::from_str::<Value>(cleaned).map(|value| (value, ParseStrategy::Strict))
}

fn holds_object(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(Value::is_object),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_fence_with_language_tag() {
        let raw = "```json\n[{\"tool\": \"browser\"}]\n```";
        assert_eq!(strip_code_fence(raw), "[{\"tool\": \"browser\"}]");
    }

    #[test]
    fn strip_fence_ignores_surrounding_prose() {
        let raw = "Here is the plan:\n```\n{\"a\": 1}\n```\nLet me know!";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
    }

    #[test]
    fn strip_fence_passes_plain_text_through() {
        assert_eq!(strip_code_fence("  [1, 2]\n"), "[1, 2]");
    }

    #[test]
    fn strip_fence_handles_missing_closing_fence() {
        assert_eq!(strip_code_fence("```json\n[1, 2]"), "[1, 2]");
    }

    #[test]
    fn repair_removes_trailing_commas() {
        let repaired = repair_json("[{\"a\": 1,}, {\"b\": [1, 2,],},]").expect("repair");
        let value: Value = serde_json::from_str(&repaired).expect("valid");
        assert_eq!(value, json!([{"a": 1}, {"b": [1, 2]}]));
    }

    #[test]
    fn repair_converts_single_quotes_and_python_literals() {
        let repaired =
            repair_json("{'tool': 'code', 'ok': True, 'x': None, 'q': 'say \"hi\"'}")
                .expect("repair");
        let value: Value = serde_json::from_str(&repaired).expect("valid");
        assert_eq!(
            value,
            json!({"tool": "code", "ok": true, "x": null, "q": "say \"hi\""})
        );
    }

    #[test]
    fn repair_quotes_bare_keys_and_keeps_exponents() {
        let repaired = repair_json("{tool: shell_terminal, n: 1e3}").expect("repair");
        let value: Value = serde_json::from_str(&repaired).expect("valid");
        assert_eq!(value, json!({"tool": "shell_terminal", "n": 1000.0}));
    }

    #[test]
    fn repair_closes_truncated_output() {
        let repaired = repair_json("[{\"tool\": \"shell\", \"command\": [\"ls\"").expect("repair");
        let value: Value = serde_json::from_str(&repaired).expect("valid");
        assert_eq!(value, json!([{"tool": "shell", "command": ["ls"]}]));
    }

    #[test]
    fn repair_escapes_raw_newlines_in_strings() {
        let repaired = repair_json("{\"code\": \"print(1)\nprint(2)\"}").expect("repair");
        let value: Value = serde_json::from_str(&repaired).expect("valid");
        assert_eq!(value["code"], "print(1)\nprint(2)");
    }

    #[test]
    fn repair_drops_prose_around_value() {
        let repaired = repair_json("Sure! [1, 2] Hope that helps.").expect("repair");
        assert_eq!(repaired, "[1, 2]");
    }

    #[test]
    fn repair_rejects_mismatched_brackets() {
        assert!(repair_json("[1, 2}").is_none());
        assert!(repair_json("no json here").is_none());
    }

    #[test]
    fn parse_lenient_prefers_repair_then_strict() {
        let (value, strategy) = parse_lenient("```json\n[1, 2,]\n```").expect("parse");
        assert_eq!(value, json!([1, 2]));
        assert_eq!(strategy, ParseStrategy::Repaired);

        let (value, strategy) = parse_lenient("42").expect("parse");
        assert_eq!(value, json!(42));
        assert_eq!(strategy, ParseStrategy::Strict);
    }

    #[test]
    fn parse_lenient_skips_bracketed_prose_before_the_payload() {
        let raw = "Plan [draft]:\n[{\"tool\": \"shell_terminal\", \"command\": [\"ls\"]}]";
        let (value, strategy) = parse_lenient(raw).expect("parse");
        assert_eq!(value, json!([{"tool": "shell_terminal", "command": ["ls"]}]));
        assert_eq!(strategy, ParseStrategy::Repaired);

        let (value, _) = parse_lenient("Counts [a] then [1, 2]").expect("parse");
        assert_eq!(value, json!(["a"]));
    }

    #[test]
    fn parse_lenient_reports_strict_error() {
        assert!(parse_lenient("definitely not json").is_err());
    }
}
