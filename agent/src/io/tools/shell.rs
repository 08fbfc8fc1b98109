//! Whitelisted shell command execution.
//!
//! Commands run without a shell: the command line is split into argv with
//! POSIX-style quoting, the program must be on the allow-list, and no
//! argument may carry shell metacharacters or parent-directory segments.

use std::io::ErrorKind;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::io::config::ShellConfig;
use crate::io::process::{is_spawn_not_found, run_command_with_timeout};
use crate::io::progress::{ProgressEvent, ProgressSink, emit};
use crate::io::tools::ToolExecutor;

const UNSAFE_CHARS: &[char] = &[
    ';', '|', '&', '`', '$', '(', ')', '<', '>', '*', '?', '[', ']', '{', '}', '!', '\\',
];
const PREVIEW_CHARS: usize = 50;

/// Executes one allow-listed command per step.
#[derive(Debug, Clone)]
pub struct ShellTool {
    config: ShellConfig,
}

impl ShellTool {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    /// Validate `line` and return its argv, or the rejection text.
    pub fn check(&self, line: &str) -> std::result::Result<Vec<String>, String> {
        let argv = split_command(line).map_err(|err| format!("Error parsing command: {err}"))?;
        let Some((program, args)) = argv.split_first() else {
            return Err("Error: Empty command.".to_string());
        };
        if !self.config.allowed_commands.iter().any(|allowed| allowed == program) {
            return Err(format!("Error: Command '{program}' not allowed."));
        }
        if let Some(arg) = args.iter().find(|arg| is_unsafe_argument(arg)) {
            return Err(format!("Error: Unsafe argument '{arg}'"));
        }
        Ok(argv)
    }

    fn execute(&self, argv: &[String], sink: &dyn ProgressSink) -> Result<String> {
        let program = &argv[0];
        let mut cmd = Command::new(program);
        cmd.args(&argv[1..]);
        if let Some(dir) = &self.config.workdir {
            cmd.current_dir(dir);
        }
        emit(
            sink,
            ProgressEvent::activity(format!("Running: {}", argv.join(" "))),
        );

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output =
            match run_command_with_timeout(cmd, None, timeout, self.config.output_limit_bytes) {
                Ok(output) => output,
                Err(err) if is_spawn_not_found(&err) => {
                    return Ok(reject(sink, format!("Error: Command '{program}' not found.")));
                }
                Err(err) if is_permission_denied(&err) => {
                    return Ok(reject(
                        sink,
                        format!("Error: Permission denied for '{program}': {err:#}"),
                    ));
                }
                Err(err) => return Err(err),
            };

        if output.timed_out {
            return Ok(reject(
                sink,
                format!("Error: Timeout after {}s.", self.config.timeout_secs),
            ));
        }
        let code = output.exit_code();
        debug!(program = %program, exit_code = code, "shell command finished");
        emit(
            sink,
            ProgressEvent::activity(format!("Shell finished (Exit: {code}).")),
        );
        Ok(output.render())
    }
}

impl ToolExecutor for ShellTool {
    #[instrument(skip_all, fields(command_bytes = input.len()))]
    fn run(&self, input: &str, sink: &dyn ProgressSink) -> Result<String> {
        let preview: String = input.chars().take(PREVIEW_CHARS).collect();
        emit(
            sink,
            ProgressEvent::activity(format!("Preparing shell command: {preview}...")),
        );
        match self.check(input) {
            Ok(argv) => self.execute(&argv, sink),
            Err(rejection) => {
                warn!(rejection = %rejection, "shell command rejected");
                Ok(reject(sink, rejection))
            }
        }
    }
}

fn reject(sink: &dyn ProgressSink, message: String) -> String {
    emit(sink, ProgressEvent::error(message.clone()));
    message
}

fn is_unsafe_argument(arg: &str) -> bool {
    arg.contains("..") || arg.contains(UNSAFE_CHARS)
}

fn is_permission_denied(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io_err| io_err.kind() == ErrorKind::PermissionDenied)
}

/// Split a command line into words, honoring single quotes, double quotes
/// and backslash escapes.
pub fn split_command(line: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err("No closing quotation"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err("No closing quotation"),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("No closing quotation"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err("No escaped character"),
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Join argv into a command line that [`split_command`] turns back into the
/// same words.
pub fn join_command<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter()
        .map(|word| quote_word(word.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_word(word: &str) -> String {
    let plain = !word.is_empty()
        && !word
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\'));
    if plain {
        return word.to_string();
    }
    if !word.contains('\'') {
        return format!("'{word}'");
    }
    let escaped = word.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    fn tool() -> ShellTool {
        ShellTool::new(ShellConfig::default())
    }

    #[test]
    fn split_honors_quotes_and_escapes() {
        assert_eq!(
            split_command(r#"echo 'a b' "c \"d\"" e\ f"#).expect("split"),
            vec!["echo", "a b", r#"c "d""#, "e f"]
        );
        assert_eq!(split_command("  ").expect("split"), Vec::<String>::new());
        assert_eq!(split_command("echo ''").expect("split"), vec!["echo", ""]);
        assert!(split_command("echo 'open").is_err());
    }

    #[test]
    fn join_then_split_preserves_words() {
        let argv = ["grep", "-r", "two words", "it's", ""];
        assert_eq!(split_command(&join_command(&argv)).expect("split"), argv);
    }

    #[test]
    fn check_rejects_disallowed_and_unsafe_commands() {
        let tool = tool();
        assert_eq!(tool.check("").unwrap_err(), "Error: Empty command.");
        assert_eq!(
            tool.check("rm -rf /").unwrap_err(),
            "Error: Command 'rm' not allowed."
        );
        assert_eq!(
            tool.check("cat ../secret").unwrap_err(),
            "Error: Unsafe argument '../secret'"
        );
        assert_eq!(
            tool.check("echo 'hi; rm x'").unwrap_err(),
            "Error: Unsafe argument 'hi; rm x'"
        );
        assert!(tool.check("echo \"unterminated").unwrap_err().starts_with("Error parsing command"));
        assert_eq!(tool.check("ls -la").expect("allowed"), vec!["ls", "-la"]);
    }

    #[test]
    fn rejection_is_returned_and_reported() {
        let sink = RecordingSink::default();
        let result = tool().run("sudo ls", &sink).expect("run");
        assert_eq!(result, "Error: Command 'sudo' not allowed.");
        assert!(sink.frames().contains(&"Agent Error: Error: Command 'sudo' not allowed.".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn runs_allowed_command() {
        let sink = RecordingSink::default();
        let result = tool().run("echo hello world", &sink).expect("run");
        assert_eq!(result, "Exit Code: 0\nOutput:\nhello world");
        assert!(sink.frames().iter().any(|frame| frame == "Agent: Shell finished (Exit: 0)."));
    }

    #[cfg(unix)]
    #[test]
    fn missing_program_reports_not_found() {
        let mut config = ShellConfig::default();
        config.allowed_commands.push("no-such-program-xyz".to_string());
        let result = ShellTool::new(config)
            .run("no-such-program-xyz", &RecordingSink::default())
            .expect("run");
        assert_eq!(result, "Error: Command 'no-such-program-xyz' not found.");
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_times_out() {
        let config = ShellConfig {
            allowed_commands: vec!["sleep".to_string()],
            timeout_secs: 1,
            ..ShellConfig::default()
        };
        let result = ShellTool::new(config)
            .run("sleep 5", &RecordingSink::default())
            .expect("run");
        assert_eq!(result, "Error: Timeout after 1s.");
    }
}
