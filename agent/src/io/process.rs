//! Helpers for running tool child processes with timeouts and bounded output.

use std::io::{ErrorKind, Read, Write};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or -1 when the process was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Render the result text handed back to the agent:
    /// `Exit Code: <n>` followed by non-empty `Output:` and `Errors:` blocks.
    pub fn render(&self) -> String {
        let mut buf = format!("Exit Code: {}\n", self.exit_code());
        let stdout = self.stdout_text();
        if !stdout.is_empty() {
            buf.push_str(&format!("Output:\n{stdout}\n"));
            if self.stdout_truncated > 0 {
                buf.push_str(&format!("[stdout truncated {} bytes]\n", self.stdout_truncated));
            }
        }
        let stderr = self.stderr_text();
        if !stderr.is_empty() {
            buf.push_str(&format!("Errors:\n{stderr}\n"));
            if self.stderr_truncated > 0 {
                buf.push_str(&format!("[stderr truncated {} bytes]\n", self.stderr_truncated));
            }
        }
        buf.trim_end().to_string()
    }
}

/// True if `err` comes from spawning a program that does not exist.
pub fn is_spawn_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io_err| io_err.kind() == ErrorKind::NotFound)
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child runs in its own process group. When it outlives `timeout` the whole group is killed
/// and the result is reported with `timed_out = true`. Output readers get at most
/// [`DRAIN_GRACE`] past the timeout to reach end of stream; whatever was captured by then is
/// returned, so a descendant holding the pipes open cannot stall the caller.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout_capture = spawn_reader(stdout, output_limit_bytes, done_tx.clone());
    let stderr_capture = spawn_reader(stderr, output_limit_bytes, done_tx);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing process group"
            );
            timed_out = true;
            kill_process_group(child.id());
            if let Err(err) = child.kill() {
                debug!(err = %err, "child already gone after group kill");
            }
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = started + timeout + DRAIN_GRACE;
    let mut open_streams = 2;
    while open_streams > 0 {
        let wait = deadline.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(wait) {
            Ok(()) => open_streams -= 1,
            Err(RecvTimeoutError::Timeout) => {
                warn!(open_streams, "output still open past deadline, detaching readers");
                kill_process_group(child.id());
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let (stdout, stdout_truncated) = stdout_capture.take();
    let (stderr, stderr_truncated) = stderr_capture.take();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// How long output readers may keep draining after the command's timeout.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: usize,
}

/// Bytes captured from one stream, shared with its reader thread.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Captured>>);

impl Capture {
    fn lock(&self) -> MutexGuard<'_, Captured> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, chunk: &[u8], limit: usize) {
        let mut captured = self.lock();
        let remaining = limit.saturating_sub(captured.bytes.len());
        let keep = chunk.len().min(remaining);
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.truncated += chunk.len() - keep;
    }

    fn take(&self) -> (Vec<u8>, usize) {
        let captured = std::mem::take(&mut *self.lock());
        (captured.bytes, captured.truncated)
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut reader: R,
    limit: usize,
    done: mpsc::Sender<()>,
) -> Capture {
    let capture = Capture::default();
    let shared = capture.clone();
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => shared.append(&chunk[..n], limit),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    debug!(err = %err, "output read failed");
                    break;
                }
            }
        }
        // The receiver is gone once the caller stopped waiting.
        let _ = done.send(());
    });
    capture
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let result = Command::new("kill")
        .arg("-KILL")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(status) if status.success() => debug!(pgid, "killed process group"),
        Ok(_) => debug!(pgid, "process group already empty"),
        Err(err) => warn!(err = %err, pgid, "failed to run kill for process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_stderr() {
        let output = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(5),
            1000,
        )
        .expect("run");
        assert_eq!(output.exit_code(), 3);
        assert_eq!(output.render(), "Exit Code: 3\nOutput:\nout\n\nErrors:\nerr");
        assert!(!output.timed_out);
    }

    #[test]
    fn render_omits_empty_blocks() {
        let output =
            run_command_with_timeout(sh("true"), None, Duration::from_secs(5), 1000).expect("run");
        assert_eq!(output.render(), "Exit Code: 0");
    }

    #[test]
    fn kills_on_timeout() {
        let output = run_command_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 1000)
            .expect("run");
        assert!(output.timed_out);
    }

    #[test]
    fn timeout_kills_background_grandchildren() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 8 & wait"),
            None,
            Duration::from_millis(300),
            1000,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn lingering_grandchild_does_not_hold_output_open() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("echo started; sleep 8 &"),
            None,
            Duration::from_secs(1),
            1000,
        )
        .expect("run");
        assert!(!output.timed_out);
        assert_eq!(output.exit_code(), 0);
        assert_eq!(output.stdout_text(), "started\n");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn bounds_captured_output() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(5),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn feeds_stdin() {
        let output = run_command_with_timeout(
            Command::new("cat"),
            Some(b"piped"),
            Duration::from_secs(5),
            1000,
        )
        .expect("run");
        assert_eq!(output.stdout_text(), "piped");
    }

    #[test]
    fn missing_program_is_detected() {
        let err = run_command_with_timeout(
            Command::new("definitely-not-a-real-program-xyz"),
            None,
            Duration::from_secs(1),
            1000,
        )
        .unwrap_err();
        assert!(is_spawn_not_found(&err));
    }
}
