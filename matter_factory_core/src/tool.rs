//! Running external tools with a deadline.

use crate::ProvisionError;
use std::io::Read;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::*;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs `command` directly (no shell) and waits at most `timeout` for it to
/// exit and for its output pipes to close.
///
/// A non-zero exit, a spawn failure, and a timeout are all reported as
/// [`ProvisionError::ExternalTool`].
pub fn run(mut command: Command, timeout: Duration) -> Result<Output, ProvisionError> {
    let tool = command.get_program().to_string_lossy().into_owned();
    debug!(tool, "spawning external tool");

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ProvisionError::external_tool(&tool, format!("failed to spawn: {}", e)))?;

    // drain while polling, a full pipe would stall the child
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProvisionError::external_tool(
                    &tool,
                    format!("timed out after {:?}", timeout),
                ));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProvisionError::external_tool(
                    &tool,
                    format!("failed waiting for exit: {}", e),
                ));
            }
        }
    };

    // a background descendant can hold the pipes open after the tool exits
    let timed_out = |_| {
        ProvisionError::external_tool(
            &tool,
            format!("timed out after {:?} waiting for output", timeout),
        )
    };
    let output = Output {
        status,
        stdout: collect(stdout, deadline).map_err(timed_out)?,
        stderr: collect(stderr, deadline).map_err(timed_out)?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(ProvisionError::external_tool(
            &tool,
            format!(
                "exited with status {}{}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!("; stderr={}", stderr)
                }
            ),
        ));
    }

    Ok(output)
}

fn drain(mut pipe: impl Read + Send + 'static) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// Waits for a drained pipe until `deadline`. A reader left behind on timeout
/// exits once the pipe's last writer closes it.
fn collect(pipe: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Result<Vec<u8>, ()> {
    let Some(rx) = pipe else {
        return Ok(Vec::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => Ok(buf),
        Err(RecvTimeoutError::Disconnected) => Ok(Vec::new()),
        Err(RecvTimeoutError::Timeout) => Err(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello"]);
        let output = run(cmd, DEFAULT_TOOL_TIMEOUT).unwrap();
        assert_eq!(output.stdout, b"hello\n");
    }

    #[test]
    fn non_zero_exit_is_external_tool_error() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo nope >&2; exit 3"]);
        match run(cmd, DEFAULT_TOOL_TIMEOUT) {
            Err(ProvisionError::ExternalTool { detail, .. }) => {
                assert!(detail.contains("status 3"), "{}", detail);
                assert!(detail.contains("nope"), "{}", detail);
            }
            other => panic!("expected ExternalTool error, got {:?}", other),
        }
    }

    #[test]
    fn slow_tool_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let result = run(cmd, Duration::from_millis(100));
        assert!(matches!(result, Err(ProvisionError::ExternalTool { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn background_child_holding_the_pipes_times_out() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo done; sleep 3 &"]);
        let started = Instant::now();
        match run(cmd, Duration::from_millis(200)) {
            Err(ProvisionError::ExternalTool { detail, .. }) => {
                assert!(detail.contains("timed out"), "{}", detail)
            }
            other => panic!("expected a timeout, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn missing_binary_is_external_tool_error() {
        let cmd = Command::new("/nonexistent/definitely-not-here");
        assert!(matches!(
            run(cmd, DEFAULT_TOOL_TIMEOUT),
            Err(ProvisionError::ExternalTool { .. })
        ));
    }
}
