use std::io::{ErrorKind, Read};
use std::process::{Child, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use kubeclaw_domain::{Command, ToolExecutor, ToolResult, SPAWN_FAILURE_EXIT_CODE};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Per-stream capture limit. Redaction truncates far below this.
const MAX_STREAM_BYTES: u64 = 8 * 1024 * 1024;

/// Extra time to collect buffered output once the child has exited.
const READ_GRACE: Duration = Duration::from_millis(250);

const READ_CHUNK: usize = 8 * 1024;

/// Runs commands as real subprocesses with a hard deadline.
///
/// Output is collected over channels until the deadline, so a descendant
/// that inherits the pipes (an exec credential plugin, say) cannot hold the
/// call open after the command itself is gone.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubectlExecutor;

impl ToolExecutor for KubectlExecutor {
    fn run(&self, command: &Command, timeout: Duration) -> ToolResult {
        let Some((program, args)) = command.tokens().split_first() else {
            return ToolResult::new("", "command is empty", SPAWN_FAILURE_EXIT_CODE);
        };

        let started = Instant::now();
        let spawned = std::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                warn!(%command, error = %err, "failed to spawn command");
                return ToolResult::new(
                    "",
                    format!("failed to start {program}: {err}"),
                    SPAWN_FAILURE_EXIT_CODE,
                );
            }
        };

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        match child.wait_timeout(timeout) {
            Ok(Some(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                let collect_until = (started + timeout).max(Instant::now() + READ_GRACE);
                debug!(%command, exit_code, "command finished");
                ToolResult::new(
                    collect(stdout, collect_until),
                    collect(stderr, collect_until),
                    exit_code,
                )
            }
            Ok(None) => {
                warn!(%command, timeout_secs = timeout.as_secs(), "command timed out");
                reap(&mut child);
                ToolResult::timed_out(timeout)
            }
            Err(err) => {
                reap(&mut child);
                ToolResult::new(
                    "",
                    format!("failed to wait for {program}: {err}"),
                    SPAWN_FAILURE_EXIT_CODE,
                )
            }
        }
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Forward the pipe in chunks; the thread ends at EOF or when the receiver
/// is dropped.
fn spawn_reader<R>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|pipe| {
        let (sender, receiver) = mpsc::channel();
        std::thread::spawn(move || {
            let mut pipe = pipe.take(MAX_STREAM_BYTES);
            let mut chunk = vec![0_u8; READ_CHUNK];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => {
                        if sender.send(chunk[..read].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => {}
                    Err(_) => break,
                }
            }
        });
        receiver
    })
}

/// Everything the reader forwarded before EOF or `until`, whichever is first.
fn collect(receiver: Option<Receiver<Vec<u8>>>, until: Instant) -> String {
    let Some(receiver) = receiver else {
        return String::new();
    };
    let mut bytes = Vec::new();
    while let Ok(chunk) =
        receiver.recv_timeout(until.saturating_duration_since(Instant::now()))
    {
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use kubeclaw_domain::TIMEOUT_EXIT_CODE;

    fn sh(script: &str) -> Command {
        Command::from_tokens(vec!["sh".into(), "-c".into(), script.into()])
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let result = KubectlExecutor.run(&sh("echo out; echo err >&2; exit 3"), Duration::from_secs(5));
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert_eq!(result.exit_code, 3);
    }

    #[test]
    fn timeout_becomes_a_failed_result() {
        let result = KubectlExecutor.run(&sh("sleep 5"), Duration::from_secs(1));
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert!(result.is_timeout());
        assert!(result.stderr.contains("timed out"));
    }

    #[test]
    fn grandchild_holding_the_pipe_does_not_extend_a_timeout() {
        let started = Instant::now();
        let result = KubectlExecutor.run(&sh("sleep 6 & sleep 30"), Duration::from_secs(1));
        assert!(result.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    }

    #[test]
    fn finished_command_keeps_output_despite_a_lingering_grandchild() {
        let started = Instant::now();
        let result = KubectlExecutor.run(&sh("echo out; sleep 6 &"), Duration::from_secs(2));
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "out");
        assert!(!result.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    }

    #[test]
    fn missing_binary_is_a_spawn_failure() {
        let command = Command::from_tokens(vec!["kubeclaw-no-such-binary".into()]);
        let result = KubectlExecutor.run(&command, Duration::from_secs(1));
        assert_eq!(result.exit_code, SPAWN_FAILURE_EXIT_CODE);
        assert!(result.stderr.starts_with("failed to start kubeclaw-no-such-binary"));
    }
}
