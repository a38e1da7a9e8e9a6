//! Helpers for running child processes with timeouts and bounded output.

use std::io::{ErrorKind, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::{Error, Result};

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

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// A spawn failure is reported as [`Error::Launch`] naming `program`.
#[instrument(skip_all, fields(program, timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    program: &str,
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

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program, "failed to spawn command");
            return Err(Error::Launch {
                program: program.to_string(),
                source: e,
            });
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::io("stdout was not piped", ErrorKind::BrokenPipe.into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::io("stderr was not piped", ErrorKind::BrokenPipe.into()))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::io("stdin was not piped", ErrorKind::BrokenPipe.into()))?;
        match child_stdin.write_all(input) {
            Ok(()) => {}
            // The child exited without reading everything; its exit status tells the story.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!("child closed stdin before reading all input");
            }
            Err(e) => return Err(Error::io("write stdin", e)),
        }
        drop(child_stdin);
    }

    let mut timed_out = false;
    let status = match child
        .wait_timeout(timeout)
        .map_err(|e| Error::io("wait for command", e))?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().map_err(|e| Error::io("kill command", e))?;
            child
                .wait()
                .map_err(|e| Error::io("wait command after kill", e))?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle, "join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle, "join stderr")?;

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

fn join_output(
    handle: thread::JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
    context: &str,
) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result.map_err(|e| Error::io(context, e)),
        Err(_) => Err(Error::io(
            context,
            std::io::Error::other("output reader thread panicked"),
        )),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
