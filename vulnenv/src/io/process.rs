//! Child process invocation for the external decision policy.
//!
//! The policy command gets the prompt on stdin and answers on stdout. Both
//! pipes are drained on their own threads so a chatty child cannot block on a
//! full pipe while we wait for it.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK_BYTES: usize = 8192;

/// Bounded capture of one finished (or killed) child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes read past the output limit and discarded.
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// First few hundred bytes of stderr, for error messages.
    pub fn stderr_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let trimmed = text.trim();
        match trimmed.char_indices().nth(400) {
            Some((cut, _)) => format!("{}...", &trimmed[..cut]),
            None => trimmed.to_string(),
        }
    }
}

/// Spawn `cmd`, feed it `stdin`, and wait at most `timeout`.
///
/// A child still running at the deadline is killed and reported with
/// `timed_out = true` rather than as an error. At most `output_limit_bytes` of
/// each stream is kept.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn policy command")?;
    debug!(pid = child.id(), "policy command spawned");

    let stdout_reader = spawn_reader(&mut child, Stream::Stdout, output_limit_bytes)?;
    let stderr_reader = spawn_reader(&mut child, Stream::Stderr, output_limit_bytes)?;

    if let Some(input) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading its input closes the pipe early.
        if let Err(err) = pipe.write_all(input) {
            warn!(err = %err, "policy command closed stdin early");
        }
    }

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "policy command timed out, killing");
            child.kill().context("kill timed out command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_reader).context("collect stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_reader).context("collect stderr")?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        warn!(stdout_dropped, stderr_dropped, "command output over limit");
    }

    debug!(exit_code = ?status.code(), timed_out, "policy command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Reader = JoinHandle<Result<(Vec<u8>, usize)>>;

fn spawn_reader(child: &mut Child, stream: Stream, limit: usize) -> Result<Reader> {
    let handle = match stream {
        Stream::Stdout => {
            let pipe = child
                .stdout
                .take()
                .ok_or_else(|| anyhow!("stdout was not piped"))?;
            thread::spawn(move || read_limited(pipe, limit))
        }
        Stream::Stderr => {
            let pipe = child
                .stderr
                .take()
                .ok_or_else(|| anyhow!("stderr was not piped"))?;
            thread::spawn(move || read_limited(pipe, limit))
        }
    };
    Ok(handle)
}

fn join_reader(handle: Reader) -> Result<(Vec<u8>, usize)> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

/// Drain `reader` to EOF, keeping the first `limit` bytes.
fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        let n = reader.read(&mut chunk).context("read command output")?;
        if n == 0 {
            return Ok((kept, dropped));
        }
        let keep = n.min(limit.saturating_sub(kept.len()));
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }
}
