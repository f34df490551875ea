//! Running external commands with timeouts, cancellation, and bounded output.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::exit_codes::ERROR_EXIT_STATUS;

/// How often a running child is checked for cancellation and deadlines.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default cap on captured output per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Shared flag observed between directives and while waiting on children.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One command to execute.
#[derive(Debug, Clone, Copy)]
pub struct ProcessRequest<'a> {
    pub argv: &'a [String],
    pub workdir: &'a Path,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub cancel: &'a CancelToken,
    /// Copy child output to our own stdout/stderr while capturing it.
    pub echo: bool,
}

/// Exit code plus combined output (stdout followed by stderr).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

/// A command that could not produce an exit code.
#[derive(Debug, Error)]
pub enum ProcessFailure {
    #[error("cannot run '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' was interrupted")]
    Interrupted { program: String },

    #[error("'{program}' ended without an exit code")]
    InvalidExitValue { program: String },

    #[error("'{program}' timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("'{program}': {message}")]
    Other { program: String, message: String },
}

impl ProcessFailure {
    /// Sentinel recorded in place of a real exit code.
    pub fn exit_code(&self) -> i32 {
        ERROR_EXIT_STATUS
    }
}

/// Process layer seam; tests substitute a scripted runner.
pub trait CommandRunner: Sync {
    fn run(&self, request: &ProcessRequest<'_>) -> Result<CommandOutput, ProcessFailure>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    output_limit_bytes: usize,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

impl SystemRunner {
    pub fn with_output_limit(output_limit_bytes: usize) -> Self {
        Self { output_limit_bytes }
    }
}

enum Ending {
    Exited(ExitStatus),
    Cancelled,
    TimedOut(Duration),
}

impl CommandRunner for SystemRunner {
    #[instrument(skip_all, fields(program = request.argv.first().map(String::as_str), workdir = %request.workdir.display()))]
    fn run(&self, request: &ProcessRequest<'_>) -> Result<CommandOutput, ProcessFailure> {
        let Some((program, args)) = request.argv.split_first() else {
            return Err(ProcessFailure::Other {
                program: String::new(),
                message: "empty command".to_string(),
            });
        };
        let io_failure = |source: std::io::Error| ProcessFailure::Io {
            program: program.clone(),
            source,
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning child process");
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, "failed to spawn command");
                return Err(io_failure(e));
            }
        };

        let limit = self.output_limit_bytes;
        let echo = request.echo;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_handle = thread::spawn(move || match stdout {
            Some(stream) => read_stream_limited(stream, limit, echo.then(std::io::stdout)),
            None => Ok((Vec::new(), 0)),
        });
        let stderr_handle = thread::spawn(move || match stderr {
            Some(stream) => read_stream_limited(stream, limit, echo.then(std::io::stderr)),
            None => Ok((Vec::new(), 0)),
        });

        let ending = wait_for(&mut child, request).map_err(io_failure)?;

        let (mut output, stdout_truncated) = join_output(stdout_handle).map_err(io_failure)?;
        let (stderr_bytes, stderr_truncated) = join_output(stderr_handle).map_err(io_failure)?;
        output.extend_from_slice(&stderr_bytes);
        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        let status = match ending {
            Ending::Exited(status) => status,
            Ending::Cancelled => {
                return Err(ProcessFailure::Interrupted {
                    program: program.clone(),
                });
            }
            Ending::TimedOut(timeout) => {
                return Err(ProcessFailure::Timeout {
                    program: program.clone(),
                    secs: timeout.as_secs(),
                });
            }
        };
        let exit_code = status
            .code()
            .ok_or_else(|| ProcessFailure::InvalidExitValue {
                program: program.clone(),
            })?;

        debug!(exit_code, "command finished");
        Ok(CommandOutput {
            exit_code,
            output: String::from_utf8_lossy(&output).into_owned(),
        })
    }
}

/// Wait in short slices so cancellation and the deadline are both honored.
fn wait_for(child: &mut Child, request: &ProcessRequest<'_>) -> std::io::Result<Ending> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
            return Ok(Ending::Exited(status));
        }
        if request.cancel.is_cancelled() {
            warn!("run cancelled, killing command");
            kill(child)?;
            return Ok(Ending::Cancelled);
        }
        if let Some(timeout) = request.timeout
            && started.elapsed() >= timeout
        {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill(child)?;
            return Ok(Ending::TimedOut(timeout));
        }
    }
}

fn kill(child: &mut Child) -> std::io::Result<()> {
    child.kill()?;
    child.wait()?;
    Ok(())
}

fn join_output(
    handle: thread::JoinHandle<std::io::Result<(Vec<u8>, usize)>>,
) -> std::io::Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::other("output reader thread panicked")),
    }
}

/// Drain `reader`, keeping at most `limit` bytes and optionally echoing everything.
fn read_stream_limited<R: Read, W: Write>(
    mut reader: R,
    limit: usize,
    mut echo: Option<W>,
) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let echo_failure = match echo.as_mut() {
            Some(writer) => writer
                .write_all(&chunk[..n])
                .and_then(|()| writer.flush())
                .err(),
            None => None,
        };
        if let Some(e) = echo_failure {
            warn!(err = %e, "failed to echo command output");
            echo = None;
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

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    fn run(parts: &[&str], timeout: Option<Duration>, cancel: &CancelToken) -> Result<CommandOutput, ProcessFailure> {
        let temp = tempfile::tempdir().expect("tempdir");
        let argv = argv(parts);
        SystemRunner::default().run(&ProcessRequest {
            argv: &argv,
            workdir: temp.path(),
            timeout,
            cancel,
            echo: false,
        })
    }

    #[test]
    fn captures_exit_code_and_combined_output() {
        let output = run(&["sh", "-c", "echo out; echo err >&2; exit 3"], None, &CancelToken::new())
            .expect("run");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.output, "out\nerr\n");
    }

    #[test]
    fn runs_in_the_requested_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let argv = argv(&["sh", "-c", "touch marker"]);
        let cancel = CancelToken::new();
        let output = SystemRunner::default()
            .run(&ProcessRequest {
                argv: &argv,
                workdir: temp.path(),
                timeout: None,
                cancel: &cancel,
                echo: false,
            })
            .expect("run");
        assert_eq!(output.exit_code, 0);
        assert!(temp.path().join("marker").exists());
    }

    #[test]
    fn missing_program_is_an_io_failure() {
        let err = run(&["drover-no-such-program"], None, &CancelToken::new()).expect_err("spawn");
        assert!(matches!(err, ProcessFailure::Io { .. }));
        assert_eq!(err.exit_code(), ERROR_EXIT_STATUS);
    }

    #[test]
    fn timeout_kills_the_child() {
        let started = Instant::now();
        let err = run(&["sleep", "5"], Some(Duration::from_millis(200)), &CancelToken::new())
            .expect_err("timeout");
        assert!(matches!(err, ProcessFailure::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn cancelled_token_interrupts_the_child() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run(&["sleep", "5"], None, &cancel).expect_err("cancelled");
        assert!(matches!(err, ProcessFailure::Interrupted { .. }));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = run(&[], None, &CancelToken::new()).expect_err("empty");
        assert!(matches!(err, ProcessFailure::Other { .. }));
    }

    #[test]
    fn output_beyond_limit_is_dropped() {
        let (kept, truncated) =
            read_stream_limited(&b"abcdef"[..], 4, None::<Vec<u8>>).expect("read");
        assert_eq!(kept, b"abcd");
        assert_eq!(truncated, 2);
    }
}
