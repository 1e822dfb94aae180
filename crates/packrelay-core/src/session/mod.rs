//! One run of the external transfer tool.
//!
//! [`run_tool`] spawns the tool, streams every non-empty output line to a
//! callback as it arrives and reduces the run to a [`SessionOutcome`]. The
//! automation loops call it directly from their own task; manual transfers go
//! through [`TransferSession`], which runs it on a separate task and can be
//! stopped from anywhere.
//!
//! Stopping is not the same as failing: a run that was stopped reports
//! [`SessionOutcome::Stopped`] even though the tool itself exits non-zero
//! when terminated, so callers never show a disconnect warning for an
//! intentional pause. A tool that still exits cleanly after the stop
//! request counts as [`SessionOutcome::Succeeded`].

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::events::{CoreEvent, EventSink};
use crate::tools::{TransferRequest, TransferTool};

/// How long a terminated tool gets to exit before it is killed outright.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// How long to keep reading buffered output after the tool has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// How a transfer tool run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The tool exited with code 0
    Succeeded,
    /// The tool exited non-zero, was killed by a signal, or could not be run
    Failed {
        /// Exit code, if the tool exited normally
        exit_code: Option<i32>,
    },
    /// The run was stopped on request
    Stopped,
    /// The tool binary does not exist
    ToolMissing {
        /// Name of the missing tool
        tool: String,
    },
}

impl SessionOutcome {
    /// Whether the transfer completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Whether the transfer dropped without anyone asking it to stop.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Reads `\n`- or `\r`-terminated segments from a pipe.
///
/// Progress bars redraw with carriage returns, so splitting on both keeps
/// progress flowing one event per redraw. The partial segment lives in the
/// reader, which makes `next_line` safe to race in `select!`.
struct LineReader<R> {
    inner: BufReader<R>,
    partial: Vec<u8>,
    done: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            partial: Vec::new(),
            done: false,
        }
    }

    async fn next_line(&mut self) -> Option<String> {
        while !self.done {
            let available = match self.inner.fill_buf().await {
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Error reading tool output: {e}");
                    self.done = true;
                    break;
                }
            };

            if available.is_empty() {
                self.done = true;
                break;
            }

            if let Some(pos) = available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                self.partial.extend_from_slice(&available[..pos]);
                self.inner.consume(pos + 1);
                return Some(self.take_partial());
            }

            let len = available.len();
            self.partial.extend_from_slice(available);
            self.inner.consume(len);
        }

        if self.partial.is_empty() {
            None
        } else {
            Some(self.take_partial())
        }
    }

    fn take_partial(&mut self) -> String {
        let bytes = std::mem::take(&mut self.partial);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn is_done(&self) -> bool {
        self.done && self.partial.is_empty()
    }
}

async fn next_from<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    match reader {
        Some(r) => r.next_line().await,
        None => None,
    }
}

fn reader_done<R: AsyncRead + Unpin>(reader: &Option<LineReader<R>>) -> bool {
    reader.as_ref().is_none_or(LineReader::is_done)
}

/// Ask the child to terminate: SIGTERM where available, a kill elsewhere.
fn send_terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => return,
            Err(e) => tracing::debug!("SIGTERM to {pid} failed: {e}"),
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("Kill of transfer tool failed (already exited?): {e}");
    }
}

/// Run the transfer tool once for `request`.
///
/// Every non-empty, trimmed output line (stdout and stderr) is passed to
/// `on_line` as soon as it is read. Cancelling `stop` terminates the tool and
/// makes the outcome [`SessionOutcome::Stopped`] unless the tool still exits
/// cleanly.
pub async fn run_tool<F>(
    tool: &dyn TransferTool,
    request: &TransferRequest,
    stop: &CancellationToken,
    mut on_line: F,
) -> SessionOutcome
where
    F: FnMut(&str),
{
    if stop.is_cancelled() {
        return SessionOutcome::Stopped;
    }

    let mut cmd = tool.command(request);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return SessionOutcome::ToolMissing {
                tool: tool.name().to_string(),
            };
        }
        Err(e) => {
            tracing::error!("Failed to start {}: {e}", tool.name());
            return SessionOutcome::Failed { exit_code: None };
        }
    };

    let mut stdout = child.stdout.take().map(LineReader::new);
    let mut stderr = child.stderr.take().map(LineReader::new);

    let mut emit = |line: String| {
        let line = line.trim();
        if !line.is_empty() {
            on_line(line);
        }
    };

    let mut kill_deadline: Option<Instant> = None;
    let mut killed = false;

    let status: std::io::Result<ExitStatus> = loop {
        tokio::select! {
            biased;

            Some(line) = next_from(&mut stdout), if !reader_done(&stdout) => emit(line),
            Some(line) = next_from(&mut stderr), if !reader_done(&stderr) => emit(line),
            status = child.wait() => break status,
            () = stop.cancelled(), if kill_deadline.is_none() => {
                send_terminate(&mut child);
                kill_deadline = Some(Instant::now() + TERMINATE_GRACE);
            }
            () = tokio::time::sleep_until(kill_deadline.unwrap_or_else(Instant::now)),
                if kill_deadline.is_some() && !killed =>
            {
                tracing::warn!("{} ignored termination, killing it", tool.name());
                let _ = child.start_kill();
                killed = true;
            }
        }
    };

    if kill_deadline.is_none() {
        let drain = async {
            loop {
                tokio::select! {
                    Some(line) = next_from(&mut stdout), if !reader_done(&stdout) => emit(line),
                    Some(line) = next_from(&mut stderr), if !reader_done(&stderr) => emit(line),
                    else => break,
                }
            }
        };
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
    }

    settle(status, stop.is_cancelled(), tool.name())
}

/// Reduce the tool's exit status to an outcome.
///
/// A clean exit wins over a stop request that raced it; any other exit
/// after a stop is [`SessionOutcome::Stopped`].
fn settle(status: std::io::Result<ExitStatus>, stopped: bool, tool: &str) -> SessionOutcome {
    match status {
        Ok(status) if status.success() => SessionOutcome::Succeeded,
        _ if stopped => SessionOutcome::Stopped,
        Ok(status) => SessionOutcome::Failed {
            exit_code: status.code(),
        },
        Err(e) => {
            tracing::error!("Failed to wait for {tool}: {e}");
            SessionOutcome::Failed { exit_code: None }
        }
    }
}

/// Cloneable handle that stops a running [`TransferSession`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Request the session to stop. Safe to call repeatedly and after exit.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A manual transfer running on its own task.
///
/// Every output line is forwarded to the event sink, followed by one
/// lifecycle line describing how the run ended.
#[derive(Debug)]
pub struct TransferSession {
    handle: StopHandle,
    task: JoinHandle<SessionOutcome>,
}

impl TransferSession {
    /// Start the tool for `request` on a new task.
    pub fn spawn(tool: Arc<dyn TransferTool>, request: TransferRequest, events: EventSink) -> Self {
        let token = CancellationToken::new();
        let stop = token.clone();

        let task = tokio::spawn(async move {
            tracing::info!(
                "Executing {} {} on code '{}'",
                tool.name(),
                request.role(),
                request.code()
            );

            let outcome = run_tool(tool.as_ref(), &request, &stop, |line| events.output(line)).await;
            report_outcome(&events, &outcome);
            outcome
        });

        Self {
            handle: StopHandle { token },
            task,
        }
    }

    /// Stop the transfer. The outcome will be [`SessionOutcome::Stopped`].
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// A handle that can stop this session from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.handle.clone()
    }

    /// Whether the tool has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> SessionOutcome {
        self.task.await.unwrap_or_else(|e| {
            tracing::error!("Transfer task failed: {e}");
            SessionOutcome::Failed { exit_code: None }
        })
    }
}

fn report_outcome(events: &EventSink, outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Stopped => events.info("Transfer paused manually."),
        SessionOutcome::Succeeded => events.info("Transfer completed successfully!"),
        SessionOutcome::Failed { exit_code } => events.warn(match exit_code {
            Some(code) => format!("Connection dropped. (Code {code})"),
            None => "Connection dropped.".to_string(),
        }),
        SessionOutcome::ToolMissing { tool } => {
            events.error(format!("Error: '{tool}' command not found."));
            events.emit(CoreEvent::ToolMissing { tool: tool.clone() });
        }
    }
}
