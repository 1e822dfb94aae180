//! Perpetual receive loops (automation receiver).
//!
//! A [`Listener`] pairs a display name with a code. Its [`ListenerSession`]
//! receives on that code into a dedicated subfolder over and over, unpacking
//! after every successful receipt. A failed receive is the normal "nobody is
//! sending yet" condition: the session waits briefly and tries again, and
//! only logs a heartbeat every so often.
//!
//! Listeners share nothing with each other; [`ListenerRegistry`] just keeps
//! track of which ones exist and which are running.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::code::TransferCode;
use crate::config::{Config, ListenerEntry};
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventSink};
use crate::extract::extract_pass_blocking;
use crate::session::{run_tool, SessionOutcome};
use crate::tools::{classify_line, Archiver, LineKind, TransferRequest, TransferTool};

/// Reduce a display name to a safe folder name.
///
/// Keeps ASCII letters, digits, spaces, `_` and `-`, and trims the result.
///
/// # Errors
///
/// Returns [`Error::InvalidListener`] if nothing usable is left.
pub fn sanitize_name(name: &str) -> Result<String> {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        return Err(Error::InvalidListener(format!(
            "'{name}' has no usable characters for a folder name"
        )));
    }
    Ok(cleaned.to_string())
}

/// A named receive endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Listener {
    name: String,
    code: TransferCode,
}

impl Listener {
    /// Create a listener; the name is sanitized.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidListener`] for a name that sanitizes to nothing.
    pub fn new(name: &str, code: TransferCode) -> Result<Self> {
        Ok(Self {
            name: sanitize_name(name)?,
            code,
        })
    }

    /// Sanitized name, also the destination subfolder.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Code received on.
    #[must_use]
    pub fn code(&self) -> &TransferCode {
        &self.code
    }

    /// Destination directory below `base`.
    #[must_use]
    pub fn destination(&self, base: &Path) -> PathBuf {
        base.join(&self.name)
    }
}

impl TryFrom<&ListenerEntry> for Listener {
    type Error = Error;

    fn try_from(entry: &ListenerEntry) -> Result<Self> {
        Self::new(&entry.name, entry.code.clone())
    }
}

impl From<&Listener> for ListenerEntry {
    fn from(listener: &Listener) -> Self {
        Self {
            name: listener.name.clone(),
            code: listener.code.clone(),
        }
    }
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}  ::  {}", self.name, self.code)
    }
}

/// Receive loop for one [`Listener`].
#[derive(Debug)]
pub struct ListenerSession {
    listener: Listener,
    dest: PathBuf,
    archiver: Arc<dyn Archiver>,
    tool: Arc<dyn TransferTool>,
    retry_delay: Duration,
    heartbeat_every: u32,
}

impl ListenerSession {
    /// Create the session and its destination directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be created.
    pub fn new(
        listener: Listener,
        base_dir: &Path,
        archiver: Arc<dyn Archiver>,
        tool: Arc<dyn TransferTool>,
    ) -> Result<Self> {
        let dest = listener.destination(base_dir);
        std::fs::create_dir_all(&dest)?;

        Ok(Self {
            listener,
            dest,
            archiver,
            tool,
            retry_delay: Duration::from_secs(crate::DEFAULT_LISTEN_RETRY_SECS),
            heartbeat_every: crate::DEFAULT_HEARTBEAT_EVERY,
        })
    }

    /// Pause between receive attempts that got nothing.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Log a heartbeat after this many empty attempts.
    #[must_use]
    pub fn with_heartbeat_every(mut self, every: u32) -> Self {
        self.heartbeat_every = every.max(1);
        self
    }

    /// Destination directory.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Run the loop on a new task.
    pub fn start(self, events: EventSink) -> ListenerHandle {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(self.run(events, token));
        ListenerHandle { stop, task }
    }

    /// Receive, unpack and repeat until `stop` is cancelled or the tool is missing.
    pub async fn run(self, events: EventSink, stop: CancellationToken) {
        let tag = self.tag();
        events.info(format!(
            "{tag} Listening for incoming files on code '{}'",
            self.listener.code
        ));

        let mut misses = 0u32;
        while !stop.is_cancelled() {
            match self.receive_once(&events, &stop).await {
                SessionOutcome::Succeeded => misses = 0,
                SessionOutcome::Stopped => break,
                SessionOutcome::ToolMissing { tool } => {
                    events.error(format!("{tag} '{tool}' command not found. Listener stopped."));
                    events.emit(CoreEvent::ToolMissing { tool });
                    break;
                }
                SessionOutcome::Failed { .. } => {
                    misses += 1;
                    if misses >= self.heartbeat_every {
                        events.info(format!(
                            "{tag} Still polling for sender data on '{}'...",
                            self.listener.code
                        ));
                        misses = 0;
                    }

                    tokio::select! {
                        () = stop.cancelled() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        events.info(format!("{tag} Stopped listening."));
    }

    /// One receive attempt, unpacking whatever arrived if it succeeded.
    pub async fn receive_once(&self, events: &EventSink, stop: &CancellationToken) -> SessionOutcome {
        let tag = self.tag();
        let request = TransferRequest::Receive {
            code: self.listener.code.clone(),
            out_dir: self.dest.clone(),
        };

        let outcome = run_tool(self.tool.as_ref(), &request, stop, |line| match classify_line(line) {
            LineKind::Progress => events.info(format!("{tag} {line}")),
            LineKind::Error => events.warn(format!("{tag} Transfer error: {line}")),
            LineKind::Other => tracing::debug!(target: "packrelay_core::tool_output", "{tag} {line}"),
        })
        .await;

        if outcome.is_success() {
            events.info(format!("{tag} File received! Unpacking..."));
            extract_pass_blocking(
                self.dest.clone(),
                Arc::clone(&self.archiver),
                events.clone(),
                false,
            )
            .await;
        }

        outcome
    }

    fn tag(&self) -> String {
        format!("[Listener: {}]", self.listener.name)
    }
}

/// Handle to a running [`ListenerSession`].
#[derive(Debug)]
pub struct ListenerHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the listener to stop; an in-flight receive is terminated.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!("Listener task failed: {e}");
        }
    }
}

/// The set of defined listeners and the ones currently running.
#[derive(Debug)]
pub struct ListenerRegistry {
    base_dir: PathBuf,
    archiver: Arc<dyn Archiver>,
    tool: Arc<dyn TransferTool>,
    retry_delay: Duration,
    heartbeat_every: u32,
    listeners: Vec<Listener>,
    running: HashMap<Listener, ListenerHandle>,
}

impl ListenerRegistry {
    /// Create an empty registry placing listener folders below `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, archiver: Arc<dyn Archiver>, tool: Arc<dyn TransferTool>) -> Self {
        Self {
            base_dir: base_dir.into(),
            archiver,
            tool,
            retry_delay: Duration::from_secs(crate::DEFAULT_LISTEN_RETRY_SECS),
            heartbeat_every: crate::DEFAULT_HEARTBEAT_EVERY,
            listeners: Vec::new(),
            running: HashMap::new(),
        }
    }

    /// Create a registry holding the configured listeners.
    ///
    /// Entries whose names sanitize to nothing are logged and skipped.
    #[must_use]
    pub fn from_config(config: &Config, archiver: Arc<dyn Archiver>, tool: Arc<dyn TransferTool>) -> Self {
        let mut registry = Self::new(config.download_dir(), archiver, tool)
            .with_retry_delay(config.listeners.retry_delay)
            .with_heartbeat_every(config.listeners.heartbeat_every);

        for entry in &config.listeners.entries {
            match Listener::try_from(entry) {
                Ok(listener) => {
                    registry.insert(listener);
                }
                Err(e) => tracing::warn!("Skipping configured listener: {e}"),
            }
        }
        registry
    }

    /// Pause between empty receive attempts for listeners started from now on.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Heartbeat frequency for listeners started from now on.
    #[must_use]
    pub fn with_heartbeat_every(mut self, every: u32) -> Self {
        self.heartbeat_every = every;
        self
    }

    /// Define a listener. Returns `Ok(false)` if the same name and code already exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidListener`] for an unusable name.
    pub fn add(&mut self, name: &str, code: TransferCode) -> Result<bool> {
        Ok(self.insert(Listener::new(name, code)?))
    }

    fn insert(&mut self, listener: Listener) -> bool {
        if self.listeners.contains(&listener) {
            tracing::debug!("Listener {listener} already defined");
            return false;
        }
        self.listeners.push(listener);
        true
    }

    /// Remove every listener named `name`, stopping any that are running.
    ///
    /// Returns the number removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let Ok(name) = sanitize_name(name) else {
            return 0;
        };

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(|l| l.name == name);
        self.listeners = kept;

        for listener in &removed {
            if let Some(handle) = self.running.remove(listener) {
                handle.stop();
            }
        }
        removed.len()
    }

    /// Start every defined listener that is not already running.
    ///
    /// Returns the number started.
    ///
    /// # Errors
    ///
    /// Returns an error if a destination directory cannot be created;
    /// listeners started before the failure keep running.
    pub fn start_all(&mut self, events: &EventSink) -> Result<usize> {
        self.running.retain(|_, handle| !handle.is_finished());

        let mut started = 0;
        for listener in &self.listeners {
            if self.running.contains_key(listener) {
                continue;
            }

            let session = ListenerSession::new(
                listener.clone(),
                &self.base_dir,
                Arc::clone(&self.archiver),
                Arc::clone(&self.tool),
            )?
            .with_retry_delay(self.retry_delay)
            .with_heartbeat_every(self.heartbeat_every);

            self.running
                .insert(listener.clone(), session.start(events.clone()));
            started += 1;
        }

        if started > 0 {
            events.info(format!("Started {started} listener(s)."));
        }
        Ok(started)
    }

    /// Stop every running listener and wait for them to exit.
    pub async fn stop_all(&mut self) {
        let handles: Vec<_> = self.running.drain().map(|(_, handle)| handle).collect();
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            handle.shutdown().await;
        }
    }

    /// Defined listeners, in insertion order.
    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Whether `listener` is currently running.
    #[must_use]
    pub fn is_running(&self, listener: &Listener) -> bool {
        self.running
            .get(listener)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of running listeners.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.values().filter(|h| !h.is_finished()).count()
    }

    /// Directory listener folders are created in.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
