//! Owner of the manual transfer and the automation loops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{TransferAction, TransferState};
use crate::code::TransferCode;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{CoreEvent, EventSink};
use crate::extract::{ExtractorHandle, LiveExtractor};
use crate::listener::{Listener, ListenerRegistry};
use crate::session::{SessionOutcome, StopHandle, TransferSession};
use crate::stage::{ArchiveStager, StagingUnit};
use crate::tools::{Archiver, TransferRequest, TransferTool};
use crate::watcher::{FolderWatcher, WatcherHandle};

/// Result of a background task, tagged with the generation that started it.
#[derive(Debug)]
enum Completion {
    Staged {
        generation: u64,
        result: Result<StagingUnit>,
    },
    Transfer {
        generation: u64,
        outcome: SessionOutcome,
    },
}

/// Drives the manual transfer state machine and owns every background loop.
///
/// UI requests are plain method calls. Background work reports back through
/// an internal channel that the owner drains with
/// [`next_completion`](Self::next_completion). Every request that replaces
/// or stops the running session bumps a generation counter, so a late
/// completion from a superseded session is recognized and dropped.
///
/// Methods that start work spawn tasks and must be called inside a tokio
/// runtime.
#[derive(Debug)]
pub struct TransferController {
    state: TransferState,
    events: EventSink,
    archiver: Arc<dyn Archiver>,
    tool: Arc<dyn TransferTool>,
    extract_interval: Duration,
    retry_backoff: Duration,

    generation: u64,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,

    session: Option<StopHandle>,
    send_code: Option<TransferCode>,
    staging: Option<StagingUnit>,
    receive: Option<(TransferCode, PathBuf)>,
    extractor: Option<ExtractorHandle>,
    retired_extractors: Vec<ExtractorHandle>,

    watcher: Option<WatcherHandle>,
    listeners: ListenerRegistry,
}

impl TransferController {
    /// Create a controller. Listener folders are created below `listener_base`.
    #[must_use]
    pub fn new(
        archiver: Arc<dyn Archiver>,
        tool: Arc<dyn TransferTool>,
        listener_base: impl Into<PathBuf>,
        events: EventSink,
    ) -> Self {
        let listeners = ListenerRegistry::new(listener_base, Arc::clone(&archiver), Arc::clone(&tool));
        Self::with_registry(archiver, tool, listeners, events)
    }

    fn with_registry(
        archiver: Arc<dyn Archiver>,
        tool: Arc<dyn TransferTool>,
        listeners: ListenerRegistry,
        events: EventSink,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Self {
            state: TransferState::Idle,
            events,
            archiver,
            tool,
            extract_interval: Duration::from_millis(crate::DEFAULT_EXTRACT_POLL_MS),
            retry_backoff: Duration::from_secs(crate::DEFAULT_RETRY_BACKOFF_SECS),
            generation: 0,
            completions_tx,
            completions_rx,
            session: None,
            send_code: None,
            staging: None,
            receive: None,
            extractor: None,
            retired_extractors: Vec::new(),
            watcher: None,
            listeners,
        }
    }

    /// Build a controller from configuration, with croc and 7-Zip.
    ///
    /// Returns the controller and the receiver for its events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolMissing`] if no 7-Zip can be found, or
    /// [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn from_config(config: &Config) -> Result<(Self, mpsc::UnboundedReceiver<CoreEvent>)> {
        config.validate()?;

        let archiver: Arc<dyn Archiver> = Arc::new(config.tools.archiver()?);
        let tool: Arc<dyn TransferTool> = Arc::new(config.tools.transfer_tool());
        let listeners = ListenerRegistry::from_config(config, Arc::clone(&archiver), Arc::clone(&tool));
        let (events, rx) = EventSink::channel();

        let controller = Self::with_registry(archiver, tool, listeners, events)
            .with_extract_interval(config.extractor.poll_interval)
            .with_retry_backoff(config.watcher.retry_backoff);
        Ok((controller, rx))
    }

    /// Interval of the live extractor used while receiving.
    #[must_use]
    pub fn with_extract_interval(mut self, interval: Duration) -> Self {
        self.extract_interval = interval;
        self
    }

    /// Backoff the folder watcher uses between busy retries.
    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Current manual transfer state.
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// A sink for emitting events alongside the controller's own.
    #[must_use]
    pub fn events(&self) -> EventSink {
        self.events.clone()
    }

    /// Payload of the current staging unit, if any.
    #[must_use]
    pub fn staged_payload(&self) -> Option<&Path> {
        self.staging.as_ref().map(StagingUnit::payload)
    }

    fn transition(&mut self, action: TransferAction) -> Result<TransferState> {
        let next = self.state.apply(action)?;
        if next != self.state {
            tracing::debug!("{} --{action}--> {next}", self.state);
            self.state = next;
            self.events.emit(CoreEvent::StateChanged {
                state: next.to_string(),
            });
        }
        Ok(next)
    }

    /// Invalidate every outstanding completion and stop the running session.
    fn supersede(&mut self) {
        self.generation += 1;
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn discard_staging(&mut self) {
        if let Some(unit) = self.staging.take() {
            unit.cleanup();
        }
    }

    /// Stop the live extractor. Its final pass keeps running until
    /// [`shutdown`](Self::shutdown) waits for it.
    fn stop_extractor(&mut self) {
        if let Some(extractor) = self.extractor.take() {
            extractor.stop();
            self.retired_extractors.retain(|h| !h.is_finished());
            self.retired_extractors.push(extractor);
        }
    }

    fn spawn_session(&mut self, request: TransferRequest) {
        let session = TransferSession::spawn(Arc::clone(&self.tool), request, self.events.clone());
        self.session = Some(session.stop_handle());

        let generation = self.generation;
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = session.wait().await;
            let _ = tx.send(Completion::Transfer { generation, outcome });
        });
    }

    fn spawn_receive(&mut self, code: TransferCode, out_dir: PathBuf) {
        self.spawn_session(TransferRequest::Receive {
            code,
            out_dir: out_dir.clone(),
        });

        let extractor = LiveExtractor::new(out_dir, Arc::clone(&self.archiver))
            .with_interval(self.extract_interval)
            .start(self.events.clone());
        self.extractor = Some(extractor);
    }

    // --- manual send ---

    /// Stage `path` and send it on `code`.
    ///
    /// Any leftover staging from an earlier send is discarded first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle.
    pub fn start_send(&mut self, path: PathBuf, code: TransferCode) -> Result<()> {
        self.transition(TransferAction::StartSend)?;
        self.supersede();
        self.discard_staging();
        self.send_code = Some(code);

        let generation = self.generation;
        let tx = self.completions_tx.clone();
        let stager = ArchiveStager::new(Arc::clone(&self.archiver));
        let events = self.events.clone();

        tokio::spawn(async move {
            let result = stager.stage_async(path, events).await;
            let _ = tx.send(Completion::Staged { generation, result });
        });
        Ok(())
    }

    /// Pause a running send, or resume a paused one.
    ///
    /// Resuming offers the same staged payload on the same code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless sending or paused.
    pub fn pause_or_resume_send(&mut self) -> Result<TransferState> {
        if self.state == TransferState::PausedSend {
            let (Some(code), Some(payload)) = (self.send_code.clone(), self.staged_payload()) else {
                return Err(Error::Internal("paused send without staged payload".to_string()));
            };
            let request = TransferRequest::Send {
                code,
                path: payload.to_path_buf(),
            };

            let next = self.transition(TransferAction::ResumeSend)?;
            self.supersede();
            self.events.info("Resuming send...");
            self.spawn_session(request);
            Ok(next)
        } else {
            let next = self.transition(TransferAction::PauseSend)?;
            self.supersede();
            Ok(next)
        }
    }

    /// Abandon the send and delete its staging.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if no send is in progress.
    pub fn cancel_send(&mut self) -> Result<()> {
        self.transition(TransferAction::CancelSend)?;
        self.supersede();
        self.discard_staging();
        self.send_code = None;
        self.events.info("Send cancelled.");
        Ok(())
    }

    // --- manual receive ---

    /// Receive on `code` into `out_dir`, extracting arrivals as they complete.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless idle, or an I/O error if
    /// `out_dir` cannot be created.
    pub fn start_receive(&mut self, code: TransferCode, out_dir: PathBuf) -> Result<()> {
        self.state.apply(TransferAction::StartReceive)?;
        std::fs::create_dir_all(&out_dir)?;
        self.transition(TransferAction::StartReceive)?;

        self.supersede();
        self.receive = Some((code.clone(), out_dir.clone()));
        self.spawn_receive(code, out_dir);
        Ok(())
    }

    /// Pause a running receive, or resume a paused one with a fresh invocation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] unless receiving or paused.
    pub fn pause_or_resume_receive(&mut self) -> Result<TransferState> {
        if self.state == TransferState::PausedRecv {
            let Some((code, out_dir)) = self.receive.clone() else {
                return Err(Error::Internal("paused receive without target".to_string()));
            };

            let next = self.transition(TransferAction::ResumeReceive)?;
            self.supersede();
            self.events.info("Resuming receive...");
            self.spawn_receive(code, out_dir);
            Ok(next)
        } else {
            let next = self.transition(TransferAction::PauseReceive)?;
            self.supersede();
            self.stop_extractor();
            Ok(next)
        }
    }

    /// Abandon the receive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if no receive is in progress.
    pub fn cancel_receive(&mut self) -> Result<()> {
        self.transition(TransferAction::CancelReceive)?;
        self.supersede();
        self.stop_extractor();
        self.receive = None;
        self.events.info("Receive cancelled.");
        Ok(())
    }

    // --- completions ---

    /// Wait for the next background completion and apply it.
    ///
    /// Completions from superseded sessions are dropped silently. Returns the
    /// state after the completion. Cancel safe.
    pub async fn next_completion(&mut self) -> Option<TransferState> {
        loop {
            let completion = self.completions_rx.recv().await?;
            if let Some(state) = self.handle_completion(completion) {
                return Some(state);
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) -> Option<TransferState> {
        match completion {
            Completion::Staged { generation, result } => {
                if generation != self.generation {
                    if let Ok(unit) = result {
                        unit.cleanup();
                    }
                    return None;
                }
                self.on_staged(result);
            }
            Completion::Transfer {
                generation,
                outcome,
            } => {
                if generation != self.generation {
                    tracing::debug!("Ignoring completion of superseded session: {outcome:?}");
                    return None;
                }
                self.session = None;
                self.on_transfer_finished(outcome);
            }
        }
        Some(self.state)
    }

    fn on_staged(&mut self, result: Result<StagingUnit>) {
        match result {
            Ok(unit) => {
                let Some(code) = self.send_code.clone() else {
                    unit.cleanup();
                    return;
                };
                let request = TransferRequest::Send {
                    code,
                    path: unit.payload().to_path_buf(),
                };
                self.staging = Some(unit);
                if self.transition(TransferAction::StageSucceeded).is_ok() {
                    self.spawn_session(request);
                }
            }
            Err(Error::ToolMissing { tool }) => {
                self.events.error(format!("Error: '{tool}' not found. Cannot archive."));
                self.events.emit(CoreEvent::ToolMissing { tool });
                if let Err(e) = self.transition(TransferAction::ToolMissing) {
                    tracing::debug!("Staging result arrived out of turn: {e}");
                }
                self.events.emit(CoreEvent::SendFinished { success: false });
            }
            Err(e) => {
                self.events.error(format!("Staging failed: {e}"));
                if let Err(e) = self.transition(TransferAction::StageFailed) {
                    tracing::debug!("Staging result arrived out of turn: {e}");
                }
                self.events.emit(CoreEvent::SendFinished { success: false });
            }
        }
    }

    fn on_transfer_finished(&mut self, outcome: SessionOutcome) {
        let sending = self.state.is_send();
        if !sending {
            self.stop_extractor();
        }

        let action = match &outcome {
            SessionOutcome::Succeeded => TransferAction::TransferSucceeded,
            SessionOutcome::ToolMissing { .. } => TransferAction::ToolMissing,
            SessionOutcome::Failed { .. } => TransferAction::TransferFailed,
            SessionOutcome::Stopped if sending => TransferAction::PauseSend,
            SessionOutcome::Stopped => TransferAction::PauseReceive,
        };

        if let Err(e) = self.transition(action) {
            tracing::warn!("Unexpected completion: {e}");
            return;
        }

        match action {
            TransferAction::TransferSucceeded | TransferAction::ToolMissing => {
                if sending {
                    self.discard_staging();
                    self.send_code = None;
                } else {
                    self.receive = None;
                }
            }
            TransferAction::TransferFailed if sending => {
                self.events.info("Send paused. Resume to retry on the same code.");
            }
            TransferAction::TransferFailed => {
                self.events.info("Receive paused. Resume to retry.");
            }
            _ => {}
        }

        let success = outcome.is_success();
        self.events.emit(if sending {
            CoreEvent::SendFinished { success }
        } else {
            CoreEvent::ReceiveFinished { success }
        });
    }

    // --- automation ---

    /// Start the folder watcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if a watcher is already running,
    /// or an error if the watcher's temporary directory cannot be created.
    pub fn start_watcher(
        &mut self,
        folders: Vec<PathBuf>,
        code: TransferCode,
        delete_originals: bool,
        interval: Duration,
    ) -> Result<()> {
        if self.watcher_running() {
            return Err(Error::InvalidTransition {
                state: "watching".to_string(),
                action: "start watcher".to_string(),
            });
        }

        let watcher = FolderWatcher::new(folders, code, Arc::clone(&self.archiver), Arc::clone(&self.tool))?
            .delete_originals(delete_originals)
            .with_interval(interval)
            .with_retry_backoff(self.retry_backoff);

        self.watcher = Some(watcher.start(self.events.clone()));
        Ok(())
    }

    /// Stop the folder watcher and wait for it to exit.
    ///
    /// Returns `false` if no watcher was running.
    pub async fn stop_watcher(&mut self) -> bool {
        match self.watcher.take() {
            Some(handle) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Whether the folder watcher loop is running.
    #[must_use]
    pub fn watcher_running(&self) -> bool {
        self.watcher.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Define a listener. Returns `Ok(false)` for a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidListener`] for an unusable name.
    pub fn add_listener(&mut self, name: &str, code: TransferCode) -> Result<bool> {
        self.listeners.add(name, code)
    }

    /// Remove (and stop) every listener named `name`. Returns how many were removed.
    pub fn remove_listener(&mut self, name: &str) -> usize {
        self.listeners.remove(name)
    }

    /// Start every defined listener that is not running yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener folder cannot be created.
    pub fn start_all_listeners(&mut self) -> Result<usize> {
        self.listeners.start_all(&self.events)
    }

    /// Stop every running listener.
    pub async fn stop_all_listeners(&mut self) {
        self.listeners.stop_all().await;
    }

    /// Defined listeners.
    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        self.listeners.listeners()
    }

    /// Number of running listeners.
    #[must_use]
    pub fn running_listeners(&self) -> usize {
        self.listeners.running_count()
    }

    /// Stop everything: the manual transfer, the watcher and all listeners.
    pub async fn shutdown(&mut self) {
        self.supersede();
        self.discard_staging();
        self.stop_extractor();
        for extractor in self.retired_extractors.drain(..) {
            extractor.shutdown().await;
        }
        self.stop_watcher().await;
        self.stop_all_listeners().await;
    }
}
