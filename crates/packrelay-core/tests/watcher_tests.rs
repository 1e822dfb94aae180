//! Tests for the folder watcher push loop.
//!
//! These tests drive scan/push cycles against script-based transfer tools.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use packrelay_core::events::{drain, CoreEvent, EventSink};
use packrelay_core::watcher::{FolderWatcher, PushOutcome};

use common::{
    at, attempts, code, create_temp_dir, create_test_file, log_messages, set_mtime, wait_for, CopyArchiver,
    ScriptTool, COUNT_ATTEMPT,
};

/// A send that fails twice and then succeeds delivers the file exactly once.
#[tokio::test]
async fn test_busy_retry_sends_once() {
    let dir = create_temp_dir();
    let outbox = dir.path().join("outbox");
    let note = create_test_file(&outbox, "note.txt", b"v1");
    let counter = dir.path().join("attempts");

    let script = format!("{COUNT_ATTEMPT}[ \"$n\" -gt 2 ]");
    let tool = ScriptTool::new(&script).env("COUNTER", &counter).shared();
    let archiver = CopyArchiver::shared();

    let mut watcher = FolderWatcher::new(vec![outbox.clone()], code("fast-9q2xk"), archiver.clone(), tool)
        .unwrap()
        .delete_originals(true)
        .with_retry_backoff(Duration::from_millis(50));

    let (events, mut rx) = EventSink::channel();
    let stop = CancellationToken::new();

    let outcomes = watcher.cycle(&events, &stop).await;
    assert_eq!(outcomes, vec![PushOutcome::Sent]);
    assert_eq!(attempts(&counter), 3);
    assert_eq!(archiver.compressions(), 1, "retries must reuse the archive");
    assert!(!note.exists(), "original is deleted after confirmed send");

    let events = drain(&mut rx);
    let pushed: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, CoreEvent::FilePushed { path } if *path == note))
        .collect();
    assert_eq!(pushed.len(), 1);
    assert_eq!(
        log_messages(&events)
            .iter()
            .filter(|m| m.contains("Retrying 'note.txt'"))
            .count(),
        2
    );

    assert!(watcher.cycle(&events_sink(), &stop).await.is_empty());
    assert_eq!(attempts(&counter), 3);
}

fn events_sink() -> EventSink {
    EventSink::channel().0
}

/// Sent files are only sent again after their mtime moves forward.
#[tokio::test]
async fn test_tracker_monotonicity() {
    let dir = create_temp_dir();
    let outbox = dir.path().join("outbox");
    let note = create_test_file(&outbox, "note.txt", b"v1");
    set_mtime(&note, 100);
    let counter = dir.path().join("attempts");

    let script = format!("{COUNT_ATTEMPT}exit 0");
    let tool = ScriptTool::new(&script).env("COUNTER", &counter).shared();

    let mut watcher =
        FolderWatcher::new(vec![outbox.clone()], code("fast-9q2xk"), CopyArchiver::shared(), tool).unwrap();
    let events = events_sink();
    let stop = CancellationToken::new();

    assert_eq!(watcher.cycle(&events, &stop).await, vec![PushOutcome::Sent]);
    assert_eq!(watcher.folders()[0].tracker().recorded(&note), Some(at(100)));

    for _ in 0..3 {
        assert!(watcher.cycle(&events, &stop).await.is_empty());
    }
    assert_eq!(attempts(&counter), 1);

    set_mtime(&note, 150);
    assert_eq!(watcher.cycle(&events, &stop).await, vec![PushOutcome::Sent]);
    assert_eq!(watcher.folders()[0].tracker().recorded(&note), Some(at(150)));
    assert_eq!(attempts(&counter), 2);
    assert!(note.exists(), "originals are kept unless deletion is enabled");
}

/// A file modified while its send is still retrying: the archived version is
/// what gets recorded, so the newer version goes out on the next cycle.
#[tokio::test]
async fn test_modified_during_retry_is_resent() {
    let dir = create_temp_dir();
    let outbox = dir.path().join("outbox");
    let sink = dir.path().join("sink");
    std::fs::create_dir_all(&sink).unwrap();
    let note = create_test_file(&outbox, "note.txt", b"v1");
    set_mtime(&note, 100);
    let counter = dir.path().join("attempts");

    // Attempt 1: the user edits the file while the receiver is busy.
    // Later attempts: deliver whatever archive is offered.
    let script = format!(
        "{COUNT_ATTEMPT}if [ \"$n\" -eq 1 ]; then printf v2 > \"$WATCHED\"; exit 1; fi; \
         cp \"$PACKRELAY_PATH\" \"$SINK/sent_$n\""
    );
    let tool = ScriptTool::new(&script)
        .env("COUNTER", &counter)
        .env("WATCHED", &note)
        .env("SINK", &sink)
        .shared();

    let mut watcher =
        FolderWatcher::new(vec![outbox.clone()], code("fast-9q2xk"), CopyArchiver::shared(), tool)
            .unwrap()
            .delete_originals(true)
            .with_retry_backoff(Duration::from_millis(20));
    let (events, mut rx) = EventSink::channel();
    let stop = CancellationToken::new();

    assert_eq!(watcher.cycle(&events, &stop).await, vec![PushOutcome::Sent]);
    assert_eq!(std::fs::read(sink.join("sent_2")).unwrap(), b"v1");
    assert_eq!(watcher.folders()[0].tracker().recorded(&note), Some(at(100)));
    assert!(note.exists(), "a changed original must not be deleted");
    assert!(log_messages(&drain(&mut rx))
        .iter()
        .any(|m| m.contains("Kept original note.txt")));

    assert_eq!(watcher.cycle(&events, &stop).await, vec![PushOutcome::Sent]);
    assert_eq!(std::fs::read(sink.join("sent_3")).unwrap(), b"v2");
    assert!(!note.exists());
}

/// Stopping interrupts an endless busy-retry without recording the file.
#[tokio::test]
async fn test_stop_during_retry() {
    let dir = create_temp_dir();
    let outbox = dir.path().join("outbox");
    let note = create_test_file(&outbox, "note.txt", b"v1");
    let counter = dir.path().join("attempts");

    let script = format!("{COUNT_ATTEMPT}exit 1");
    let tool = ScriptTool::new(&script).env("COUNTER", &counter).shared();

    let watcher = FolderWatcher::new(vec![outbox], code("fast-9q2xk"), CopyArchiver::shared(), tool)
        .unwrap()
        .delete_originals(true)
        .with_retry_backoff(Duration::from_secs(30));
    let temp_dir = watcher.temp_dir().to_path_buf();

    let (events, mut rx) = EventSink::channel();
    let handle = watcher.start(events);

    assert!(wait_for(Duration::from_secs(5), || attempts(&counter) >= 1).await);
    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("watcher must stop promptly");

    assert!(note.exists());
    assert!(!temp_dir.exists(), "watch temp dir is removed on stop");

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, CoreEvent::WatcherStopped)));
    assert!(!events.iter().any(|e| matches!(e, CoreEvent::FilePushed { .. })));
}

/// A missing transfer tool ends the watcher instead of retrying forever.
#[tokio::test]
async fn test_missing_tool_stops_watcher() {
    #[derive(Debug)]
    struct Missing;

    impl packrelay_core::tools::TransferTool for Missing {
        fn name(&self) -> &str {
            "croc"
        }

        fn command(&self, _request: &packrelay_core::tools::TransferRequest) -> tokio::process::Command {
            tokio::process::Command::new("/nonexistent/packrelay/croc")
        }
    }

    let dir = create_temp_dir();
    let outbox = dir.path().join("outbox");
    create_test_file(&outbox, "note.txt", b"v1");

    let watcher = FolderWatcher::new(vec![outbox], code("fast-9q2xk"), CopyArchiver::shared(), Arc::new(Missing))
        .unwrap()
        .with_interval(Duration::from_millis(50));

    let (events, mut rx) = EventSink::channel();
    let handle = watcher.start(events);
    assert!(wait_for(Duration::from_secs(5), || handle.is_finished()).await);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::ToolMissing { tool } if tool == "croc")));
    assert!(events.iter().any(|e| matches!(e, CoreEvent::WatcherStopped)));
}
