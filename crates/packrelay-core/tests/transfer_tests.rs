//! End-to-end tests of the manual transfer controller.
//!
//! Each test drives the controller the way a front-end would and checks
//! states, events and what ended up on disk.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use packrelay_core::events::{drain, CoreEvent, EventSink, LogLevel};
use packrelay_core::state::{TransferController, TransferState};

use common::{
    attempts, code, create_temp_dir, create_test_file, extracted_names, wait_for, CopyArchiver, ScriptTool,
    COUNT_ATTEMPT,
};

const STEP: Duration = Duration::from_secs(10);

async fn next_state(controller: &mut TransferController) -> TransferState {
    tokio::time::timeout(STEP, controller.next_completion())
        .await
        .expect("completion within timeout")
        .expect("completion channel open")
}

#[tokio::test]
async fn test_send_directory_then_idle() {
    let dir = create_temp_dir();
    let docs = dir.path().join("docs");
    create_test_file(&docs, "a.txt", b"a");
    create_test_file(&docs, "b.txt", b"b");
    let listing = dir.path().join("listing");

    let tool = ScriptTool::new("ls \"$PACKRELAY_PATH\" > \"$LISTING\"; echo \"Code is: $PACKRELAY_CODE\"")
        .env("LISTING", &listing);

    let (events, mut rx) = EventSink::channel();
    let mut controller = TransferController::new(CopyArchiver::shared(), tool.shared(), dir.path(), events);

    controller.start_send(docs, code("fast-9q2xk")).unwrap();
    assert_eq!(controller.state(), TransferState::Staging);

    assert_eq!(next_state(&mut controller).await, TransferState::Sending);
    let payload = controller.staged_payload().unwrap().to_path_buf();
    let temp_root = payload.parent().unwrap().to_path_buf();
    assert!(payload.ends_with("docs"));

    assert_eq!(next_state(&mut controller).await, TransferState::Idle);
    assert!(!temp_root.exists(), "staging is deleted after success");
    assert_eq!(std::fs::read_to_string(&listing).unwrap(), "a.txt.7z\nb.txt.7z\n");

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, CoreEvent::SendStaged { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, CoreEvent::SendFinished { success: true })));
    assert!(events.iter().any(
        |e| matches!(e, CoreEvent::Log { message, .. } if message == "Code is: fast-9q2xk")
    ));
}

#[tokio::test]
async fn test_resume_reuses_staged_archive() {
    let dir = create_temp_dir();
    let file = create_test_file(dir.path(), "report.pdf", b"%PDF");
    let counter = dir.path().join("attempts");
    let sent = dir.path().join("sent");

    let script = format!("{COUNT_ATTEMPT}[ \"$n\" -ge 2 ] || exit 1; echo \"$PACKRELAY_PATH\" >> \"$SENT\"");
    let tool = ScriptTool::new(&script)
        .env("COUNTER", &counter)
        .env("SENT", &sent);
    let archiver = CopyArchiver::shared();

    let (events, mut rx) = EventSink::channel();
    let mut controller = TransferController::new(archiver.clone(), tool.shared(), dir.path(), events);

    controller.start_send(file, code("fast-9q2xk")).unwrap();
    assert_eq!(next_state(&mut controller).await, TransferState::Sending);
    let payload = controller.staged_payload().unwrap().to_path_buf();

    assert_eq!(next_state(&mut controller).await, TransferState::PausedSend);
    assert_eq!(controller.staged_payload(), Some(payload.as_path()));
    let first = drain(&mut rx);
    assert!(first
        .iter()
        .any(|e| matches!(e, CoreEvent::SendFinished { success: false })));
    assert!(first.iter().any(|e| matches!(
        e,
        CoreEvent::Log { level: LogLevel::Warn, message, .. } if message.starts_with("Connection dropped")
    )));

    assert_eq!(controller.pause_or_resume_send().unwrap(), TransferState::Sending);
    assert_eq!(next_state(&mut controller).await, TransferState::Idle);

    assert_eq!(archiver.compressions(), 1, "resume must not re-archive");
    assert_eq!(attempts(&counter), 2);
    assert_eq!(
        std::fs::read_to_string(&sent).unwrap().trim(),
        payload.to_string_lossy()
    );
    assert!(!payload.exists());
}

#[tokio::test]
async fn test_manual_pause_is_not_a_disconnect() {
    let dir = create_temp_dir();
    let file = create_test_file(dir.path(), "movie.mkv", b"frames");
    let counter = dir.path().join("attempts");

    let tool = ScriptTool::new(&format!("{COUNT_ATTEMPT}sleep 30")).env("COUNTER", &counter);
    let (events, mut rx) = EventSink::channel();
    let mut controller = TransferController::new(CopyArchiver::shared(), tool.shared(), dir.path(), events);

    controller.start_send(file, code("blue-x7x7x7")).unwrap();
    assert_eq!(next_state(&mut controller).await, TransferState::Sending);
    assert!(wait_for(STEP, || attempts(&counter) >= 1).await);

    assert_eq!(controller.pause_or_resume_send().unwrap(), TransferState::PausedSend);

    // The stopped session's completion is superseded and never surfaces.
    assert!(
        tokio::time::timeout(Duration::from_secs(1), controller.next_completion())
            .await
            .is_err()
    );

    let payload = controller.staged_payload().unwrap().to_path_buf();
    let mut seen = Vec::new();
    assert!(wait_for(STEP, || {
        seen.extend(drain(&mut rx));
        seen.iter().any(|e| {
            matches!(e, CoreEvent::Log { message, .. } if message == "Transfer paused manually.")
        })
    })
    .await);

    controller.cancel_send().unwrap();
    assert_eq!(controller.state(), TransferState::Idle);
    assert!(!payload.exists(), "cancel deletes staging");

    seen.extend(drain(&mut rx));
    assert!(!seen.iter().any(|e| matches!(
        e,
        CoreEvent::Log { level: LogLevel::Warn, .. } | CoreEvent::SendFinished { .. }
    )));
}

#[tokio::test]
async fn test_receive_with_live_extraction() {
    let dir = create_temp_dir();
    let out = dir.path().join("downloads");
    let source = create_test_file(dir.path(), "photo-source", b"pixels");
    let counter = dir.path().join("attempts");

    // First attempt drops mid-transfer, the resumed one completes.
    let script = format!(
        "{COUNT_ATTEMPT}[ \"$n\" -ge 2 ] || exit 1; cp \"$SOURCE\" \"$PACKRELAY_OUT/photo.jpg.7z\""
    );
    let tool = ScriptTool::new(&script)
        .env("COUNTER", &counter)
        .env("SOURCE", &source);

    let (events, mut rx) = EventSink::channel();
    let mut controller = TransferController::new(CopyArchiver::shared(), tool.shared(), dir.path(), events)
        .with_extract_interval(Duration::from_millis(50));

    controller.start_receive(code("red-77zz1"), out.clone()).unwrap();
    assert!(out.is_dir());
    assert_eq!(next_state(&mut controller).await, TransferState::PausedRecv);

    assert_eq!(controller.pause_or_resume_receive().unwrap(), TransferState::Receiving);
    assert_eq!(next_state(&mut controller).await, TransferState::Idle);

    let photo = out.join("photo.jpg");
    assert!(wait_for(STEP, || photo.exists() && !out.join("photo.jpg.7z").exists()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(std::fs::read(&photo).unwrap(), b"pixels");

    let events = drain(&mut rx);
    assert_eq!(extracted_names(&events), vec!["photo.jpg"]);
    let finished: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            CoreEvent::ReceiveFinished { success } => Some(*success),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![false, true]);
}

#[tokio::test]
async fn test_watcher_and_listeners_through_controller() {
    let dir = create_temp_dir();
    let outbox = dir.path().join("outbox");
    create_test_file(&outbox, "note.txt", b"hello");

    let tool = ScriptTool::new("sleep 30");
    let (events, mut rx) = EventSink::channel();
    let mut controller = TransferController::new(
        CopyArchiver::shared(),
        Arc::new(tool),
        dir.path().join("incoming"),
        events,
    );

    controller
        .start_watcher(vec![outbox], code("send-abcd12"), false, Duration::from_secs(1))
        .unwrap();
    assert!(controller.watcher_running());
    assert!(controller
        .start_watcher(Vec::new(), code("send-abcd12"), false, Duration::from_secs(1))
        .is_err());

    assert!(controller.add_listener("Photos", code("red-77zz1")).unwrap());
    assert!(!controller.add_listener("Photos", code("red-77zz1")).unwrap());
    assert_eq!(controller.start_all_listeners().unwrap(), 1);
    assert_eq!(controller.running_listeners(), 1);

    tokio::time::timeout(STEP, async {
        assert!(controller.stop_watcher().await);
        controller.stop_all_listeners().await;
    })
    .await
    .expect("automation must stop promptly");

    assert!(!controller.watcher_running());
    assert_eq!(controller.running_listeners(), 0);
    assert_eq!(controller.remove_listener("Photos"), 1);

    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, CoreEvent::WatcherStopped)));
}
