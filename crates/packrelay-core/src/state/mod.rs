//! Manual transfer state machine.
//!
//! Exactly one manual transfer, send or receive, exists at a time. Its
//! lifecycle is the pure transition table in [`TransferState::apply`];
//! [`TransferController`] owns the processes behind it and drives the table
//! from UI requests and from completions reported by background tasks.
//!
//! ```text
//! IDLE ─start send─▶ STAGING ─staged─▶ SENDING ─success─▶ IDLE
//!                       │                 │ ▲
//!                    failed           fail/pause resume
//!                       ▼                 ▼ │
//!                     IDLE            PAUSED_SEND ─cancel─▶ IDLE
//!
//! IDLE ─start receive─▶ RECEIVING ─success─▶ IDLE
//!                          │ ▲
//!                  fail/pause resume
//!                          ▼ │
//!                      PAUSED_RECV ─cancel─▶ IDLE
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod controller;

pub use controller::TransferController;

/// State of the manual transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Archiving the send source
    Staging,
    /// Transfer tool is offering the staged payload
    Sending,
    /// Send interrupted; staged payload kept for resume
    PausedSend,
    /// Transfer tool is receiving
    Receiving,
    /// Receive interrupted
    PausedRecv,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAction {
    /// UI: start a send
    StartSend,
    /// Staging produced a payload
    StageSucceeded,
    /// Staging failed
    StageFailed,
    /// UI: pause the running send
    PauseSend,
    /// UI: resume a paused send
    ResumeSend,
    /// UI: abandon the send
    CancelSend,
    /// UI: start a receive
    StartReceive,
    /// UI: pause the running receive
    PauseReceive,
    /// UI: resume a paused receive
    ResumeReceive,
    /// UI: abandon the receive
    CancelReceive,
    /// The transfer tool exited 0
    TransferSucceeded,
    /// The transfer tool exited non-zero
    TransferFailed,
    /// An external tool is not installed
    ToolMissing,
}

impl TransferState {
    /// Next state after `action`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if `action` is not accepted in
    /// this state.
    pub fn apply(self, action: TransferAction) -> Result<Self> {
        use TransferAction as A;
        use TransferState as S;

        let next = match (self, action) {
            (S::Idle, A::StartSend) => S::Staging,
            (S::Staging, A::StageSucceeded) => S::Sending,
            (S::Sending, A::TransferFailed | A::PauseSend) => S::PausedSend,
            (S::PausedSend, A::ResumeSend) => S::Sending,

            (S::Idle, A::StartReceive) => S::Receiving,
            (S::Receiving, A::TransferFailed | A::PauseReceive) => S::PausedRecv,
            (S::PausedRecv, A::ResumeReceive) => S::Receiving,

            (S::Staging, A::StageFailed | A::CancelSend | A::ToolMissing)
            | (S::Sending, A::TransferSucceeded | A::CancelSend | A::ToolMissing)
            | (S::PausedSend, A::CancelSend)
            | (S::Receiving, A::TransferSucceeded | A::CancelReceive | A::ToolMissing)
            | (S::PausedRecv, A::CancelReceive) => S::Idle,

            (state, action) => {
                return Err(Error::InvalidTransition {
                    state: state.to_string(),
                    action: action.to_string(),
                })
            }
        };

        Ok(next)
    }

    /// Whether a send is in any phase.
    #[must_use]
    pub const fn is_send(self) -> bool {
        matches!(self, Self::Staging | Self::Sending | Self::PausedSend)
    }

    /// Whether a receive is in any phase.
    #[must_use]
    pub const fn is_receive(self) -> bool {
        matches!(self, Self::Receiving | Self::PausedRecv)
    }

    /// Whether the state is one of the paused states.
    #[must_use]
    pub const fn is_paused(self) -> bool {
        matches!(self, Self::PausedSend | Self::PausedRecv)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Staging => "STAGING",
            Self::Sending => "SENDING",
            Self::PausedSend => "PAUSED_SEND",
            Self::Receiving => "RECEIVING",
            Self::PausedRecv => "PAUSED_RECV",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartSend => "start send",
            Self::StageSucceeded => "finish staging",
            Self::StageFailed => "fail staging",
            Self::PauseSend => "pause send",
            Self::ResumeSend => "resume send",
            Self::CancelSend => "cancel send",
            Self::StartReceive => "start receive",
            Self::PauseReceive => "pause receive",
            Self::ResumeReceive => "resume receive",
            Self::CancelReceive => "cancel receive",
            Self::TransferSucceeded => "complete transfer",
            Self::TransferFailed => "fail transfer",
            Self::ToolMissing => "handle missing tool",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::TransferAction as A;
    use super::TransferState as S;
    use super::*;

    fn run(actions: &[A]) -> Result<S> {
        actions.iter().try_fold(S::Idle, |state, action| state.apply(*action))
    }

    #[test]
    fn test_send_happy_path() {
        assert_eq!(
            run(&[A::StartSend, A::StageSucceeded, A::TransferSucceeded]).unwrap(),
            S::Idle
        );
    }

    #[test]
    fn test_send_disconnect_and_resume() {
        let state = run(&[A::StartSend, A::StageSucceeded, A::TransferFailed]).unwrap();
        assert_eq!(state, S::PausedSend);
        assert_eq!(state.apply(A::ResumeSend).unwrap(), S::Sending);
        assert_eq!(state.apply(A::CancelSend).unwrap(), S::Idle);
    }

    #[test]
    fn test_receive_path() {
        assert_eq!(run(&[A::StartReceive, A::TransferSucceeded]).unwrap(), S::Idle);
        assert_eq!(
            run(&[A::StartReceive, A::PauseReceive, A::ResumeReceive]).unwrap(),
            S::Receiving
        );
        assert_eq!(run(&[A::StartReceive, A::TransferFailed, A::CancelReceive]).unwrap(), S::Idle);
    }

    #[test]
    fn test_cancel_while_active() {
        assert_eq!(run(&[A::StartSend, A::CancelSend]).unwrap(), S::Idle);
        assert_eq!(run(&[A::StartSend, A::StageSucceeded, A::CancelSend]).unwrap(), S::Idle);
        assert_eq!(run(&[A::StartReceive, A::CancelReceive]).unwrap(), S::Idle);
    }

    #[test]
    fn test_tool_missing_returns_to_idle() {
        assert_eq!(run(&[A::StartSend, A::ToolMissing]).unwrap(), S::Idle);
        assert_eq!(run(&[A::StartSend, A::StageSucceeded, A::ToolMissing]).unwrap(), S::Idle);
        assert_eq!(run(&[A::StartReceive, A::ToolMissing]).unwrap(), S::Idle);
    }

    #[test]
    fn test_one_manual_transfer_at_a_time() {
        let err = run(&[A::StartSend, A::StartReceive]).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(err.to_string(), "cannot start receive while STAGING");

        assert!(run(&[A::StartReceive, A::StartSend]).is_err());
        assert!(run(&[A::StartReceive, A::PauseSend]).is_err());
        assert!(S::Idle.apply(A::ResumeSend).is_err());
        assert!(S::PausedSend.apply(A::TransferSucceeded).is_err());
    }

    #[test]
    fn test_state_display_and_serde() {
        assert_eq!(S::PausedRecv.to_string(), "PAUSED_RECV");
        assert_eq!(serde_json::to_string(&S::PausedSend).unwrap(), "\"PAUSED_SEND\"");
        assert!(S::Staging.is_send());
        assert!(S::PausedRecv.is_receive() && S::PausedRecv.is_paused());
        assert!(!S::Idle.is_send() && !S::Idle.is_receive());
    }
}
