use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchboard_sip::{Codec, Request, Response};
use tokio_util::sync::CancellationToken;

/// Dialog state machine. Transitions are monotonic: no re-entry, and
/// `Terminated` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DialogState {
    Initial,
    Early,
    WaitingAck,
    Confirmed,
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DialogState::Initial => "initial",
            DialogState::Early => "early",
            DialogState::WaitingAck => "waiting-ack",
            DialogState::Confirmed => "confirmed",
            DialogState::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// Why a Dialog reached `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    None,
    LocalBye,
    RemoteBye,
    Cancel,
    Timeout,
    Error,
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminateReason::None => "none",
            TerminateReason::LocalBye => "local-bye",
            TerminateReason::RemoteBye => "remote-bye",
            TerminateReason::Cancel => "cancel",
            TerminateReason::Timeout => "timeout",
            TerminateReason::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A SIP call's dialog state, keyed by Call-ID.
///
/// Holds the original INVITE and the issued final response so BYE/CANCEL can
/// be constructed later without re-deriving their headers, plus whatever
/// media-session attachment the dialog has accumulated.
pub struct Dialog {
    pub call_id: String,
    pub state: DialogState,
    pub local_tag: Option<String>,
    pub remote_tag: Option<String>,
    pub state_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub terminate_reason: TerminateReason,

    pub invite: Request,
    pub invite_source: SocketAddr,
    pub final_response: Option<Response>,

    pub session_id: Option<String>,
    pub remote_rtp_addr: Option<SocketAddr>,
    pub codec: Option<Codec>,

    pub cancel_token: CancellationToken,

    /// Fired exactly once, outside any lock, when the dialog reaches
    /// `Terminated`. The server layer uses this to release the attached
    /// media session with the reason mapped from `terminate_reason`.
    pub on_terminate: Option<Arc<dyn Fn(DialogTerminated) + Send + Sync>>,
}

/// Snapshot handed to a dialog's termination callback.
#[derive(Debug, Clone)]
pub struct DialogTerminated {
    pub call_id: String,
    pub reason: TerminateReason,
    pub session_id: Option<String>,
}

impl Dialog {
    pub fn new(call_id: String, invite: Request, invite_source: SocketAddr) -> Self {
        let now = Utc::now();
        let remote_tag = invite
            .from_header()
            .and_then(|h| h.ok())
            .and_then(|h| h.tag);
        Self {
            call_id,
            state: DialogState::Initial,
            local_tag: None,
            remote_tag,
            state_changed_at: now,
            created_at: now,
            terminate_reason: TerminateReason::None,
            invite,
            invite_source,
            final_response: None,
            session_id: None,
            remote_rtp_addr: None,
            codec: None,
            cancel_token: CancellationToken::new(),
            on_terminate: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state == DialogState::Terminated
    }

    pub(crate) fn transition(&mut self, to: DialogState) {
        self.state = to;
        self.state_changed_at = Utc::now();
    }

    pub(crate) fn generate_local_tag() -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        format!("{:08x}", rng.gen::<u32>())
    }
}
