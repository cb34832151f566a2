use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use switchboard_sip::Codec;
use uuid::Uuid;

/// Opaque handle to a media session, returned by `create_session*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a media bridge, returned by `bridge_media`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeHandleId(pub Uuid);

impl BridgeHandleId {
    pub fn new() -> Self {
        BridgeHandleId(Uuid::new_v4())
    }
}

impl Default for BridgeHandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BridgeHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one member of the media-node pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaNodeId(pub String);

impl fmt::Display for MediaNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reason a session is being destroyed, threaded through to the media node
/// for its own accounting/CDR purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestroyReason {
    Normal,
    Bye,
    Cancel,
    Timeout,
    Error,
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DestroyReason::Normal => "normal",
            DestroyReason::Bye => "bye",
            DestroyReason::Cancel => "cancel",
            DestroyReason::Timeout => "timeout",
            DestroyReason::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// A request to create a session whose remote endpoint is already known
/// (used for the A-leg, whose offer came with a concrete RTP address).
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub call_id: String,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub offered_codecs: Vec<Codec>,
}

/// The result of `create_session` / `create_session_pending_remote`: the
/// core only needs the handle, the local endpoint the media node picked,
/// the SDP body to relay, and the codec it selected.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub sdp_body: Vec<u8>,
    pub selected_codec: Codec,
}

/// One event in the `play_audio` stream. The stream terminates after any of
/// `Completed`, `Stopped`, or `Error`.
#[derive(Debug, Clone)]
pub enum PlayAudioEvent {
    Started,
    Progress { percent: u8 },
    Completed,
    Stopped,
    Error { message: String },
}

impl PlayAudioEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlayAudioEvent::Completed | PlayAudioEvent::Stopped | PlayAudioEvent::Error { .. }
        )
    }
}

/// Drain mode for an admin-initiated media-node drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    Graceful,
    Aggressive,
}
