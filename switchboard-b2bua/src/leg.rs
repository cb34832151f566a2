use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use switchboard_sip::Codec;
use switchboard_sip::StatusCode;
use switchboard_sip::Uri;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Ordinal, monotonic Leg state. Terminal = {Failed, Destroyed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LegState {
    Created,
    Ringing,
    EarlyMedia,
    Answered,
    Failed,
    Destroyed,
}

impl LegState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LegState::Failed | LegState::Destroyed)
    }
}

impl fmt::Display for LegState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LegState::Created => "created",
            LegState::Ringing => "ringing",
            LegState::EarlyMedia => "early-media",
            LegState::Answered => "answered",
            LegState::Failed => "failed",
            LegState::Destroyed => "destroyed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Why a Leg reached a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    None,
    Normal,
    RemoteBye,
    Cancel,
    Timeout,
    Rejected,
    BridgePeer,
    Error,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationCause::None => "none",
            TerminationCause::Normal => "normal",
            TerminationCause::RemoteBye => "remote-bye",
            TerminationCause::Cancel => "cancel",
            TerminationCause::Timeout => "timeout",
            TerminationCause::Rejected => "rejected",
            TerminationCause::BridgePeer => "bridge-peer",
            TerminationCause::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegId(pub Uuid);

impl LegId {
    pub fn new() -> Self {
        LegId(Uuid::new_v4())
    }
}

impl Default for LegId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sends whatever wire-level teardown this leg's side needs (a real SIP BYE,
/// or for an inbound leg a `DialogManager::terminate` call) without Bridge
/// needing to know which kind of leg it is holding. Installed by whichever
/// crate created the leg: `switchboard-b2bua::origin` for outbound legs,
/// `switchboard-server::session` for the inbound one.
pub type HangupHook = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The in-dialog context needed to build a subsequent BYE (or other
/// mid-dialog request) toward an outbound leg's far end: the B-leg never
/// gets a `switchboard_dialog::Dialog` of its own, so this is its
/// equivalent, populated once the leg reaches `Answered`.
#[derive(Debug, Clone)]
pub struct LegDialogContext {
    pub wire_call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
    pub local_uri: Uri,
    pub remote_target: Uri,
    pub local_via_addr: SocketAddr,
    pub local_cseq: u32,
}

/// A B2BUA endpoint: one side of a bridged call.
pub struct Leg {
    pub id: LegId,
    pub call_id: String,
    pub direction: Direction,
    pub state: LegState,
    pub termination_cause: TerminationCause,

    pub session_id: Option<switchboard_media::SessionId>,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub codec: Option<Codec>,

    /// Set once an outbound leg is answered; used to build the BYE that
    /// tears it down from our side (bridge-peer hangup, local hangup).
    pub dialog_ctx: Option<LegDialogContext>,

    /// How to actually hang this leg up on the wire; see `HangupHook`.
    pub on_hangup: Option<HangupHook>,

    /// Final SIP status/reason, set only for failed outbound legs.
    pub final_status: Option<(StatusCode, String)>,

    pub created_at: DateTime<Utc>,
    pub ringing_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,

    pub cancel_token: CancellationToken,

    state_listeners: Vec<Arc<dyn Fn(LegState) + Send + Sync>>,
    terminated_listeners: Vec<Arc<dyn Fn(LegTerminated) + Send + Sync>>,
}

/// Snapshot handed to a leg's terminated-listeners, taken after the per-entity
/// lock protecting the Leg is released: listener slices are copied under the
/// lock and fired outside it, so a listener can safely call back into the
/// leg without deadlocking.
#[derive(Debug, Clone)]
pub struct LegTerminated {
    pub leg_id: LegId,
    pub call_id: String,
    pub cause: TerminationCause,
    pub session_id: Option<switchboard_media::SessionId>,
}

/// What a successful `Leg::transition` call produced, for the caller to fire
/// outside this Leg's lock.
pub struct LegTransitionEffects {
    pub new_state: LegState,
    pub state_listeners: Vec<Arc<dyn Fn(LegState) + Send + Sync>>,
    pub terminated: Option<(Vec<Arc<dyn Fn(LegTerminated) + Send + Sync>>, LegTerminated)>,
}

impl LegTransitionEffects {
    /// Fires all collected listeners. Call only after dropping the Leg lock.
    pub fn fire(self) {
        for listener in &self.state_listeners {
            listener(self.new_state);
        }
        if let Some((listeners, snapshot)) = self.terminated {
            for listener in &listeners {
                listener(snapshot.clone());
            }
        }
    }
}

impl Leg {
    pub fn new(call_id: String, direction: Direction) -> Self {
        Self {
            id: LegId::new(),
            call_id,
            direction,
            state: LegState::Created,
            termination_cause: TerminationCause::None,
            session_id: None,
            local_addr: None,
            remote_addr: None,
            codec: None,
            dialog_ctx: None,
            on_hangup: None,
            final_status: None,
            created_at: Utc::now(),
            ringing_at: None,
            answered_at: None,
            terminated_at: None,
            cancel_token: CancellationToken::new(),
            state_listeners: Vec::new(),
            terminated_listeners: Vec::new(),
        }
    }

    /// An inbound leg constructed from a Dialog already in WaitingAck or
    /// Confirmed is created directly in `Answered`.
    pub fn new_inbound_answered(call_id: String) -> Self {
        let mut leg = Self::new(call_id, Direction::Inbound);
        leg.state = LegState::Answered;
        leg.answered_at = Some(Utc::now());
        leg
    }

    pub fn on_state_change(&mut self, listener: Arc<dyn Fn(LegState) + Send + Sync>) {
        self.state_listeners.push(listener);
    }

    pub fn on_terminated(&mut self, listener: Arc<dyn Fn(LegTerminated) + Send + Sync>) {
        self.terminated_listeners.push(listener);
    }

    pub fn terminated_snapshot(&self) -> LegTerminated {
        LegTerminated {
            leg_id: self.id,
            call_id: self.call_id.clone(),
            cause: self.termination_cause,
            session_id: self.session_id,
        }
    }

    /// Advances state; no-op if `to` does not strictly follow the current
    /// state in ordinal order, except that any non-terminal state may jump
    /// directly to a terminal one. `cause` is recorded when `to` is terminal.
    /// Returns the listeners to fire and, if terminal, the snapshot to hand
    /// them — the caller invokes these after releasing this Leg's lock.
    pub(crate) fn transition(&mut self, to: LegState, cause: TerminationCause) -> Option<LegTransitionEffects> {
        let advancing = to > self.state || (to.is_terminal() && !self.state.is_terminal());
        if !advancing {
            return None;
        }
        self.state = to;
        match to {
            LegState::Ringing => self.ringing_at = Some(Utc::now()),
            LegState::Answered => self.answered_at = Some(Utc::now()),
            LegState::Failed | LegState::Destroyed => {
                self.terminated_at = Some(Utc::now());
                self.termination_cause = cause;
            }
            _ => {}
        }

        Some(LegTransitionEffects {
            new_state: to,
            state_listeners: self.state_listeners.clone(),
            terminated: if to.is_terminal() {
                Some((self.terminated_listeners.clone(), self.terminated_snapshot()))
            } else {
                None
            },
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Transitions this leg straight to `Destroyed`. For callers outside
    /// this crate that never drive a leg through its own transaction state
    /// machine — an in-dialog BYE landing on a B-leg's wire Call-ID, matched
    /// by `LegRegistry::get_by_wire_call_id` rather than by `origin`'s
    /// response handling.
    pub fn mark_destroyed(&mut self, cause: TerminationCause) -> Option<LegTransitionEffects> {
        self.transition(LegState::Destroyed, cause)
    }
}

pub type LegHandle = Arc<Mutex<Leg>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn new_leg_starts_created_with_no_cause() {
        let leg = Leg::new("call-1".to_string(), Direction::Inbound);
        assert_eq!(leg.state, LegState::Created);
        assert_eq!(leg.termination_cause, TerminationCause::None);
        assert!(leg.answered_at.is_none());
    }

    #[test]
    fn inbound_answered_constructor_skips_straight_to_answered() {
        let leg = Leg::new_inbound_answered("call-2".to_string());
        assert_eq!(leg.state, LegState::Answered);
        assert_eq!(leg.direction, Direction::Inbound);
        assert!(leg.answered_at.is_some());
    }

    #[test]
    fn transition_rejects_non_advancing_moves() {
        let mut leg = Leg::new("call-3".to_string(), Direction::Outbound);
        leg.transition(LegState::Ringing, TerminationCause::None);
        assert_eq!(leg.state, LegState::Ringing);

        // Same state again: no-op.
        assert!(leg.transition(LegState::Ringing, TerminationCause::None).is_none());
        assert_eq!(leg.state, LegState::Ringing);

        // Backward move: no-op.
        assert!(leg.transition(LegState::Created, TerminationCause::None).is_none());
        assert_eq!(leg.state, LegState::Ringing);
    }

    #[test]
    fn transition_allows_any_non_terminal_state_to_jump_to_terminal() {
        let mut leg = Leg::new("call-4".to_string(), Direction::Outbound);
        // Created -> Failed directly, skipping Ringing/EarlyMedia/Answered.
        let effects = leg.transition(LegState::Failed, TerminationCause::Rejected);
        assert!(effects.is_some());
        assert_eq!(leg.state, LegState::Failed);
        assert_eq!(leg.termination_cause, TerminationCause::Rejected);
        assert!(leg.terminated_at.is_some());
    }

    #[test]
    fn transition_out_of_terminal_state_is_rejected() {
        let mut leg = Leg::new("call-5".to_string(), Direction::Outbound);
        leg.transition(LegState::Destroyed, TerminationCause::Normal);
        assert!(leg.transition(LegState::Answered, TerminationCause::None).is_none());
        assert_eq!(leg.state, LegState::Destroyed);
        assert_eq!(leg.termination_cause, TerminationCause::Normal);
    }

    #[test]
    fn state_listeners_fire_with_new_state_after_transition() {
        let mut leg = Leg::new("call-6".to_string(), Direction::Outbound);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        leg.on_state_change(Arc::new(move |s| seen_clone.lock().push(s)));

        let effects = leg.transition(LegState::Ringing, TerminationCause::None).unwrap();
        effects.fire();
        assert_eq!(*seen.lock(), vec![LegState::Ringing]);
    }

    #[test]
    fn terminated_listeners_fire_only_on_terminal_transition() {
        let mut leg = Leg::new("call-7".to_string(), Direction::Outbound);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        leg.on_terminated(Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let effects = leg.transition(LegState::Ringing, TerminationCause::None).unwrap();
        effects.fire();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let effects = leg.transition(LegState::Failed, TerminationCause::Timeout).unwrap();
        effects.fire();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mark_destroyed_is_idempotent_after_failed() {
        let mut leg = Leg::new("call-8".to_string(), Direction::Outbound);
        assert!(leg.mark_destroyed(TerminationCause::Normal).is_some());
        assert_eq!(leg.state, LegState::Destroyed);
        // A leg already Destroyed cannot be re-marked (terminal, no re-entry).
        assert!(leg.mark_destroyed(TerminationCause::Error).is_none());
        assert_eq!(leg.termination_cause, TerminationCause::Normal);
    }

    #[test]
    fn leg_state_ordinal_matches_spec_order() {
        assert!(LegState::Created < LegState::Ringing);
        assert!(LegState::Ringing < LegState::EarlyMedia);
        assert!(LegState::EarlyMedia < LegState::Answered);
        assert!(LegState::Answered < LegState::Failed);
        assert!(LegState::Failed < LegState::Destroyed);
    }
}
