use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use switchboard_media::{BridgeHandleId, MediaPool};

use crate::error::{B2buaError, B2buaResult};
use crate::leg::{LegId, LegState, TerminationCause};
use crate::registry::LegRegistry;

/// Bridge state: no skipping forward beyond `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Active,
    Terminating,
    Terminated,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Created => "created",
            BridgeState::Active => "active",
            BridgeState::Terminating => "terminating",
            BridgeState::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// Which side (if any) drove the bridge into `Terminating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminatedBy {
    LegA,
    LegB,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BridgeId(pub Uuid);

impl BridgeId {
    pub fn new() -> Self {
        BridgeId(Uuid::new_v4())
    }
}

impl Default for BridgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BridgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Inner {
    state: BridgeState,
    terminated_by: Option<TerminatedBy>,
    media_bridge_id: Option<BridgeHandleId>,
}

/// Bridges two B2BUA legs so media flows between them, addressed by Leg ID
/// through a shared registry rather than holding the legs directly (the
/// cyclic Dialog/Leg/Bridge reference is broken by handles, not pointers).
/// The Active→Terminating transition is exactly-once: each leg's termination
/// observer races to CAS it, the winner drives teardown, losers return
/// immediately.
pub struct Bridge {
    pub id: BridgeId,
    pub leg_a: LegId,
    pub leg_b: LegId,
    legs: Arc<LegRegistry>,
    inner: Mutex<Inner>,
    media_pool: Option<Arc<MediaPool>>,
    termination_tx: watch::Sender<bool>,
    termination_rx: watch::Receiver<bool>,
}

impl Bridge {
    /// Constructs the bridge and registers each leg's terminated-listener so
    /// that either side hanging up drives teardown without the caller having
    /// to poll. Listeners hold only a `Weak<Bridge>`, since the legs they
    /// close over outlive this bridge in the registry.
    pub fn new(leg_a: LegId, leg_b: LegId, legs: Arc<LegRegistry>, media_pool: Option<Arc<MediaPool>>) -> Arc<Self> {
        let (tx, rx) = watch::channel(false);
        let bridge = Arc::new(Self {
            id: BridgeId::new(),
            leg_a,
            leg_b,
            legs,
            inner: Mutex::new(Inner {
                state: BridgeState::Created,
                terminated_by: None,
                media_bridge_id: None,
            }),
            media_pool,
            termination_tx: tx,
            termination_rx: rx,
        });

        bridge.watch_leg(leg_a, TerminatedBy::LegA);
        bridge.watch_leg(leg_b, TerminatedBy::LegB);
        bridge
    }

    fn watch_leg(self: &Arc<Self>, leg_id: LegId, by: TerminatedBy) {
        let Some(handle) = self.legs.get(leg_id) else {
            return;
        };
        let weak_bridge: Weak<Bridge> = Arc::downgrade(self);
        handle.lock().on_terminated(Arc::new(move |_snapshot| {
            let Some(bridge) = weak_bridge.upgrade() else {
                return;
            };
            if bridge.try_begin_termination(by) {
                tokio::spawn(async move {
                    bridge.teardown(true).await;
                });
            }
        }));
    }

    pub fn state(&self) -> BridgeState {
        self.inner.lock().state
    }

    pub fn terminated_by(&self) -> Option<TerminatedBy> {
        self.inner.lock().terminated_by
    }

    /// `start(ctx)`: requires both legs Answered, then (if a media plane is
    /// configured and both sessions have handles) bridges their media.
    /// Without a media plane the bridge is signaling-only: logged and
    /// allowed to proceed.
    pub async fn start(&self) -> B2buaResult<()> {
        let (leg_a, leg_b) = self.resolve_legs()?;

        {
            let mut inner = self.inner.lock();
            if inner.state != BridgeState::Created {
                return Err(B2buaError::InvalidState {
                    entity: "bridge".to_string(),
                    from: inner.state.to_string(),
                    to: "active".to_string(),
                });
            }

            let (state_a, state_b) = (leg_a.lock().state, leg_b.lock().state);
            if state_a != LegState::Answered || state_b != LegState::Answered {
                return Err(B2buaError::LegNotAnswered(format!(
                    "leg_a={}, leg_b={}",
                    state_a, state_b
                )));
            }
            inner.state = BridgeState::Active;
        }

        if let Some(pool) = &self.media_pool {
            let (session_a, session_b) = (leg_a.lock().session_id, leg_b.lock().session_id);
            if let (Some(session_a), Some(session_b)) = (session_a, session_b) {
                match pool.bridge_media(session_a, session_b).await {
                    Ok(handle) => self.inner.lock().media_bridge_id = Some(handle),
                    Err(e) => warn!(bridge = %self.id, error = %e, "media bridge setup failed, continuing signaling-only"),
                }
            }
        } else {
            info!(bridge = %self.id, "no media plane configured, bridge is signaling-only");
        }

        Ok(())
    }

    fn resolve_legs(&self) -> B2buaResult<(crate::leg::LegHandle, crate::leg::LegHandle)> {
        let leg_a = self
            .legs
            .get(self.leg_a)
            .ok_or_else(|| B2buaError::LegTerminated(self.leg_a.to_string()))?;
        let leg_b = self
            .legs
            .get(self.leg_b)
            .ok_or_else(|| B2buaError::LegTerminated(self.leg_b.to_string()))?;
        Ok((leg_a, leg_b))
    }

    /// Attempts the exactly-once `Active -> Terminating` transition. Returns
    /// `true` for exactly one caller among any number of concurrent racers.
    pub fn try_begin_termination(&self, by: TerminatedBy) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != BridgeState::Active {
            return false;
        }
        inner.state = BridgeState::Terminating;
        inner.terminated_by = Some(by);
        true
    }

    /// `stop(hangup_legs)`: CAS to Terminating; a caller that loses the race
    /// (already `Terminating`/`Terminated`, whether by a prior `stop` or by a
    /// leg's own termination observer) returns immediately and the winner's
    /// teardown runs exactly once.
    pub async fn stop(&self, hangup_legs: bool) -> B2buaResult<()> {
        if !self.try_begin_termination(TerminatedBy::Local) {
            return Ok(());
        }
        self.teardown(hangup_legs).await;
        Ok(())
    }

    /// The actual teardown work, run exactly once by whichever caller won
    /// the `Active -> Terminating` CAS (a direct `stop()` or a leg's
    /// termination observer).
    async fn teardown(&self, hangup_legs: bool) {
        let media_bridge_id = self.inner.lock().media_bridge_id.take();
        if let Some(handle) = media_bridge_id {
            if let Some(pool) = &self.media_pool {
                let unbridge = tokio::time::timeout(Duration::from_secs(5), pool.unbridge_media(handle));
                match unbridge.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(bridge = %self.id, error = %e, "unbridge_media failed, continuing teardown"),
                    Err(_) => warn!(bridge = %self.id, "unbridge_media timed out, continuing teardown"),
                }
            }
        }

        if hangup_legs {
            for leg_id in [self.leg_a, self.leg_b] {
                let Some(leg) = self.legs.get(leg_id) else { continue };
                let (answered, hook) = {
                    let guard = leg.lock();
                    (guard.state == LegState::Answered, guard.on_hangup.clone())
                };
                if !answered {
                    continue;
                }
                // The hook owns everything needed to actually end this leg's
                // side of the call on the wire and release its media
                // session: a real BYE plus session teardown for an outbound
                // leg, or a `Dialog::terminate` call (which cascades to the
                // same) for the inbound one. A leg created without a hook
                // (e.g. a signaling-only test double) just falls through to
                // the local state transition below.
                if let Some(hook) = hook {
                    hook().await;
                }
                let effects = leg.lock().transition(LegState::Destroyed, TerminationCause::BridgePeer);
                if let Some(effects) = effects {
                    effects.fire();
                }
            }
        }

        self.inner.lock().state = BridgeState::Terminated;
        let _ = self.termination_tx.send(true);
        info!(bridge = %self.id, "bridge terminated");
    }

    /// Returns once the bridge reaches `Terminated`.
    pub async fn wait_for_termination(&self) -> TerminatedBy {
        let mut rx = self.termination_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.terminated_by().unwrap_or(TerminatedBy::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::{Direction, Leg, LegHandle};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn answered_leg(call_id: &str, direction: Direction) -> LegHandle {
        let mut leg = Leg::new(call_id.to_string(), direction);
        leg.transition(LegState::Answered, TerminationCause::None);
        Arc::new(Mutex::new(leg))
    }

    fn created_leg(call_id: &str) -> LegHandle {
        Arc::new(Mutex::new(Leg::new(call_id.to_string(), Direction::Inbound)))
    }

    #[tokio::test]
    async fn start_fails_when_either_leg_is_not_answered() {
        let legs = Arc::new(LegRegistry::new());
        let id_a = legs.insert(answered_leg("a", Direction::Inbound));
        let id_b = legs.insert(created_leg("b"));

        let bridge = Bridge::new(id_a, id_b, legs, None);
        let err = bridge.start().await.unwrap_err();
        assert!(matches!(err, B2buaError::LegNotAnswered(_)));
        assert_eq!(bridge.state(), BridgeState::Created);
    }

    #[tokio::test]
    async fn start_succeeds_signaling_only_without_a_media_pool() {
        let legs = Arc::new(LegRegistry::new());
        let id_a = legs.insert(answered_leg("a", Direction::Inbound));
        let id_b = legs.insert(answered_leg("b", Direction::Outbound));

        let bridge = Bridge::new(id_a, id_b, legs, None);
        bridge.start().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Active);
    }

    #[tokio::test]
    async fn stop_transitions_to_terminated_and_is_idempotent() {
        let legs = Arc::new(LegRegistry::new());
        let id_a = legs.insert(answered_leg("a", Direction::Inbound));
        let id_b = legs.insert(answered_leg("b", Direction::Outbound));

        let bridge = Bridge::new(id_a, id_b, legs, None);
        bridge.start().await.unwrap();

        bridge.stop(false).await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Terminated);
        assert_eq!(bridge.terminated_by(), Some(TerminatedBy::Local));

        // Second stop is a no-op: still terminated, same terminated_by.
        bridge.stop(false).await.unwrap();
        assert_eq!(bridge.terminated_by(), Some(TerminatedBy::Local));
    }

    #[tokio::test]
    async fn stop_with_hangup_legs_invokes_each_answered_legs_hangup_hook() {
        let legs = Arc::new(LegRegistry::new());
        let leg_a = answered_leg("a", Direction::Inbound);
        let leg_b = answered_leg("b", Direction::Outbound);

        let hook_calls = Arc::new(AtomicUsize::new(0));
        for leg in [&leg_a, &leg_b] {
            let calls = hook_calls.clone();
            leg.lock().on_hangup = Some(Arc::new(move || {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, AtomicOrdering::SeqCst);
                })
            }));
        }

        let id_a = legs.insert(leg_a.clone());
        let id_b = legs.insert(leg_b.clone());

        let bridge = Bridge::new(id_a, id_b, legs, None);
        bridge.start().await.unwrap();
        bridge.stop(true).await.unwrap();

        assert_eq!(hook_calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(leg_a.lock().state, LegState::Destroyed);
        assert_eq!(leg_a.lock().termination_cause, TerminationCause::BridgePeer);
        assert_eq!(leg_b.lock().state, LegState::Destroyed);
    }

    #[tokio::test]
    async fn one_leg_terminating_drives_bridge_teardown_via_its_observer() {
        let legs = Arc::new(LegRegistry::new());
        let leg_a = answered_leg("a", Direction::Inbound);
        let leg_b = answered_leg("b", Direction::Outbound);
        let id_a = legs.insert(leg_a.clone());
        let id_b = legs.insert(leg_b.clone());

        let bridge = Bridge::new(id_a, id_b, legs, None);
        bridge.start().await.unwrap();

        // Leg B hangs up on its own (e.g. remote BYE) without going through
        // Bridge::stop; the bridge's listener (registered in Bridge::new)
        // must observe this and tear the bridge down.
        let effects = leg_b.lock().transition(LegState::Destroyed, TerminationCause::RemoteBye);
        effects.unwrap().fire();

        let terminated_by = bridge.wait_for_termination().await;
        assert_eq!(terminated_by, TerminatedBy::LegB);
        assert_eq!(bridge.state(), BridgeState::Terminated);
    }

    #[tokio::test]
    async fn concurrent_stop_and_leg_termination_race_exactly_once() {
        let legs = Arc::new(LegRegistry::new());
        let leg_a = answered_leg("a", Direction::Inbound);
        let leg_b = answered_leg("b", Direction::Outbound);
        let id_a = legs.insert(leg_a.clone());
        let id_b = legs.insert(leg_b.clone());

        let bridge = Bridge::new(id_a, id_b, legs, None);
        bridge.start().await.unwrap();

        // Exactly one of these two concurrent paths should win the CAS.
        let bridge_for_stop = bridge.clone();
        let stop_task = tokio::spawn(async move {
            bridge_for_stop.stop(false).await.unwrap();
        });
        let effects = leg_a.lock().transition(LegState::Destroyed, TerminationCause::Normal);
        if let Some(effects) = effects {
            effects.fire();
        }
        stop_task.await.unwrap();

        assert_eq!(bridge.state(), BridgeState::Terminated);
        // terminated_by is set exactly once, to whichever side actually won.
        assert!(matches!(
            bridge.terminated_by(),
            Some(TerminatedBy::Local) | Some(TerminatedBy::LegA)
        ));
    }
}
