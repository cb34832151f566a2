use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use switchboard_b2bua::{origin, Bridge, BridgeRegistry, DialParams as B2buaDialParams, LegId, LegRegistry, ResponseRouter};
use switchboard_b2bua::{B2buaError, Leg, LegHandle};
use switchboard_dialog::DialogHandle;
use switchboard_dialplan::{CallSession, DialTarget, DialplanError, DialplanResult};
use switchboard_location::LocationStore;
use switchboard_media::{DestroyReason, MediaPool, PlayAudioEvent, SessionId};
use switchboard_sip::{Codec, Uri};
use switchboard_transport::Transport;

use crate::context::ServerContext;

/// Concrete bridge between a dialplan route's abstract `CallSession`
/// operations and the dialog/media/b2bua machinery behind it. One instance
/// is created per confirmed inbound dialog, right before its route starts
/// executing.
pub struct CallSessionImpl {
    call_id: String,
    destination: String,
    caller_id: String,
    dialog: DialogHandle,
    dialog_manager: Arc<switchboard_dialog::DialogManager>,
    media_pool: Arc<MediaPool>,
    location_store: Arc<LocationStore>,
    legs: Arc<LegRegistry>,
    bridges: Arc<BridgeRegistry>,
    response_router: Arc<ResponseRouter>,
    transport: Arc<dyn Transport>,
    advertise_addr: SocketAddr,
    a_leg: LegId,
    session_id: SessionId,
    active_bridge: Mutex<Option<Arc<Bridge>>>,
    started_at: DateTime<Utc>,
}

impl CallSessionImpl {
    /// Constructs the session for a just-confirmed inbound dialog. `session_id`
    /// is the media session already created for the A-leg while answering the
    /// INVITE.
    pub fn new(
        ctx: &ServerContext,
        dialog: DialogHandle,
        call_id: String,
        destination: String,
        caller_id: String,
        session_id: SessionId,
    ) -> Arc<Self> {
        let a_leg_handle = Arc::new(Mutex::new(Leg::new_inbound_answered(call_id.clone())));
        a_leg_handle.lock().session_id = Some(session_id);
        install_a_leg_hangup_hook(&a_leg_handle, ctx.dialog_manager.clone(), call_id.clone());
        let a_leg = ctx.legs.insert(a_leg_handle);
        let started_at = dialog.lock().created_at;

        Arc::new(Self {
            call_id,
            destination,
            caller_id,
            dialog,
            dialog_manager: ctx.dialog_manager.clone(),
            media_pool: ctx.media_pool.clone(),
            location_store: ctx.location_store.clone(),
            legs: ctx.legs.clone(),
            bridges: ctx.bridges.clone(),
            response_router: ctx.response_router.clone(),
            transport: ctx.transport.clone(),
            advertise_addr: ctx.advertise_addr,
            a_leg,
            session_id,
            active_bridge: Mutex::new(None),
            started_at,
        })
    }

    /// Called once, from the dialog's termination callback, however the
    /// dialog ended: tears down any active bridge, releases the A-leg's
    /// media session, and emits the call's closing record.
    pub async fn teardown(&self, reason: DestroyReason) {
        let bridge = self.active_bridge.lock().take();
        let bridge_id = bridge.as_ref().map(|b| b.id);
        let b_leg = bridge.as_ref().map(|b| b.leg_b);
        if let Some(bridge) = bridge {
            bridge.stop(true).await.ok();
            self.bridges.remove(bridge.id);
        }
        self.legs.remove(self.a_leg);
        if let Err(e) = self.media_pool.destroy_session(self.session_id, reason).await {
            warn!(call_id = %self.call_id, error = %e, "failed to destroy A-leg media session on teardown");
        }

        let duration_ms = (Utc::now() - self.started_at).num_milliseconds().max(0);
        info!(
            call_id = %self.call_id,
            a_leg = %self.a_leg,
            b_leg = ?b_leg,
            bridge_id = ?bridge_id,
            duration_ms,
            reason = %reason,
            "call record"
        );
    }

    fn resolve_target(&self, target: &DialTarget) -> DialplanResult<Uri> {
        match target {
            DialTarget::Direct(uri) => {
                Uri::parse(uri).map_err(|e| DialplanError::TargetNotFound(e.to_string()))
            }
            DialTarget::User(user) | DialTarget::Extension(user) => {
                let binding = self
                    .location_store
                    .lookup_one_by_user(user)
                    .ok_or_else(|| DialplanError::UserNotFound(user.clone()))?;
                Ok(binding.effective_contact())
            }
        }
    }
}

/// Gives the A-leg the same `HangupHook` contract an outbound leg gets, so
/// `Bridge::teardown` can hang either side up without knowing it's holding
/// the inbound leg: this one just drives the dialog's own BYE path, which in
/// turn calls back into `CallSessionImpl::teardown` to release the A-leg's
/// media session.
fn install_a_leg_hangup_hook(
    a_leg_handle: &LegHandle,
    dialog_manager: Arc<switchboard_dialog::DialogManager>,
    call_id: String,
) {
    a_leg_handle.lock().on_hangup = Some(Arc::new(move || {
        let dialog_manager = dialog_manager.clone();
        let call_id = call_id.clone();
        Box::pin(async move {
            if let Err(e) = dialog_manager
                .terminate(&call_id, switchboard_dialog::TerminateReason::LocalBye)
                .await
            {
                warn!(call_id = %call_id, error = %e, "failed to terminate A-leg dialog on bridge-peer hangup");
            }
        })
    }));
}

fn map_b2bua_error(e: B2buaError) -> DialplanError {
    match e {
        B2buaError::DialTimeout => DialplanError::DialTimeout,
        B2buaError::DialCanceled => DialplanError::DialCanceled,
        B2buaError::DialRejected { code, reason } => DialplanError::DialRejected { code, reason },
        other => DialplanError::Media(other.to_string()),
    }
}

#[async_trait]
impl CallSession for CallSessionImpl {
    fn call_id(&self) -> &str {
        &self.call_id
    }

    fn destination(&self) -> &str {
        &self.destination
    }

    fn caller_id(&self) -> &str {
        &self.caller_id
    }

    fn cancel_token(&self) -> CancellationToken {
        self.dialog.lock().cancel_token.clone()
    }

    fn is_terminated(&self) -> bool {
        self.dialog.lock().is_terminal()
    }

    async fn play_audio(&self, file: &str, loop_playback: bool) -> DialplanResult<()> {
        let mut events = self
            .media_pool
            .play_audio(self.session_id, file, loop_playback)
            .await
            .map_err(|e| DialplanError::Media(e.to_string()))?;

        while let Some(event) = events.recv().await {
            match event {
                PlayAudioEvent::Completed | PlayAudioEvent::Stopped => return Ok(()),
                PlayAudioEvent::Error { message } => return Err(DialplanError::Media(message)),
                PlayAudioEvent::Started | PlayAudioEvent::Progress { .. } => continue,
            }
        }
        Ok(())
    }

    async fn stop_audio(&self) -> DialplanResult<()> {
        self.media_pool
            .stop_audio(self.session_id)
            .await
            .map_err(|e| DialplanError::Media(e.to_string()))
    }

    async fn dial(&self, target: &str, timeout: Duration) -> DialplanResult<()> {
        let dial_target = DialTarget::parse(target);
        let contact = self.resolve_target(&dial_target)?;

        let local_identity = Uri::new(self.advertise_addr.ip().to_string()).with_user(self.caller_id.clone());
        let params = B2buaDialParams {
            contact,
            local_identity,
            caller_name: None,
            advertise_addr: self.advertise_addr,
            offered_codecs: vec![Codec::pcmu(), Codec::pcma()],
            timeout,
        };

        let cancel = self.dialog.lock().cancel_token.clone();
        let b_leg = origin::originate(
            self.call_id.clone(),
            params,
            self.transport.clone(),
            self.media_pool.clone(),
            self.response_router.clone(),
            cancel,
        )
        .await
        .map_err(map_b2bua_error)?;

        let wire_call_id = b_leg.lock().dialog_ctx.as_ref().map(|ctx| ctx.wire_call_id.clone());
        let b_leg_id = self.legs.insert(b_leg);
        if let Some(wire_call_id) = wire_call_id {
            self.legs.index_wire_call_id(wire_call_id, b_leg_id);
        }
        let bridge = Bridge::new(self.a_leg, b_leg_id, self.legs.clone(), Some(self.media_pool.clone()));
        self.bridges.insert(bridge.clone());

        if let Err(e) = bridge.start().await {
            self.bridges.remove(bridge.id);
            self.legs.remove(b_leg_id);
            return Err(map_b2bua_error(e));
        }
        *self.active_bridge.lock() = Some(bridge.clone());

        bridge.wait_for_termination().await;

        *self.active_bridge.lock() = None;
        self.bridges.remove(bridge.id);
        self.legs.remove(b_leg_id);
        Ok(())
    }

    async fn hangup(&self, _reason: Option<&str>) -> DialplanResult<()> {
        let bridge = self.active_bridge.lock().take();
        if let Some(bridge) = bridge {
            bridge.stop(true).await.ok();
            self.bridges.remove(bridge.id);
        }
        self.dialog_manager
            .terminate(&self.call_id, switchboard_dialog::TerminateReason::LocalBye)
            .await
            .map_err(|e| DialplanError::Media(e.to_string()))
    }
}
