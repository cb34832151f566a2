use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use switchboard_dialog::{DialogError, TerminateReason};
use switchboard_media::{CreateSessionRequest, DestroyReason};
use switchboard_sip::{Request, SdpBody, StatusCode};

use crate::context::ServerContext;
use crate::ingress::{from_user, request_uri_user};
use crate::session::CallSessionImpl;

/// Handles an inbound INVITE: creates (or reuses, on retransmission) the
/// dialog, allocates a media session against the offered SDP, answers with
/// 100/200, and stores what the session needs on the dialog itself. The
/// call only actually starts running its route once the caller's ACK lands
/// (see `ingress::dispatch::handle_ack`) — this handler never blocks on it.
pub async fn handle_invite(ctx: &ServerContext, request: Request, source: SocketAddr) {
    let call_id = request.call_id().unwrap_or_default().to_string();

    let dialog = match ctx.dialog_manager.create_from_invite(request.clone(), source) {
        Ok(dialog) => dialog,
        Err(e) => {
            warn!(call_id, error = %e, "failed to create dialog for INVITE");
            return;
        }
    };

    if dialog.lock().state != switchboard_dialog::DialogState::Initial {
        // Retransmission of an INVITE already past the initial offer; the
        // original response is still in flight or already delivered.
        return;
    }

    if let Err(e) = ctx.dialog_manager.send_trying(&dialog).await {
        warn!(call_id, error = %e, "failed to send 100 Trying");
        return;
    }

    if request.body.is_empty() {
        reject(&ctx, &call_id, StatusCode::NOT_ACCEPTABLE).await;
        return;
    }
    let offer = match SdpBody::parse(&request.body) {
        Ok(sdp) => sdp,
        Err(e) => {
            warn!(call_id, error = %e, "malformed SDP offer");
            reject(&ctx, &call_id, StatusCode::BAD_REQUEST).await;
            return;
        }
    };
    let Some(remote_port) = offer.audio_port() else {
        reject(&ctx, &call_id, StatusCode::NOT_ACCEPTABLE).await;
        return;
    };

    let create_request = CreateSessionRequest {
        call_id: call_id.clone(),
        remote_addr: offer.connection_addr.into(),
        remote_port,
        offered_codecs: offer.audio_codecs(),
    };

    let session = match ctx.media_pool.create_session(create_request).await {
        Ok(session) => session,
        Err(e) => {
            warn!(call_id, error = %e, "media session allocation failed for inbound leg");
            reject(&ctx, &call_id, StatusCode::SERVICE_UNAVAILABLE).await;
            return;
        }
    };

    {
        let mut guard = dialog.lock();
        guard.session_id = Some(session.session_id.to_string());
        guard.remote_rtp_addr = Some(SocketAddr::new(offer.connection_addr.into(), remote_port));
        guard.codec = Some(session.selected_codec.clone());
    }

    if let Err(e) = ctx.dialog_manager.send_ok(&dialog, &session.sdp_body).await {
        warn!(call_id, error = %e, "failed to send 200 OK");
        if let Err(e) = ctx.media_pool.destroy_session(session.session_id, DestroyReason::Error).await {
            warn!(call_id, error = %e, "failed to destroy media session after failed 200 OK");
        }
        return;
    }

    info!(call_id, "inbound call answered, awaiting ACK");
}

async fn reject(ctx: &ServerContext, call_id: &str, status: StatusCode) {
    warn!(call_id, status = status.0, "rejecting inbound INVITE");
    if let Err(e) = ctx.dialog_manager.reject(call_id, status).await {
        if !matches!(e, DialogError::NotFound(_)) {
            warn!(call_id, error = %e, "failed to reject dialog for inbound INVITE");
        }
    }
}

/// Builds the `CallSessionImpl` for a just-confirmed dialog, wires its
/// termination teardown, and spawns the matching route on a detached task.
/// Invoked once per call, from `ingress::dispatch::handle_ack`.
pub(crate) async fn spawn_call_session(ctx: ServerContext, dialog: switchboard_dialog::DialogHandle, call_id: String) {
    let (destination, caller_id, session_id) = {
        let guard = dialog.lock();
        let destination = request_uri_user(&guard.invite);
        let caller_id = from_user(&guard.invite);
        let session_id = guard
            .session_id
            .as_deref()
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
            .map(switchboard_media::SessionId);
        (destination, caller_id, session_id)
    };

    let Some(session_id) = session_id else {
        warn!(call_id, "confirmed dialog has no attached media session, aborting");
        return;
    };

    let session = CallSessionImpl::new(&ctx, dialog.clone(), call_id.clone(), destination, caller_id, session_id);

    let teardown_session = session.clone();
    let dialog_manager = ctx.dialog_manager.clone();
    dialog_manager.set_on_terminate(
        &dialog,
        Arc::new(move |terminated: switchboard_dialog::DialogTerminated| {
            let session = teardown_session.clone();
            let reason = match terminated.reason {
                TerminateReason::RemoteBye => DestroyReason::Bye,
                TerminateReason::Cancel => DestroyReason::Cancel,
                TerminateReason::Timeout => DestroyReason::Timeout,
                TerminateReason::LocalBye => DestroyReason::Normal,
                TerminateReason::Error | TerminateReason::None => DestroyReason::Error,
            };
            tokio::spawn(async move {
                session.teardown(reason).await;
            });
        }),
    );

    let dialplan = ctx.dialplan.clone();
    tokio::spawn(async move {
        let cancel = session.cancel_token();
        use switchboard_dialplan::CallSession;
        let result = dialplan.execute(&cancel, session.as_ref()).await;
        if let Err(e) = result {
            warn!(call_id = %session.call_id(), error = %e, "dialplan route ended in error");
            if !session.is_terminated() {
                let _ = session.hangup(Some("route-error")).await;
            }
        }
    });
}
