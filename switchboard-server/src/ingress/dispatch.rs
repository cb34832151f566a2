use std::net::SocketAddr;

use tracing::warn;

use switchboard_b2bua::TerminationCause;
use switchboard_dialog::build_response;
use switchboard_sip::{Request, Response, StatusCode};

use crate::context::ServerContext;
use crate::ingress::invite::spawn_call_session;

/// Handles an in-dialog ACK: confirms the dialog and, the first time only,
/// spawns the call session that actually runs the dialed route. A retransmitted
/// ACK against an already-`Confirmed` dialog is accepted and otherwise ignored.
pub async fn handle_ack(ctx: &ServerContext, request: Request) {
    let call_id = request.call_id().unwrap_or_default().to_string();

    let was_waiting_ack = ctx
        .dialog_manager
        .get(&call_id)
        .map(|d| d.lock().state == switchboard_dialog::DialogState::WaitingAck)
        .unwrap_or(false);

    if let Err(e) = ctx.dialog_manager.confirm_with_ack(&request).await {
        warn!(call_id, error = %e, "failed to confirm dialog with ACK");
        return;
    }

    if !was_waiting_ack {
        return;
    }

    let Some(dialog) = ctx.dialog_manager.get(&call_id) else {
        return;
    };

    tokio::spawn(spawn_call_session(ctx.clone(), dialog, call_id));
}

/// Handles an in-dialog BYE. An A-leg BYE (matching a `Dialog`) is owned
/// entirely by the dialog manager, which sends the 200 OK and runs
/// termination bookkeeping. A BYE against a B-leg's own wire Call-ID never
/// matches a `Dialog` — the B2BUA originated that leg itself rather than
/// answering an inbound INVITE for it — so it's routed by `LegRegistry`
/// instead and torn down directly.
pub async fn handle_bye(ctx: &ServerContext, request: Request, source: SocketAddr) {
    let call_id = request.call_id().unwrap_or_default().to_string();

    if ctx.dialog_manager.get(&call_id).is_none() {
        if let Some(leg) = ctx.legs.get_by_wire_call_id(&call_id) {
            let response = build_response(&request, StatusCode::OK, None);
            if let Err(e) = ctx.transport.send_response(&response, source).await {
                warn!(call_id, error = %e, "failed to send 200 OK to B-leg BYE");
            }

            let effects = leg.lock().mark_destroyed(TerminationCause::RemoteBye);
            if let Some(effects) = effects {
                effects.fire();
            }
            return;
        }
    }

    if let Err(e) = ctx.dialog_manager.handle_incoming_bye(&request, source).await {
        warn!(error = %e, "failed to handle incoming BYE");
    }
}

/// Handles a CANCEL racing the original INVITE: the dialog manager owns the
/// 200-to-CANCEL / 487-to-INVITE pair and termination bookkeeping entirely.
pub async fn handle_cancel(ctx: &ServerContext, request: Request, source: SocketAddr) {
    if let Err(e) = ctx.dialog_manager.handle_incoming_cancel(&request, source).await {
        warn!(error = %e, "failed to handle incoming CANCEL");
    }
}

/// Routes a SIP response back to the outbound-leg transaction awaiting it
/// (a response to a B-leg INVITE originated by the B2BUA). Responses that
/// match no waiter are stray retransmissions and are simply dropped.
pub async fn handle_response(ctx: &ServerContext, response: Response, source: SocketAddr) {
    ctx.response_router.route(&response, source);
}
