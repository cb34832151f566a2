use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use switchboard_sip::{Codec, HeaderName, Method, Request, Response, SdpBody, StatusCode, Uri};
use switchboard_transport::Transport;
use tracing::{debug, warn};

use switchboard_media::{DestroyReason, MediaPool, SessionHandle};

use crate::error::{B2buaError, B2buaResult};
use crate::leg::{Direction, Leg, LegDialogContext, LegHandle, LegState, TerminationCause};
use crate::router::ResponseRouter;

/// Everything the outbound INVITE needs that the dialplan/ingress layer
/// resolves ahead of time: the destination, who we claim to be, acceptable
/// codecs, our own advertise address, and a bound on how long to wait.
pub struct DialParams {
    pub contact: Uri,
    pub local_identity: Uri,
    pub caller_name: Option<String>,
    pub advertise_addr: SocketAddr,
    pub offered_codecs: Vec<Codec>,
    pub timeout: Duration,
}

/// Drives steps 1-6 of outbound (B-leg) call origination: create the leg,
/// allocate a pending-remote media session, send the INVITE, react to every
/// response class, and tear down cleanly on any failure path.
pub async fn originate(
    call_id: String,
    params: DialParams,
    transport: Arc<dyn Transport>,
    media_pool: Arc<MediaPool>,
    response_router: Arc<ResponseRouter>,
    parent_cancel: tokio_util::sync::CancellationToken,
) -> B2buaResult<LegHandle> {
    let leg = Arc::new(parking_lot::Mutex::new(Leg::new(call_id.clone(), Direction::Outbound)));

    let session = match media_pool
        .create_session_pending_remote(&call_id, &params.offered_codecs)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(call_id, error = %e, "media allocation failed for outbound leg");
            fail_leg(&leg, TerminationCause::Error);
            return Err(B2buaError::MediaSetupFailed(e.to_string()));
        }
    };
    leg.lock().session_id = Some(session.session_id);

    // The B-leg's own SIP dialog gets a fresh Call-ID and local tag,
    // independent of the A-leg's (`call_id` here is only the cross-leg
    // correlation id used for admin listings and the media session label).
    let wire_call_id = uuid::Uuid::new_v4().to_string();
    let local_tag = generate_tag();
    let invite = build_invite(&wire_call_id, &local_tag, &params, &session);
    let destination = destination_for_uri(&params.contact);
    let responses = response_router.register(wire_call_id.clone());

    let result = run_transaction(
        &leg,
        &invite,
        &wire_call_id,
        &local_tag,
        destination,
        &transport,
        &media_pool,
        &params,
        responses,
        parent_cancel,
    )
    .await;
    response_router.deregister(&wire_call_id);

    if result.is_err() {
        let reason = match &result {
            Err(B2buaError::DialTimeout) => DestroyReason::Timeout,
            Err(B2buaError::DialCanceled) => DestroyReason::Cancel,
            Err(B2buaError::DialRejected { .. }) => DestroyReason::Error,
            _ => DestroyReason::Error,
        };
        if let Err(e) = media_pool.destroy_session(session.session_id, reason).await {
            warn!(call_id, error = %e, "failed to destroy outbound leg's media session on failure path");
        }
    }

    result.map(|()| leg)
}

fn fail_leg(leg: &LegHandle, cause: TerminationCause) {
    let effects = leg.lock().transition(LegState::Failed, cause);
    if let Some(effects) = effects {
        effects.fire();
    }
}

fn build_invite(call_id: &str, local_tag: &str, params: &DialParams, session: &SessionHandle) -> Request {
    let mut from_line = format!("<{}>;tag={}", params.local_identity, local_tag);
    if let Some(name) = &params.caller_name {
        from_line = format!("\"{}\" {}", name, from_line);
    }

    let mut invite = Request::new(Method::Invite, params.contact.clone());
    invite.headers.push(
        HeaderName::Via,
        format!(
            "SIP/2.0/UDP {}:{};branch=z9hG4bK{}",
            params.advertise_addr.ip(),
            params.advertise_addr.port(),
            uuid::Uuid::new_v4().simple()
        ),
    );
    invite.headers.push(HeaderName::From, from_line);
    invite.headers.push(HeaderName::To, format!("<{}>", params.contact));
    invite.headers.push(HeaderName::CallId, call_id.to_string());
    invite.headers.push(HeaderName::CSeq, "1 INVITE".to_string());
    invite.headers.push(
        HeaderName::Contact,
        format!("<sip:{}:{}>", params.advertise_addr.ip(), params.advertise_addr.port()),
    );
    invite.headers.push(HeaderName::MaxForwards, "70".to_string());
    invite.with_body("application/sdp", session.sdp_body.clone())
}

fn generate_tag() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    format!("{:08x}", rng.gen::<u32>())
}

fn destination_for_uri(uri: &Uri) -> SocketAddr {
    let ip = uri
        .host
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    SocketAddr::new(ip, uri.port_or_default())
}

/// Response-driven portion of origination: sends the INVITE, then polls
/// incoming responses on the transport's per-request channel until a final
/// response, the timeout, or the parent's cancellation token fires.
#[allow(clippy::too_many_arguments)]
async fn run_transaction(
    leg: &LegHandle,
    invite: &Request,
    wire_call_id: &str,
    local_tag: &str,
    destination: SocketAddr,
    transport: &Arc<dyn Transport>,
    media_pool: &Arc<MediaPool>,
    params: &DialParams,
    mut responses: tokio::sync::mpsc::Receiver<crate::router::RoutedResponse>,
    parent_cancel: tokio_util::sync::CancellationToken,
) -> B2buaResult<()> {
    transport
        .send_request(invite, destination)
        .await
        .map_err(B2buaError::from)?;

    let deadline = tokio::time::Instant::now() + params.timeout;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                send_cancel_best_effort(invite, destination, transport).await;
                fail_leg(leg, TerminationCause::Timeout);
                return Err(B2buaError::DialTimeout);
            }
            _ = parent_cancel.cancelled() => {
                send_cancel_best_effort(invite, destination, transport).await;
                fail_leg(leg, TerminationCause::Cancel);
                return Err(B2buaError::DialCanceled);
            }
            maybe_response = responses.recv() => {
                let Some((response, source)) = maybe_response else {
                    send_cancel_best_effort(invite, destination, transport).await;
                    fail_leg(leg, TerminationCause::Error);
                    return Err(B2buaError::Transport("response channel closed".to_string()));
                };
                match handle_response(leg, &response, media_pool).await {
                    ResponseOutcome::Continue => continue,
                    ResponseOutcome::Answered => {
                        let ack = build_ack(invite, &response);
                        let ack_destination = ack_destination(&response, source, &invite.request_uri);
                        if let Err(e) = transport.send_request(&ack, ack_destination).await {
                            warn!(error = %e, "failed to send ACK for outbound leg's 2xx");
                        }
                        record_dialog_ctx(leg, wire_call_id, local_tag, &response, params);
                        install_hangup_hook(leg, transport.clone(), media_pool.clone());
                        return Ok(());
                    }
                    ResponseOutcome::Rejected { code, reason } => {
                        return Err(B2buaError::DialRejected { code, reason });
                    }
                }
            }
        }
    }
}

/// Stashes the tags/target needed to build a BYE for this leg later, now
/// that the 2xx has supplied the remote tag and (maybe) a Contact.
fn record_dialog_ctx(leg: &LegHandle, wire_call_id: &str, local_tag: &str, response: &Response, params: &DialParams) {
    let remote_tag = response
        .to_header()
        .and_then(|h| h.ok())
        .and_then(|h| h.tag)
        .unwrap_or_default();
    let remote_target = response
        .contact()
        .and_then(|c| c.ok())
        .map(|c| c.uri)
        .unwrap_or_else(|| params.contact.clone());

    leg.lock().dialog_ctx = Some(LegDialogContext {
        wire_call_id: wire_call_id.to_string(),
        local_tag: local_tag.to_string(),
        remote_tag,
        local_uri: params.local_identity.clone(),
        remote_target,
        local_via_addr: params.advertise_addr,
        local_cseq: 1,
    });
}

/// Wires the leg's `HangupHook` to a BYE built from its just-recorded dialog
/// context, followed by releasing its media session, so the Bridge can hang
/// this leg up without knowing it is talking to a raw SIP peer rather than a
/// `Dialog` (whose own teardown path releases the A-leg's session instead).
fn install_hangup_hook(leg: &LegHandle, transport: Arc<dyn Transport>, media_pool: Arc<MediaPool>) {
    let leg_for_hook = leg.clone();
    leg.lock().on_hangup = Some(Arc::new(move || {
        let leg = leg_for_hook.clone();
        let transport = transport.clone();
        let media_pool = media_pool.clone();
        Box::pin(async move {
            send_bye(&leg, &transport).await;
            let session_id = leg.lock().session_id;
            if let Some(session_id) = session_id {
                if let Err(e) = media_pool.destroy_session(session_id, DestroyReason::Bye).await {
                    warn!(error = %e, "failed to destroy outbound leg's media session on hangup");
                }
            }
        })
    }));
}

/// Sends a BYE on an answered outbound leg from its stored dialog context
/// and advances its local CSeq. Used by the Bridge when tearing down a
/// B-leg from our side (local hangup, bridge-peer hangup). Failures are
/// logged and swallowed, matching the best-effort BYE policy the dialog
/// manager applies to the A-leg.
pub async fn send_bye(leg: &LegHandle, transport: &Arc<dyn Transport>) {
    let ctx = {
        let mut guard = leg.lock();
        let Some(stored) = guard.dialog_ctx.as_mut() else {
            return;
        };
        stored.local_cseq += 1;
        stored.clone()
    };

    let mut bye = Request::new(Method::Bye, ctx.remote_target.clone());
    bye.headers.push(
        HeaderName::Via,
        format!(
            "SIP/2.0/UDP {}:{};branch=z9hG4bK{}",
            ctx.local_via_addr.ip(),
            ctx.local_via_addr.port(),
            uuid::Uuid::new_v4().simple()
        ),
    );
    bye.headers
        .push(HeaderName::From, format!("<{}>;tag={}", ctx.local_uri, ctx.local_tag));
    let to_line = if ctx.remote_tag.is_empty() {
        format!("<{}>", ctx.remote_target)
    } else {
        format!("<{}>;tag={}", ctx.remote_target, ctx.remote_tag)
    };
    bye.headers.push(HeaderName::To, to_line);
    bye.headers.push(HeaderName::CallId, ctx.wire_call_id.clone());
    bye.headers.push(HeaderName::CSeq, format!("{} BYE", ctx.local_cseq));
    bye.headers.push(HeaderName::MaxForwards, "70".to_string());

    let destination = destination_for_uri(&ctx.remote_target);
    if let Err(e) = transport.send_request(&bye, destination).await {
        warn!(call_id = %ctx.wire_call_id, error = %e, "failed to send BYE on outbound leg, continuing teardown");
    }
}

enum ResponseOutcome {
    Continue,
    Answered,
    Rejected { code: u16, reason: String },
}

async fn handle_response(leg: &LegHandle, response: &Response, media_pool: &Arc<MediaPool>) -> ResponseOutcome {
    let status = response.status;
    if status.is_provisional() {
        if status == StatusCode::TRYING {
            debug!("outbound leg received 100 Trying");
            return ResponseOutcome::Continue;
        }
        if status == StatusCode::RINGING || status == StatusCode::CALL_IS_BEING_FORWARDED {
            fire_transition(leg, LegState::Ringing, TerminationCause::None);
            return ResponseOutcome::Continue;
        }
        if status == StatusCode::SESSION_PROGRESS {
            fire_transition(leg, LegState::EarlyMedia, TerminationCause::None);
            apply_remote_sdp(leg, response, media_pool).await;
            return ResponseOutcome::Continue;
        }
        return ResponseOutcome::Continue;
    }

    if status.is_success() {
        apply_remote_sdp(leg, response, media_pool).await;
        fire_transition(leg, LegState::Answered, TerminationCause::None);
        return ResponseOutcome::Answered;
    }

    let code = status.0;
    let reason = if response.reason.is_empty() {
        status.default_reason().to_string()
    } else {
        response.reason.clone()
    };
    leg.lock().final_status = Some((status, reason.clone()));
    fire_transition(leg, LegState::Failed, TerminationCause::Rejected);
    ResponseOutcome::Rejected { code, reason }
}

fn fire_transition(leg: &LegHandle, to: LegState, cause: TerminationCause) {
    let effects = leg.lock().transition(to, cause);
    if let Some(effects) = effects {
        effects.fire();
    }
}

/// Parses a 183/2xx response body as SDP (if present), records the remote
/// RTP endpoint and selected codec on the leg, and informs the media plane.
async fn apply_remote_sdp(leg: &LegHandle, response: &Response, media_pool: &Arc<MediaPool>) {
    if response.body.is_empty() {
        return;
    }
    let sdp = match SdpBody::parse(&response.body) {
        Ok(sdp) => sdp,
        Err(e) => {
            warn!(error = %e, "failed to parse SDP in outbound leg response");
            return;
        }
    };
    let Some(port) = sdp.audio_port() else {
        return;
    };
    let remote_addr: std::net::IpAddr = sdp.connection_addr.into();
    let codec = sdp.audio_codecs().into_iter().next();

    let session_id = {
        let mut guard = leg.lock();
        guard.remote_addr = Some(SocketAddr::new(remote_addr, port));
        guard.codec = codec.clone();
        guard.session_id
    };

    if let Some(session_id) = session_id {
        if let Err(e) = media_pool.update_session_remote(session_id, remote_addr, port).await {
            warn!(error = %e, "failed to update media session's remote endpoint");
        }
    }
}

fn build_ack(invite: &Request, final_response: &Response) -> Request {
    let request_uri = final_response
        .contact()
        .and_then(|c| c.ok())
        .map(|c| c.uri)
        .unwrap_or_else(|| invite.request_uri.clone());

    let mut ack = Request::new(Method::Ack, request_uri);
    if let Some(via) = invite.headers.get(&HeaderName::Via) {
        ack.headers.push(HeaderName::Via, via.to_string());
    }
    if let Some(from) = invite.headers.get(&HeaderName::From) {
        ack.headers.push(HeaderName::From, from.to_string());
    }
    if let Some(to) = final_response.headers.get(&HeaderName::To) {
        ack.headers.push(HeaderName::To, to.to_string());
    }
    if let Some(call_id) = invite.headers.get(&HeaderName::CallId) {
        ack.headers.push(HeaderName::CallId, call_id.to_string());
    }
    if let Some((seq, _)) = invite.cseq() {
        ack.headers.push(HeaderName::CSeq, format!("{} ACK", seq));
    }
    ack.headers.push(HeaderName::MaxForwards, "70".to_string());
    ack
}

/// Destination for the ACK: the response's transport source, falling back to
/// Via `received`/`rport`, then the original Request-URI host/port.
fn ack_destination(response: &Response, transport_source: SocketAddr, fallback_uri: &Uri) -> SocketAddr {
    if transport_source.port() != 0 {
        return transport_source;
    }
    if let Some(Ok(via)) = response.top_via() {
        if let (Some(received), Some(rport)) = (via.received, via.rport) {
            if let Ok(ip) = received.parse() {
                return SocketAddr::new(ip, rport);
            }
        }
    }
    destination_for_uri(fallback_uri)
}


async fn send_cancel_best_effort(invite: &Request, destination: SocketAddr, transport: &Arc<dyn Transport>) {
    let mut cancel = Request::new(Method::Cancel, invite.request_uri.clone());
    if let Some(via) = invite.headers.get(&HeaderName::Via) {
        cancel.headers.push(HeaderName::Via, via.to_string());
    }
    if let Some(from) = invite.headers.get(&HeaderName::From) {
        cancel.headers.push(HeaderName::From, from.to_string());
    }
    if let Some(to) = invite.headers.get(&HeaderName::To) {
        cancel.headers.push(HeaderName::To, to.to_string());
    }
    if let Some(call_id) = invite.headers.get(&HeaderName::CallId) {
        cancel.headers.push(HeaderName::CallId, call_id.to_string());
    }
    if let Some((seq, _)) = invite.cseq() {
        cancel.headers.push(HeaderName::CSeq, format!("{} CANCEL", seq));
    }
    cancel.headers.push(HeaderName::MaxForwards, "70".to_string());

    if let Err(e) = transport.send_request(&cancel, destination).await {
        warn!(error = %e, "failed to send CANCEL on outbound leg");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use switchboard_media::{
        CreateSessionRequest, DestroyReason as MediaDestroyReason, MediaNodeClient, MediaNodeId, MediaPool,
        MediaPoolConfig, SessionHandle, SessionId,
    };
    use switchboard_transport::TransportResult;

    /// Records every request sent, so a test can read back the generated
    /// wire Call-ID of the INVITE `originate()` built and reply to it
    /// through the same `ResponseRouter` instance.
    #[derive(Default)]
    struct MockTransport {
        sent: parking_lot::Mutex<Vec<Request>>,
    }

    impl MockTransport {
        fn last_call_id(&self) -> Option<String> {
            self.sent.lock().last().and_then(|r| r.call_id()).map(|s| s.to_string())
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send_request(&self, request: &Request, _destination: SocketAddr) -> TransportResult<()> {
            self.sent.lock().push(request.clone());
            Ok(())
        }
        async fn send_response(&self, _response: &Response, _destination: SocketAddr) -> TransportResult<()> {
            Ok(())
        }
        fn local_addr(&self) -> TransportResult<SocketAddr> {
            Ok("127.0.0.1:5060".parse().unwrap())
        }
        async fn close(&self) -> TransportResult<()> {
            Ok(())
        }
    }

    struct MockMediaNode;

    #[async_trait::async_trait]
    impl MediaNodeClient for MockMediaNode {
        async fn create_session(
            &self,
            _request: CreateSessionRequest,
        ) -> switchboard_media::MediaResult<SessionHandle> {
            unreachable!("outbound legs only use create_session_pending_remote")
        }

        async fn create_session_pending_remote(
            &self,
            _call_id: &str,
            _offered_codecs: &[Codec],
        ) -> switchboard_media::MediaResult<SessionHandle> {
            Ok(SessionHandle {
                session_id: SessionId::new(),
                local_addr: Ipv4Addr::LOCALHOST.into(),
                local_port: 30000,
                sdp_body: b"v=0\r\n".to_vec(),
                selected_codec: Codec::pcmu(),
            })
        }

        async fn update_session_remote(
            &self,
            _session_id: SessionId,
            _addr: std::net::IpAddr,
            _port: u16,
        ) -> switchboard_media::MediaResult<()> {
            Ok(())
        }

        async fn destroy_session(
            &self,
            _session_id: SessionId,
            _reason: MediaDestroyReason,
        ) -> switchboard_media::MediaResult<()> {
            Ok(())
        }

        async fn play_audio(
            &self,
            _session_id: SessionId,
            _audio_file: &str,
            _loop_playback: bool,
        ) -> switchboard_media::MediaResult<tokio::sync::mpsc::Receiver<switchboard_media::PlayAudioEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn stop_audio(&self, _session_id: SessionId) -> switchboard_media::MediaResult<()> {
            Ok(())
        }

        async fn bridge_media(
            &self,
            _a: SessionId,
            _b: SessionId,
        ) -> switchboard_media::MediaResult<switchboard_media::BridgeHandleId> {
            Ok(switchboard_media::BridgeHandleId::new())
        }

        async fn unbridge_media(&self, _bridge_id: switchboard_media::BridgeHandleId) -> switchboard_media::MediaResult<()> {
            Ok(())
        }

        async fn health(&self) -> switchboard_media::MediaResult<()> {
            Ok(())
        }
    }

    async fn media_pool() -> Arc<MediaPool> {
        let members: Vec<(MediaNodeId, Arc<dyn MediaNodeClient>)> =
            vec![(MediaNodeId("only".to_string()), Arc::new(MockMediaNode))];
        MediaPool::new(members, MediaPoolConfig::default()).await.unwrap()
    }

    fn params(timeout: Duration) -> DialParams {
        DialParams {
            contact: Uri::parse("sip:1001@127.0.0.1:5062").unwrap(),
            local_identity: Uri::parse("sip:switchboard@127.0.0.1").unwrap(),
            caller_name: Some("Alice".to_string()),
            advertise_addr: "127.0.0.1:5060".parse().unwrap(),
            offered_codecs: vec![Codec::pcmu()],
            timeout,
        }
    }

    fn sdp_body() -> Vec<u8> {
        b"v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio 40000 RTP/AVP 0\r\n".to_vec()
    }

    fn response(call_id: &str, status: StatusCode, with_sdp: bool) -> Response {
        let mut response = Response::from_status(status);
        response.headers.push(HeaderName::CallId, call_id.to_string());
        response
            .headers
            .push(HeaderName::To, "<sip:1001@127.0.0.1:5062>;tag=remote-tag".to_string());
        if with_sdp {
            response = response.with_body("application/sdp", sdp_body());
        }
        response
    }

    /// Waits for `originate()` to have sent its INVITE, then delivers
    /// `reply` through the same router it registered with, keyed off the
    /// INVITE's own generated wire Call-ID.
    async fn deliver_once_invite_sent(
        transport: &Arc<MockTransport>,
        router: &Arc<ResponseRouter>,
        status: StatusCode,
        with_sdp: bool,
    ) {
        let call_id = loop {
            if let Some(id) = transport.last_call_id() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        };
        let source: SocketAddr = "127.0.0.1:5062".parse().unwrap();
        router.route(&response(&call_id, status, with_sdp), source);
    }

    #[tokio::test]
    async fn originate_succeeds_on_2xx_and_sends_ack() {
        let transport = Arc::new(MockTransport::default());
        let media_pool = media_pool().await;
        let router = Arc::new(ResponseRouter::new());
        let parent_cancel = tokio_util::sync::CancellationToken::new();

        let responder_transport = transport.clone();
        let responder_router = router.clone();
        let responder = tokio::spawn(async move {
            deliver_once_invite_sent(&responder_transport, &responder_router, StatusCode::OK, true).await;
        });

        let leg = originate(
            "corr-1".to_string(),
            params(Duration::from_secs(5)),
            transport.clone() as Arc<dyn Transport>,
            media_pool,
            router,
            parent_cancel,
        )
        .await
        .expect("originate should succeed on 2xx");
        responder.await.unwrap();

        assert_eq!(leg.lock().state, LegState::Answered);
        assert!(leg.lock().dialog_ctx.is_some());

        // An ACK must have followed the INVITE as a second, separate request.
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, Method::Invite);
        assert_eq!(sent[1].method, Method::Ack);
    }

    #[tokio::test]
    async fn originate_fails_with_dial_rejected_on_4xx() {
        let transport = Arc::new(MockTransport::default());
        let media_pool = media_pool().await;
        let router = Arc::new(ResponseRouter::new());
        let parent_cancel = tokio_util::sync::CancellationToken::new();

        let responder_transport = transport.clone();
        let responder_router = router.clone();
        let responder = tokio::spawn(async move {
            deliver_once_invite_sent(&responder_transport, &responder_router, StatusCode::BUSY_HERE, false).await;
        });

        let err = originate(
            "corr-2".to_string(),
            params(Duration::from_secs(5)),
            transport.clone() as Arc<dyn Transport>,
            media_pool,
            router,
            parent_cancel,
        )
        .await
        .expect_err("4xx must reject the dial");
        responder.await.unwrap();

        match err {
            B2buaError::DialRejected { code, .. } => assert_eq!(code, 486),
            other => panic!("expected DialRejected, got {other:?}"),
        }
        // No ACK is sent for a non-2xx final response.
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn originate_times_out_and_sends_cancel() {
        let transport = Arc::new(MockTransport::default());
        let media_pool = media_pool().await;
        let router = Arc::new(ResponseRouter::new());
        let parent_cancel = tokio_util::sync::CancellationToken::new();

        let result = originate(
            "corr-3".to_string(),
            params(Duration::from_millis(50)),
            transport.clone() as Arc<dyn Transport>,
            media_pool,
            router,
            parent_cancel,
        )
        .await;

        assert!(matches!(result, Err(B2buaError::DialTimeout)));
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].method, Method::Invite);
        assert_eq!(sent[1].method, Method::Cancel);
    }

    #[tokio::test]
    async fn originate_cancels_on_parent_token() {
        let transport = Arc::new(MockTransport::default());
        let media_pool = media_pool().await;
        let router = Arc::new(ResponseRouter::new());
        let parent_cancel = tokio_util::sync::CancellationToken::new();

        let cancel_trigger = parent_cancel.clone();
        let responder_transport = transport.clone();
        let canceller = tokio::spawn(async move {
            loop {
                if responder_transport.last_call_id().is_some() {
                    cancel_trigger.cancel();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        let result = originate(
            "corr-4".to_string(),
            params(Duration::from_secs(30)),
            transport.clone() as Arc<dyn Transport>,
            media_pool,
            router,
            parent_cancel,
        )
        .await;
        canceller.await.unwrap();

        assert!(matches!(result, Err(B2buaError::DialCanceled)));
        let sent = transport.sent.lock();
        assert_eq!(sent[1].method, Method::Cancel);
    }
}
