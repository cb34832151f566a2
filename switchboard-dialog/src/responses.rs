//! Builds the responses and follow-up requests the dialog manager sends in
//! reaction to an inbound INVITE/BYE/CANCEL, following RFC 3261's header-copy
//! rules for in-dialog messages.

use switchboard_sip::{HeaderName, Method, Request, StatusCode, Response};

/// A response to `request` that copies `Via`/`From`/`To`/`Call-ID`/`CSeq`
/// and, if given, sets the `To` tag (used once, on the final response that
/// confirms the dialog).
pub fn build_response(request: &Request, status: StatusCode, to_tag: Option<&str>) -> Response {
    let mut response = Response::from_status(status);
    for via in request.headers.get_all(&HeaderName::Via) {
        response.headers.push(HeaderName::Via, via.clone());
    }
    if let Some(from) = request.headers.get(&HeaderName::From) {
        response.headers.push(HeaderName::From, from.to_string());
    }
    if let Some(to) = request.headers.get(&HeaderName::To) {
        let to_line = match to_tag {
            Some(tag) if !to.contains("tag=") => format!("{};tag={}", to, tag),
            _ => to.to_string(),
        };
        response.headers.push(HeaderName::To, to_line);
    }
    if let Some(call_id) = request.headers.get(&HeaderName::CallId) {
        response.headers.push(HeaderName::CallId, call_id.to_string());
    }
    if let Some(cseq) = request.headers.get(&HeaderName::CSeq) {
        response.headers.push(HeaderName::CSeq, cseq.to_string());
    }
    response
}

/// Builds the ACK a UAC sends after receiving a 2xx to its own INVITE, or
/// (for the reverse direction, a UAS resending to itself is never needed
/// since dialog-core only originates ACKs toward the far end) — shared by
/// the B2BUA's outbound-leg origination in `switchboard-b2bua`.
pub fn build_ack_for_final_response(invite: &Request, final_response: &Response) -> Request {
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

/// Builds a CANCEL for an in-flight INVITE: same `Via/From/To/Call-ID`, CSeq
/// number with method CANCEL.
pub fn build_cancel(invite: &Request) -> Request {
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
    cancel
}

/// Builds a BYE for a confirmed dialog we are hanging up locally: `From`
/// becomes our side (the original `To`, now carrying the local tag), `To`
/// becomes the remote side (the original `From`).
pub fn build_bye(invite: &Request, local_tag: &str, remote_tag: Option<&str>, cseq: u32) -> Request {
    let request_uri = invite.request_uri.clone();
    let mut bye = Request::new(Method::Bye, request_uri);

    if let Some(call_id) = invite.headers.get(&HeaderName::CallId) {
        bye.headers.push(HeaderName::CallId, call_id.to_string());
    }
    if let Some(to) = invite.headers.get(&HeaderName::To) {
        let from_line = if to.contains("tag=") {
            to.to_string()
        } else {
            format!("{};tag={}", to, local_tag)
        };
        bye.headers.push(HeaderName::From, from_line);
    }
    if let Some(from) = invite.headers.get(&HeaderName::From) {
        let to_line = match remote_tag {
            Some(tag) if !from.contains("tag=") => format!("{};tag={}", from, tag),
            _ => from.to_string(),
        };
        bye.headers.push(HeaderName::To, to_line);
    }
    bye.headers.push(HeaderName::CSeq, format!("{} BYE", cseq));
    bye.headers.push(HeaderName::MaxForwards, "70".to_string());
    bye
}
