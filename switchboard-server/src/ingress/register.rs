use std::net::SocketAddr;

use tracing::{info, warn};

use switchboard_location::{BindingSource, LocationError, RegisterBinding, TransportKind};
use switchboard_sip::{AddressHeader, HeaderName, Request, Response, StatusCode};

use crate::context::ServerContext;

/// Handles a REGISTER: parses the AOR/Contact/Expires. A wildcard Contact
/// (`Contact: *`) or no Contact at all unregisters every binding for the AOR
/// (zero-contact REGISTER is a wildcard unregister, not a capability query);
/// otherwise registers or refreshes one binding. Responds 200 with the
/// caller's current bindings' `Contact`/`Expires`, 423 with `Min-Expires` if
/// the requested interval is below the floor, or 400 on a malformed request.
pub async fn handle_register(ctx: &ServerContext, request: Request, source: SocketAddr) -> Response {
    let Some(call_id) = request.call_id().map(|s| s.to_string()) else {
        return bad_request(&request, "missing Call-ID");
    };
    let Some((cseq, _)) = request.cseq() else {
        return bad_request(&request, "missing CSeq");
    };
    let Some(Ok(to)) = request.to_header() else {
        return bad_request(&request, "missing or malformed To");
    };
    let aor = to.uri.to_string();

    let contact_raw = request.headers.get(&HeaderName::Contact);
    let expires = request
        .headers
        .get(&HeaderName::Expires)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(3600);

    let wildcard = contact_raw.map(|c| c.trim() == "*").unwrap_or(false);
    if wildcard {
        match ctx.location_store.unregister(&aor, "", true) {
            Ok(()) => {
                info!(aor, "wildcard unregister via REGISTER");
                return ok_response(&request, &[]);
            }
            Err(e) => {
                warn!(aor, error = %e, "wildcard unregister failed");
                return internal_error(&request);
            }
        }
    }

    let Some(contact_raw) = contact_raw else {
        // No Contact at all is also a wildcard unregister, not a capability query.
        return match ctx.location_store.unregister(&aor, "", true) {
            Ok(()) => {
                info!(aor, "zero-contact unregister via REGISTER");
                ok_response(&request, &[])
            }
            Err(e) => {
                warn!(aor, error = %e, "zero-contact unregister failed");
                internal_error(&request)
            }
        };
    };

    let contact_uri = match AddressHeader::parse(contact_raw) {
        Ok(addr) => addr.uri,
        Err(e) => return bad_request(&request, &format!("malformed Contact: {}", e)),
    };

    let user_agent = request.headers.get(&HeaderName::UserAgent).map(|s| s.to_string());

    let input = RegisterBinding {
        aor: aor.clone(),
        contact_uri,
        received_ip: Some(source.ip().to_string()),
        received_port: Some(source.port()),
        transport: TransportKind::Udp,
        path: Vec::new(),
        instance_id: None,
        q_value: None,
        expires_seconds: expires,
        call_id,
        cseq,
        user_agent,
        source: BindingSource::Sip,
    };

    match ctx.location_store.register(input) {
        Ok(binding) => {
            info!(aor, contact = %binding.effective_contact(), "registered");
            ok_response(&request, &[binding.effective_contact().to_string()])
        }
        Err(LocationError::IntervalTooBrief { min }) => {
            let mut response = Response::from_status(StatusCode::INTERVAL_TOO_BRIEF);
            copy_dialog_headers(&request, &mut response);
            response.headers.push(HeaderName::MinExpires, min.to_string());
            response
        }
        Err(LocationError::StaleCSeq { .. }) => bad_request(&request, "stale CSeq"),
        Err(e) => {
            warn!(aor, error = %e, "registration failed");
            internal_error(&request)
        }
    }
}

fn copy_dialog_headers(request: &Request, response: &mut Response) {
    for via in request.headers.get_all(&HeaderName::Via) {
        response.headers.push(HeaderName::Via, via.to_string());
    }
    if let Some(from) = request.headers.get(&HeaderName::From) {
        response.headers.push(HeaderName::From, from.to_string());
    }
    if let Some(to) = request.headers.get(&HeaderName::To) {
        response.headers.push(HeaderName::To, to.to_string());
    }
    if let Some(call_id) = request.headers.get(&HeaderName::CallId) {
        response.headers.push(HeaderName::CallId, call_id.to_string());
    }
    if let Some(cseq) = request.headers.get(&HeaderName::CSeq) {
        response.headers.push(HeaderName::CSeq, cseq.to_string());
    }
}

fn ok_response(request: &Request, contacts: &[String]) -> Response {
    let mut response = Response::from_status(StatusCode::OK);
    copy_dialog_headers(request, &mut response);
    for contact in contacts {
        response.headers.push(HeaderName::Contact, contact.clone());
    }
    response
}

fn bad_request(request: &Request, detail: &str) -> Response {
    warn!(detail, "rejecting malformed REGISTER");
    let mut response = Response::from_status(StatusCode::BAD_REQUEST);
    copy_dialog_headers(request, &mut response);
    response
}

fn internal_error(request: &Request) -> Response {
    let mut response = Response::from_status(StatusCode::SERVER_INTERNAL_ERROR);
    copy_dialog_headers(request, &mut response);
    response
}
