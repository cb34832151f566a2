//! Request handlers for the ingress side of the signaling core: one module
//! per method class, driven from the transport's receive loop in `main.rs`.

mod dispatch;
mod invite;
mod register;

pub use dispatch::{handle_ack, handle_bye, handle_cancel, handle_response};
pub use invite::handle_invite;
pub use register::handle_register;

use switchboard_sip::Request;

/// The request-URI's user part, i.e. the dialed destination.
pub(crate) fn request_uri_user(request: &Request) -> String {
    request.request_uri.user.clone().unwrap_or_default()
}

/// The `From` header's user part, i.e. the caller identity.
pub(crate) fn from_user(request: &Request) -> String {
    request
        .from_header()
        .and_then(|h| h.ok())
        .and_then(|h| h.uri.user)
        .unwrap_or_default()
}
