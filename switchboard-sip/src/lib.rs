//! Minimal SIP message, URI and SDP types.
//!
//! This crate is the SIP parsing layer below the signaling core: it knows
//! how to represent and serialize SIP requests, responses, URIs and
//! bare-bones SDP bodies, but it has no opinion about dialogs, transactions,
//! retransmission, or call state. That lives in `switchboard-dialog` and
//! `switchboard-b2bua`.

mod error;
mod header;
mod message;
mod method;
mod sdp;
mod status;
mod uri;

pub use error::{SipParseError, SipResult};
pub use header::{HeaderName, Headers};
pub use message::{AddressHeader, Request, Response, Via};
pub use method::Method;
pub use sdp::{Codec, MediaDescription, SdpBody};
pub use status::StatusCode;
pub use uri::Uri;
