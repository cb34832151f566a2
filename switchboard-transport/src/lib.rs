//! UDP transport for the signaling core.
//!
//! The SIP parsing/transaction library below the core is treated as an
//! external collaborator; this crate is the thin slice of that collaborator
//! the core actually needs to send bytes on the wire and learn about
//! incoming datagrams. It does not retransmit, does not track transactions,
//! and does not know what a dialog is — all of that lives in
//! `switchboard-dialog`.

mod error;
mod udp;

pub use error::{TransportError, TransportResult};
pub use udp::UdpTransport;

use std::net::SocketAddr;

use async_trait::async_trait;
use switchboard_sip::{Request, Response};

/// A decoded datagram tagged with the address it arrived from.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request { request: Request, source: SocketAddr },
    Response { response: Response, source: SocketAddr },
}

/// The narrow interface the signaling core depends on to move bytes: send a
/// message to a destination, report the local bound address, close cleanly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_request(&self, request: &Request, destination: SocketAddr) -> TransportResult<()>;
    async fn send_response(&self, response: &Response, destination: SocketAddr) -> TransportResult<()>;
    fn local_addr(&self) -> TransportResult<SocketAddr>;
    async fn close(&self) -> TransportResult<()>;
}
