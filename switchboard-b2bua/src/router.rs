use std::net::SocketAddr;

use dashmap::DashMap;
use switchboard_sip::Response;
use tokio::sync::mpsc;

/// A response together with the transport source it actually arrived from,
/// used to compute the ACK destination per the symmetric-routing rule.
pub type RoutedResponse = (Response, SocketAddr);

/// Matches inbound SIP responses to the outbound INVITE transaction that is
/// waiting on them. The ingress layer owns the transport's incoming-datagram
/// loop and, on a `Response`, looks up its Call-ID here and forwards it; this
/// crate never reads the socket directly.
#[derive(Default)]
pub struct ResponseRouter {
    waiters: DashMap<String, mpsc::Sender<RoutedResponse>>,
}

impl ResponseRouter {
    pub fn new() -> Self {
        Self {
            waiters: DashMap::new(),
        }
    }

    /// Registers interest in responses for `call_id`; panics-free re-register
    /// simply replaces the previous sender (only one in-flight transaction per
    /// Call-ID is ever expected from this engine).
    pub fn register(&self, call_id: String) -> mpsc::Receiver<RoutedResponse> {
        let (tx, rx) = mpsc::channel(8);
        self.waiters.insert(call_id, tx);
        rx
    }

    pub fn deregister(&self, call_id: &str) {
        self.waiters.remove(call_id);
    }

    /// Routes a response to its waiter, if any is currently registered.
    /// Returns `false` if nothing was listening (stray or late retransmission).
    pub fn route(&self, response: &Response, source: SocketAddr) -> bool {
        let Some(call_id) = response.call_id() else {
            return false;
        };
        match self.waiters.get(call_id) {
            Some(sender) => sender.try_send((response.clone(), source)).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_sip::{HeaderName, StatusCode};

    fn response_for(call_id: &str, status: StatusCode) -> Response {
        let mut response = Response::from_status(status);
        response.headers.push(HeaderName::CallId, call_id.to_string());
        response
    }

    #[tokio::test]
    async fn routes_a_response_to_its_registered_waiter() {
        let router = ResponseRouter::new();
        let mut rx = router.register("call-1".to_string());

        let source: SocketAddr = "127.0.0.1:5060".parse().unwrap();
        let delivered = router.route(&response_for("call-1", StatusCode::OK), source);
        assert!(delivered);

        let (got, got_source) = rx.recv().await.unwrap();
        assert_eq!(got.status, StatusCode::OK);
        assert_eq!(got_source, source);
    }

    #[tokio::test]
    async fn routing_to_an_unregistered_call_id_is_a_no_op() {
        let router = ResponseRouter::new();
        let source: SocketAddr = "127.0.0.1:5060".parse().unwrap();
        let delivered = router.route(&response_for("stray-call", StatusCode::RINGING), source);
        assert!(!delivered);
    }

    #[tokio::test]
    async fn deregister_stops_further_delivery() {
        let router = ResponseRouter::new();
        let _rx = router.register("call-2".to_string());
        router.deregister("call-2");

        let source: SocketAddr = "127.0.0.1:5060".parse().unwrap();
        let delivered = router.route(&response_for("call-2", StatusCode::TRYING), source);
        assert!(!delivered);
    }

    #[tokio::test]
    async fn response_with_no_call_id_header_is_never_routed() {
        let router = ResponseRouter::new();
        let _rx = router.register("call-3".to_string());
        let response = Response::from_status(StatusCode::OK);
        let source: SocketAddr = "127.0.0.1:5060".parse().unwrap();
        assert!(!router.route(&response, source));
    }
}
