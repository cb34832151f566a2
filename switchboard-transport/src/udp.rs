use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use switchboard_sip::{Request, Response};

use crate::error::{TransportError, TransportResult};
use crate::{IncomingMessage, Transport};

const MAX_DATAGRAM_SIZE: usize = 65_507;

/// A UDP socket bound once and shared between the send path and a background
/// receive loop that decodes datagrams and forwards them on a channel.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Bind a UDP socket at `addr` and spawn its receive loop, returning the
    /// transport handle and the channel incoming messages arrive on.
    pub async fn bind(addr: SocketAddr) -> TransportResult<(Arc<UdpTransport>, mpsc::Receiver<IncomingMessage>)> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let (tx, rx) = mpsc::channel(1024);

        let transport = Arc::new(UdpTransport {
            socket: socket.clone(),
            local_addr,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(receive_loop(socket, tx));

        Ok((transport, rx))
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, tx: mpsc::Sender<IncomingMessage>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!("UDP receive error: {}", e);
                continue;
            }
        };

        let data = &buf[..len];
        // Distinguish request vs. response by the first line without fully
        // parsing twice: responses start with "SIP/2.0".
        let is_response = data.starts_with(b"SIP/2.0");
        let decoded = if is_response {
            Response::parse(data).map(|response| IncomingMessage::Response { response, source })
        } else {
            Request::parse(data).map(|request| IncomingMessage::Request { request, source })
        };

        match decoded {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    debug!("UDP transport receive channel closed, stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                trace!("discarding malformed datagram from {}: {}", source, e);
            }
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_request(&self, request: &Request, destination: SocketAddr) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let bytes = request.encode();
        self.socket.send_to(&bytes, destination).await?;
        Ok(())
    }

    async fn send_response(&self, response: &Response, destination: SocketAddr) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let bytes = response.encode();
        self.socket.send_to(&bytes, destination).await?;
        Ok(())
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_sip::{Method, StatusCode, Uri};

    #[tokio::test]
    async fn sends_and_receives_a_request() {
        let (server, mut server_rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let (client, _client_rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let req = Request::new(Method::Invite, Uri::parse("sip:1000@proxy").unwrap());
        client
            .send_request(&req, server.local_addr().unwrap())
            .await
            .unwrap();

        let incoming = server_rx.recv().await.unwrap();
        match incoming {
            IncomingMessage::Request { request, .. } => assert_eq!(request.method, Method::Invite),
            _ => panic!("expected a request"),
        }
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends() {
        let (transport, _rx) = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        transport.close().await.unwrap();
        let resp = Response::from_status(StatusCode::OK);
        let result = transport.send_response(&resp, transport.local_addr().unwrap()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
