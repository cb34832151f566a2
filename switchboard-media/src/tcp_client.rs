//! A concrete, JSON-over-TCP control channel to a single media node.
//!
//! The media control channel is a remote-procedure surface with an opaque
//! wire encoding; this is one reasonable choice: line-delimited JSON
//! request/response pairs correlated by a request id, with `play_audio`
//! streaming its status updates as further lines tagged with the same id
//! instead of a single reply.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::node::MediaNodeClient;
use crate::types::{
    BridgeHandleId, CreateSessionRequest, DestroyReason, PlayAudioEvent, SessionHandle, SessionId,
};
use switchboard_sip::Codec;

#[derive(Serialize)]
struct WireRequest<'a> {
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct WireReply {
    id: u64,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    /// Present only on `play_audio` stream updates: `started`, `progress`,
    /// `completed`, `stopped`, or `error`.
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    percent: Option<u8>,
}

/// JSON-over-TCP implementation of [`MediaNodeClient`].
pub struct TcpMediaNodeClient {
    node: String,
    writer: Mutex<OwnedWriteHalf>,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, oneshot::Sender<WireReply>>>,
    streams: Arc<DashMap<u64, mpsc::Sender<PlayAudioEvent>>>,
}

impl TcpMediaNodeClient {
    pub async fn connect(node: impl Into<String>, addr: SocketAddr) -> MediaResult<Arc<Self>> {
        let node = node.into();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| MediaError::ConnectionError {
                node: node.clone(),
                message: e.to_string(),
            })?;
        let (read_half, write_half) = stream.into_split();

        let pending = Arc::new(DashMap::new());
        let streams = Arc::new(DashMap::new());
        let client = Arc::new(TcpMediaNodeClient {
            node: node.clone(),
            writer: Mutex::new(write_half),
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            streams: streams.clone(),
        });

        tokio::spawn(read_loop(node, read_half, pending, streams));
        Ok(client)
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> MediaResult<WireReply> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = WireRequest { id, method, params };
        let mut line = serde_json::to_vec(&request).expect("request serializes");
        line.push(b'\n');

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(&line).await {
                self.pending.remove(&id);
                return Err(MediaError::ConnectionError {
                    node: self.node.clone(),
                    message: e.to_string(),
                });
            }
        }

        let reply = rx.await.map_err(|_| MediaError::ConnectionError {
            node: self.node.clone(),
            message: "connection closed awaiting reply".to_string(),
        })?;

        if let Some(message) = &reply.error {
            return Err(MediaError::NodeError {
                node: self.node.clone(),
                message: message.clone(),
            });
        }
        Ok(reply)
    }

    fn parse_session_handle(&self, reply: &WireReply) -> MediaResult<SessionHandle> {
        let result = reply
            .result
            .as_ref()
            .ok_or_else(|| MediaError::NodeError {
                node: self.node.clone(),
                message: "missing result".to_string(),
            })?;
        serde_json::from_value::<WireSessionHandle>(result.clone())
            .map(Into::into)
            .map_err(|e| MediaError::NodeError {
                node: self.node.clone(),
                message: e.to_string(),
            })
    }
}

#[derive(Deserialize)]
struct WireSessionHandle {
    session_id: uuid::Uuid,
    local_addr: IpAddr,
    local_port: u16,
    sdp_body: String,
    selected_codec_payload_type: u8,
    selected_codec_name: String,
    selected_codec_clock_rate: u32,
}

impl From<WireSessionHandle> for SessionHandle {
    fn from(w: WireSessionHandle) -> Self {
        SessionHandle {
            session_id: SessionId(w.session_id),
            local_addr: w.local_addr,
            local_port: w.local_port,
            sdp_body: w.sdp_body.into_bytes(),
            selected_codec: Codec {
                payload_type: w.selected_codec_payload_type,
                name: w.selected_codec_name,
                clock_rate: w.selected_codec_clock_rate,
            },
        }
    }
}

async fn read_loop(
    node: String,
    read_half: tokio::net::tcp::OwnedReadHalf,
    pending: Arc<DashMap<u64, oneshot::Sender<WireReply>>>,
    streams: Arc<DashMap<u64, mpsc::Sender<PlayAudioEvent>>>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(node, "media node connection closed");
                break;
            }
            Err(e) => {
                warn!(node, error = %e, "media node read error");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        let reply: WireReply = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(node, error = %e, "malformed media node reply");
                continue;
            }
        };

        if let Some(event) = &reply.event {
            if let Some(sender) = streams.get(&reply.id) {
                let audio_event = match event.as_str() {
                    "started" => PlayAudioEvent::Started,
                    "progress" => PlayAudioEvent::Progress {
                        percent: reply.percent.unwrap_or(0),
                    },
                    "completed" => PlayAudioEvent::Completed,
                    "stopped" => PlayAudioEvent::Stopped,
                    _ => PlayAudioEvent::Error {
                        message: reply.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                    },
                };
                let terminal = audio_event.is_terminal();
                let _ = sender.send(audio_event).await;
                if terminal {
                    drop(sender);
                    streams.remove(&reply.id);
                }
            }
            continue;
        }

        if let Some((_, sender)) = pending.remove(&reply.id) {
            let _ = sender.send(reply);
        }
    }
}

#[async_trait::async_trait]
impl MediaNodeClient for TcpMediaNodeClient {
    async fn create_session(&self, request: CreateSessionRequest) -> MediaResult<SessionHandle> {
        let params = serde_json::json!({
            "call_id": request.call_id,
            "remote_addr": request.remote_addr,
            "remote_port": request.remote_port,
            "offered_codecs": request.offered_codecs.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        });
        let reply = self.call("create_session", params).await?;
        self.parse_session_handle(&reply)
    }

    async fn create_session_pending_remote(
        &self,
        call_id: &str,
        offered_codecs: &[Codec],
    ) -> MediaResult<SessionHandle> {
        let params = serde_json::json!({
            "call_id": call_id,
            "offered_codecs": offered_codecs.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        });
        let reply = self.call("create_session_pending_remote", params).await?;
        self.parse_session_handle(&reply)
    }

    async fn update_session_remote(
        &self,
        session_id: SessionId,
        addr: IpAddr,
        port: u16,
    ) -> MediaResult<()> {
        let params = serde_json::json!({
            "session_id": session_id.0,
            "addr": addr,
            "port": port,
        });
        self.call("update_session_remote", params).await?;
        Ok(())
    }

    async fn destroy_session(&self, session_id: SessionId, reason: DestroyReason) -> MediaResult<()> {
        let params = serde_json::json!({
            "session_id": session_id.0,
            "reason": reason.to_string(),
        });
        self.call("destroy_session", params).await?;
        Ok(())
    }

    async fn play_audio(
        &self,
        session_id: SessionId,
        audio_file: &str,
        loop_playback: bool,
    ) -> MediaResult<mpsc::Receiver<PlayAudioEvent>> {
        let id = self.next_request_id();
        let (tx, rx) = mpsc::channel(16);
        self.streams.insert(id, tx);

        let request = WireRequest {
            id,
            method: "play_audio",
            params: serde_json::json!({
                "session_id": session_id.0,
                "audio_file": audio_file,
                "loop": loop_playback,
            }),
        };
        let mut line = serde_json::to_vec(&request).expect("request serializes");
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(&line).await {
            self.streams.remove(&id);
            return Err(MediaError::ConnectionError {
                node: self.node.clone(),
                message: e.to_string(),
            });
        }
        drop(writer);

        Ok(rx)
    }

    async fn stop_audio(&self, session_id: SessionId) -> MediaResult<()> {
        let params = serde_json::json!({ "session_id": session_id.0 });
        self.call("stop_audio", params).await?;
        Ok(())
    }

    async fn bridge_media(&self, session_a: SessionId, session_b: SessionId) -> MediaResult<BridgeHandleId> {
        let params = serde_json::json!({
            "session_a": session_a.0,
            "session_b": session_b.0,
        });
        let reply = self.call("bridge_media", params).await?;
        let result = reply.result.ok_or_else(|| MediaError::NodeError {
            node: self.node.clone(),
            message: "missing result".to_string(),
        })?;
        let bridge_id: uuid::Uuid = serde_json::from_value(result["bridge_id"].clone())
            .map_err(|e| MediaError::NodeError {
                node: self.node.clone(),
                message: e.to_string(),
            })?;
        Ok(BridgeHandleId(bridge_id))
    }

    async fn unbridge_media(&self, bridge_id: BridgeHandleId) -> MediaResult<()> {
        let params = serde_json::json!({ "bridge_id": bridge_id.0 });
        self.call("unbridge_media", params).await?;
        Ok(())
    }

    async fn health(&self) -> MediaResult<()> {
        self.call("health", serde_json::json!({})).await?;
        Ok(())
    }
}
