use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MediaResult;
use crate::types::{
    BridgeHandleId, CreateSessionRequest, DestroyReason, PlayAudioEvent, SessionHandle, SessionId,
};
use switchboard_sip::Codec;

/// The control-channel contract the core consumes from a single media node.
/// The wire encoding is opaque to the core; this crate ships one concrete
/// implementation (`TcpMediaNodeClient`) and callers may supply any other.
#[async_trait]
pub trait MediaNodeClient: Send + Sync {
    async fn create_session(&self, request: CreateSessionRequest) -> MediaResult<SessionHandle>;

    async fn create_session_pending_remote(
        &self,
        call_id: &str,
        offered_codecs: &[Codec],
    ) -> MediaResult<SessionHandle>;

    async fn update_session_remote(
        &self,
        session_id: SessionId,
        addr: IpAddr,
        port: u16,
    ) -> MediaResult<()>;

    async fn destroy_session(&self, session_id: SessionId, reason: DestroyReason) -> MediaResult<()>;

    async fn play_audio(
        &self,
        session_id: SessionId,
        audio_file: &str,
        loop_playback: bool,
    ) -> MediaResult<mpsc::Receiver<PlayAudioEvent>>;

    async fn stop_audio(&self, session_id: SessionId) -> MediaResult<()>;

    async fn bridge_media(&self, session_a: SessionId, session_b: SessionId) -> MediaResult<BridgeHandleId>;

    async fn unbridge_media(&self, bridge_id: BridgeHandleId) -> MediaResult<()>;

    /// Readiness probe used by the pool's background health checker.
    async fn health(&self) -> MediaResult<()>;
}
