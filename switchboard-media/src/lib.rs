//! Media-plane client (component C3): a control-channel abstraction over a
//! pool of external media nodes, with affinity, round-robin selection among
//! healthy members, and background health probing.

mod error;
mod node;
mod pool;
mod tcp_client;
mod types;

pub use error::{MediaError, MediaResult};
pub use node::MediaNodeClient;
pub use pool::{MediaNodeStatus, MediaPool, MediaPoolConfig};
pub use tcp_client::TcpMediaNodeClient;
pub use types::{
    BridgeHandleId, CreateSessionRequest, DestroyReason, DrainMode, MediaNodeId, PlayAudioEvent,
    SessionHandle, SessionId,
};
