use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised by the media-plane client and its pool.
#[derive(Error, Debug, Clone)]
pub enum MediaError {
    /// No pool member is currently healthy; `create_session` cannot proceed.
    #[error("no healthy media nodes available")]
    NoHealthyManagers,

    /// An operation named a `session_id` with no affinity entry — either it
    /// was never created here, or it was already destroyed.
    #[error("no media node owns session {0}")]
    NoManagerForSession(String),

    /// An operation named a `media_bridge_id` with no affinity entry.
    #[error("no media node owns bridge {0}")]
    NoManagerForBridge(String),

    /// The remote media node reported a failure for an otherwise
    /// well-formed request.
    #[error("media node {node} reported an error: {message}")]
    NodeError { node: String, message: String },

    /// Transport-level failure talking to a media node.
    #[error("media node {node} connection error: {message}")]
    ConnectionError { node: String, message: String },
}
