use thiserror::Error;

pub type B2buaResult<T> = Result<T, B2buaError>;

/// Errors raised by Leg/Bridge lifecycle operations.
#[derive(Error, Debug, Clone)]
pub enum B2buaError {
    #[error("leg {0} is not answered")]
    LegNotAnswered(String),

    #[error("leg {0} is already terminated")]
    LegTerminated(String),

    #[error("bridge {0} is already active")]
    BridgeActive(String),

    #[error("bridge {0} is already terminated")]
    BridgeTerminated(String),

    #[error("invalid state transition for {entity}: {from} -> {to}")]
    InvalidState {
        entity: String,
        from: String,
        to: String,
    },

    #[error("media allocation failed: {0}")]
    MediaSetupFailed(String),

    #[error("dial timed out")]
    DialTimeout,

    #[error("dial canceled")]
    DialCanceled,

    #[error("dial rejected: {code} {reason}")]
    DialRejected { code: u16, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<switchboard_media::MediaError> for B2buaError {
    fn from(e: switchboard_media::MediaError) -> Self {
        B2buaError::MediaSetupFailed(e.to_string())
    }
}

impl From<switchboard_transport::TransportError> for B2buaError {
    fn from(e: switchboard_transport::TransportError) -> Self {
        B2buaError::Transport(e.to_string())
    }
}
