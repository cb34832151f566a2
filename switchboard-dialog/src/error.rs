use thiserror::Error;

pub type DialogResult<T> = Result<T, DialogError>;

/// Errors raised by the dialog manager.
#[derive(Error, Debug, Clone)]
pub enum DialogError {
    /// Operation required a state the dialog is not currently in.
    #[error("invalid state: {entity} is {from}, expected to transition to {to}")]
    InvalidState {
        entity: String,
        from: String,
        to: String,
    },

    /// No dialog exists for the given Call-ID.
    #[error("no dialog for call-id {0}")]
    NotFound(String),

    /// An incoming request's Call-ID, CSeq, or tags were malformed.
    #[error("malformed sip message: {0}")]
    Malformed(String),

    /// Sending a response/request over the transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<switchboard_sip::SipParseError> for DialogError {
    fn from(e: switchboard_sip::SipParseError) -> Self {
        DialogError::Malformed(e.to_string())
    }
}

impl From<switchboard_transport::TransportError> for DialogError {
    fn from(e: switchboard_transport::TransportError) -> Self {
        DialogError::Transport(e.to_string())
    }
}
