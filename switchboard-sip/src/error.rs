use thiserror::Error;

pub type SipResult<T> = Result<T, SipParseError>;

/// Errors raised while parsing a SIP message, URI, or SDP body off the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SipParseError {
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("malformed status line: {0}")]
    MalformedStatusLine(String),

    #[error("malformed header line: {0}")]
    MalformedHeader(String),

    #[error("malformed URI: {0}")]
    MalformedUri(String),

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("malformed SDP: {0}")]
    MalformedSdp(String),

    #[error("message truncated")]
    Truncated,
}
