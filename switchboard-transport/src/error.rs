use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message parse error: {0}")]
    Parse(#[from] switchboard_sip::SipParseError),

    #[error("transport is closed")]
    Closed,
}
