use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Top-level error type for the switchboard binary. Every subsystem error
/// gets a variant rather than being boxed behind a dynamic trait object, so
/// ingress handlers can map a failure to a specific SIP final response
/// without downcasting.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Dialog(#[from] switchboard_dialog::DialogError),

    #[error(transparent)]
    Location(#[from] switchboard_location::LocationError),

    #[error(transparent)]
    Media(#[from] switchboard_media::MediaError),

    #[error(transparent)]
    B2bua(#[from] switchboard_b2bua::B2buaError),

    #[error(transparent)]
    Dialplan(#[from] switchboard_dialplan::DialplanError),

    #[error(transparent)]
    Transport(#[from] switchboard_transport::TransportError),

    #[error(transparent)]
    SipParse(#[from] switchboard_sip::SipParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Best-effort mapping to the SIP final-response code an ingress handler
    /// should send when a request fails with this error. Not every variant
    /// arises on the request path; those default to 500.
    pub fn sip_status(&self) -> u16 {
        match self {
            ServerError::Location(switchboard_location::LocationError::IntervalTooBrief { .. }) => 423,
            ServerError::Location(switchboard_location::LocationError::NotFound { .. }) => 404,
            ServerError::Location(switchboard_location::LocationError::StaleCSeq { .. }) => 400,
            ServerError::Dialog(switchboard_dialog::DialogError::NotFound(_)) => 481,
            ServerError::Dialog(switchboard_dialog::DialogError::InvalidState { .. }) => 481,
            ServerError::Dialog(switchboard_dialog::DialogError::Malformed(_)) => 400,
            ServerError::SipParse(_) => 400,
            ServerError::Dialplan(e) => e.sip_status(),
            ServerError::Media(_) | ServerError::B2bua(_) => 503,
            _ => 500,
        }
    }
}
