use thiserror::Error;

pub type DialplanResult<T> = Result<T, DialplanError>;

/// Errors raised while loading routes or executing a call's dialplan.
#[derive(Error, Debug, Clone)]
pub enum DialplanError {
    /// No route's destination match matched the dialed user part.
    #[error("no route matches the dialed destination")]
    NoRouteMatch,

    /// A route named an action type with no registered factory.
    #[error("unknown action type: {0}")]
    ActionNotFound(String),

    /// An action's parameter blob failed to parse at route-load time.
    #[error("invalid parameters for action {action}: {message}")]
    InvalidActionParams { action: String, message: String },

    /// A route's destination match regex failed to compile.
    #[error("invalid destination pattern in route {route_id}: {message}")]
    InvalidPattern { route_id: String, message: String },

    /// `dial` resolved a `user/<ext>` or bare `<ext>` target against the
    /// location store and found no binding.
    #[error("no user found for target {0}")]
    UserNotFound(String),

    /// `dial` was given a target that resolves to nothing dialable.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The outbound leg never answered within its timeout.
    #[error("dial timed out")]
    DialTimeout,

    /// The outbound leg was canceled (parent dialog terminated) before answering.
    #[error("dial canceled")]
    DialCanceled,

    /// The outbound leg was rejected with a final SIP response.
    #[error("dial rejected: {code} {reason}")]
    DialRejected { code: u16, reason: String },

    /// The call session reported a media-plane failure mid-action (e.g.
    /// `play_audio`'s stream terminated with `Error`).
    #[error("media error: {0}")]
    Media(String),

    /// The call had already terminated before the action it is blocked on
    /// could complete.
    #[error("call already terminated")]
    Terminated,

    /// A route failed partway through execution; carries how far it got so
    /// the caller can report partial progress.
    #[error("route {route_id} failed at step {step}/{total} ({action}): {cause}")]
    ExecutionError {
        route_id: String,
        step: usize,
        total: usize,
        action: String,
        cause: Box<DialplanError>,
    },
}

impl DialplanError {
    /// Maps a terminal dialplan failure to the SIP final-response code the
    /// ingress layer should send back to the original caller.
    pub fn sip_status(&self) -> u16 {
        match self {
            DialplanError::DialTimeout => 408,
            DialplanError::DialCanceled => 487,
            DialplanError::DialRejected { code, .. } => *code,
            DialplanError::NoRouteMatch => 404,
            DialplanError::UserNotFound(_) | DialplanError::TargetNotFound(_) => 404,
            DialplanError::Media(_) => 503,
            DialplanError::ExecutionError { cause, .. } => cause.sip_status(),
            _ => 500,
        }
    }
}
