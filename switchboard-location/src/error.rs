use thiserror::Error;

pub type LocationResult<T> = Result<T, LocationError>;

/// Errors raised by the location store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LocationError {
    /// `Expires` was below the configured floor. Carries the floor so the
    /// caller can echo it back in a `Min-Expires` header.
    #[error("interval too brief, minimum is {min}")]
    IntervalTooBrief { min: u32 },

    /// A targeted (non-wildcard) unregister named a binding that does not
    /// exist.
    #[error("binding not found: {aor} / {binding_id}")]
    NotFound { aor: String, binding_id: String },

    /// An update shares a Call-ID with an existing binding but its CSeq is
    /// not strictly greater (RFC 3261 update validation).
    #[error("stale CSeq {got} for existing Call-ID {call_id} (must exceed {expected})")]
    StaleCSeq {
        call_id: String,
        expected: u32,
        got: u32,
    },
}
