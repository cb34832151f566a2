//! Pattern-matched action sequences driving per-call behavior (component
//! C6): JSON-defined routes, a typed action registry, and an executor that
//! runs one call's actions strictly sequentially against the dialplan↔core
//! `CallSession` boundary.

mod action;
mod error;
mod executor;
mod loader;
mod route;
mod session;

pub use action::{Action, ActionFactory, ActionRegistry, DialAction, HangupAction, PlayAudioAction};
pub use error::{DialplanError, DialplanResult};
pub use executor::{DialplanEngine, SharedDialplanEngine};
pub use loader::{load_routes_from_path, load_routes_from_str};
pub use route::{
    ActionSpec, DestinationMatch, DialParams, DialTarget, HangupParams, MatchSpec, PlayAudioParams, Route,
    RouteSpec,
};
pub use session::CallSession;
