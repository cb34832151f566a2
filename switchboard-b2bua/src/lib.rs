//! Leg and Bridge lifecycle for the back-to-back user agent: outbound call
//! origination, the two-leg bridge that ties an inbound and outbound leg
//! together, and the registries that let bridges address legs by handle
//! instead of holding them directly.

mod bridge;
mod error;
mod leg;
mod origin;
mod registry;
mod router;

pub use bridge::{Bridge, BridgeId, BridgeState, TerminatedBy};
pub use error::{B2buaError, B2buaResult};
pub use leg::{
    Direction, HangupHook, Leg, LegDialogContext, LegHandle, LegId, LegState, LegTerminated, TerminationCause,
};
pub use origin::{originate, DialParams};
pub use registry::{BridgeRegistry, LegRegistry};
pub use router::{ResponseRouter, RoutedResponse};
