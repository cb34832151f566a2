use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::DialplanResult;

/// The dialplan↔core boundary. The executor and every built-in action only
/// see this trait; the concrete implementation (owned by `switchboard-server`)
/// is what actually reaches into the dialog, the media pool, and the B2BUA
/// engine. This keeps the dialplan crate free of a dependency on
/// dialog/media/b2bua — routes and actions are described purely in terms of
/// call-session operations.
///
/// All operations are idempotent under repeated termination: calling any of
/// them after the call has already ended returns `DialplanError::Terminated`
/// rather than panicking or blocking forever.
#[async_trait]
pub trait CallSession: Send + Sync {
    fn call_id(&self) -> &str;

    fn destination(&self) -> &str;

    fn caller_id(&self) -> &str;

    /// Cancelled the moment the underlying dialog reaches a terminal state;
    /// the executor passes this to every action so a hangup mid-route aborts
    /// promptly instead of running the rest of the route.
    fn cancel_token(&self) -> CancellationToken;

    fn is_terminated(&self) -> bool;

    /// Blocks until the media plane reports the play finished (normally or
    /// via `stop_audio`) or errored.
    async fn play_audio(&self, file: &str, loop_playback: bool) -> DialplanResult<()>;

    async fn stop_audio(&self) -> DialplanResult<()>;

    /// Resolves `target` (a `user/<id>` location lookup, a direct SIP URI, or
    /// a bare extension), originates a B-leg, and bridges it to this call's
    /// leg. Blocks until either side hangs up or `timeout` elapses without an
    /// answer.
    async fn dial(&self, target: &str, timeout: std::time::Duration) -> DialplanResult<()>;

    async fn hangup(&self, reason: Option<&str>) -> DialplanResult<()>;
}
