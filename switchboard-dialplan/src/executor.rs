use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::action::ActionRegistry;
use crate::error::{DialplanError, DialplanResult};
use crate::loader::{load_routes_from_path, load_routes_from_str};
use crate::route::Route;
use crate::session::CallSession;

/// Routes evaluated in declared order; the first destination match wins.
/// Owns the action registry and, if loaded from a file, the path used for
/// `reload`.
pub struct DialplanEngine {
    routes: RwLock<Vec<Route>>,
    registry: ActionRegistry,
    source_path: Option<PathBuf>,
}

impl DialplanEngine {
    pub fn new(routes: Vec<Route>, registry: ActionRegistry) -> DialplanEngine {
        DialplanEngine {
            routes: RwLock::new(routes),
            registry,
            source_path: None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>, registry: ActionRegistry) -> DialplanResult<DialplanEngine> {
        let path = path.as_ref();
        let routes = load_routes_from_path(path, &registry)?;
        Ok(DialplanEngine {
            routes: RwLock::new(routes),
            registry,
            source_path: Some(path.to_path_buf()),
        })
    }

    pub fn from_json(json: &str, registry: ActionRegistry) -> DialplanResult<DialplanEngine> {
        let routes = load_routes_from_str(json, &registry)?;
        Ok(DialplanEngine {
            routes: RwLock::new(routes),
            registry,
            source_path: None,
        })
    }

    /// Re-parses the route file this engine was constructed from and
    /// atomically swaps the route table — an operator can edit
    /// `dialplan.json` without a restart.
    pub async fn reload(&self) -> DialplanResult<()> {
        let Some(path) = &self.source_path else {
            return Err(DialplanError::InvalidActionParams {
                action: "reload".to_string(),
                message: "engine was not constructed from a route file".to_string(),
            });
        };
        let fresh = load_routes_from_path(path, &self.registry)?;
        let count = fresh.len();
        *self.routes.write().await = fresh;
        info!(path = %path.display(), routes = count, "dialplan reloaded");
        Ok(())
    }

    async fn find_route(&self, destination: &str) -> Option<Route> {
        let routes = self.routes.read().await;
        routes.iter().find(|r| r.destination_match.matches(destination)).cloned()
    }

    pub async fn route_count(&self) -> usize {
        self.routes.read().await.len()
    }

    /// Finds the first matching route for `session.destination()` or fails
    /// with `NoRouteMatch`.
    pub async fn execute(&self, ctx: &CancellationToken, session: &dyn CallSession) -> DialplanResult<()> {
        let route = self
            .find_route(session.destination())
            .await
            .ok_or(DialplanError::NoRouteMatch)?;
        self.execute_route(ctx, session, &route).await
    }

    /// Runs each action in order, checking `ctx` and `session.is_terminated()`
    /// before every step. Actions within one call run strictly sequentially;
    /// any failure halts the route and is wrapped in `ExecutionError` with
    /// how far it got.
    pub async fn execute_route(
        &self,
        ctx: &CancellationToken,
        session: &dyn CallSession,
        route: &Route,
    ) -> DialplanResult<()> {
        let total = route.actions.len();
        for (index, spec) in route.actions.iter().enumerate() {
            if ctx.is_cancelled() || session.is_terminated() {
                return Err(DialplanError::ExecutionError {
                    route_id: route.id.clone(),
                    step: index,
                    total,
                    action: spec.action_type.clone(),
                    cause: Box::new(DialplanError::Terminated),
                });
            }

            let action = match self.registry.build(&spec.action_type, &spec.params) {
                Ok(action) => action,
                Err(e) => {
                    warn!(route = %route.id, action = %spec.action_type, error = %e, "action build failed mid-route");
                    return Err(DialplanError::ExecutionError {
                        route_id: route.id.clone(),
                        step: index,
                        total,
                        action: spec.action_type.clone(),
                        cause: Box::new(e),
                    });
                }
            };

            info!(route = %route.id, step = index, action = %action.describe(), "executing dialplan action");

            if let Err(e) = action.execute(ctx, session).await {
                warn!(route = %route.id, step = index, action = %spec.action_type, error = %e, "dialplan action failed");
                return Err(DialplanError::ExecutionError {
                    route_id: route.id.clone(),
                    step: index,
                    total,
                    action: spec.action_type.clone(),
                    cause: Box::new(e),
                });
            }
        }
        Ok(())
    }
}

/// Shared handle to a `DialplanEngine`, for the ingress layer to spawn route
/// execution on a detached task without cloning route tables.
pub type SharedDialplanEngine = Arc<DialplanEngine>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DialplanError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeSession {
        call_id: String,
        destination: String,
        terminated: AtomicBool,
        played: Mutex<Vec<String>>,
        dial_calls: AtomicUsize,
        hangup_calls: AtomicUsize,
        fail_dial: bool,
        cancel: CancellationToken,
    }

    impl FakeSession {
        fn new(destination: &str) -> FakeSession {
            FakeSession {
                call_id: "call-1".to_string(),
                destination: destination.to_string(),
                terminated: AtomicBool::new(false),
                played: Mutex::new(Vec::new()),
                dial_calls: AtomicUsize::new(0),
                hangup_calls: AtomicUsize::new(0),
                fail_dial: false,
                cancel: CancellationToken::new(),
            }
        }
    }

    #[async_trait]
    impl CallSession for FakeSession {
        fn call_id(&self) -> &str {
            &self.call_id
        }
        fn destination(&self) -> &str {
            &self.destination
        }
        fn caller_id(&self) -> &str {
            "alice"
        }
        fn cancel_token(&self) -> CancellationToken {
            self.cancel.clone()
        }
        fn is_terminated(&self) -> bool {
            self.terminated.load(Ordering::Acquire)
        }
        async fn play_audio(&self, file: &str, _loop_playback: bool) -> DialplanResult<()> {
            self.played.lock().unwrap().push(file.to_string());
            Ok(())
        }
        async fn stop_audio(&self) -> DialplanResult<()> {
            Ok(())
        }
        async fn dial(&self, _target: &str, _timeout: Duration) -> DialplanResult<()> {
            self.dial_calls.fetch_add(1, Ordering::Relaxed);
            if self.fail_dial {
                Err(DialplanError::DialTimeout)
            } else {
                Ok(())
            }
        }
        async fn hangup(&self, _reason: Option<&str>) -> DialplanResult<()> {
            self.hangup_calls.fetch_add(1, Ordering::Relaxed);
            self.terminated.store(true, Ordering::Release);
            Ok(())
        }
    }

    const ROUTES: &str = r#"
    [
        { "id": "greet", "match": { "type": "literal", "value": "1000" },
          "actions": [
            { "type": "play_audio", "params": { "file": "greet.wav" } },
            { "type": "hangup", "params": {} }
          ] },
        { "id": "dial-user", "match": { "type": "literal", "value": "2000" },
          "actions": [ { "type": "dial", "params": { "target": "user/1001", "timeout": 20 } } ] }
    ]
    "#;

    fn engine() -> DialplanEngine {
        DialplanEngine::from_json(ROUTES, ActionRegistry::with_builtins()).unwrap()
    }

    #[tokio::test]
    async fn executes_matching_route_in_order() {
        let engine = engine();
        let session = FakeSession::new("1000");
        let ctx = CancellationToken::new();
        engine.execute(&ctx, &session).await.unwrap();
        assert_eq!(session.played.lock().unwrap().as_slice(), &["greet.wav".to_string()]);
        assert_eq!(session.hangup_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn no_matching_route_is_reported() {
        let engine = engine();
        let session = FakeSession::new("9999");
        let ctx = CancellationToken::new();
        let err = engine.execute(&ctx, &session).await.unwrap_err();
        assert!(matches!(err, DialplanError::NoRouteMatch));
    }

    #[tokio::test]
    async fn dial_timeout_halts_the_route_with_step_reported() {
        let mut session = FakeSession::new("2000");
        session.fail_dial = true;
        let engine = engine();
        let ctx = CancellationToken::new();
        let err = engine.execute(&ctx, &session).await.unwrap_err();
        match err {
            DialplanError::ExecutionError { step, total, ref cause, .. } => {
                assert_eq!(step, 0);
                assert_eq!(total, 1);
                assert!(matches!(**cause, DialplanError::DialTimeout));
            }
            other => panic!("expected ExecutionError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cancellation_before_a_step_halts_the_route() {
        let engine = engine();
        let session = FakeSession::new("1000");
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = engine.execute(&ctx, &session).await.unwrap_err();
        assert!(session.played.lock().unwrap().is_empty());
        assert!(matches!(err, DialplanError::ExecutionError { .. }));
    }
}
