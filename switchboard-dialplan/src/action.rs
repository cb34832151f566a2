use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{DialplanError, DialplanResult};
use crate::route::{DialParams, HangupParams, PlayAudioParams};
use crate::session::CallSession;

/// One executable step of a route. Success is returning `Ok(())`; there is
/// no skip/continue outcome.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, ctx: &CancellationToken, session: &dyn CallSession) -> DialplanResult<()>;

    /// A short label for logging and `ExecutionError` reporting, e.g.
    /// `"play_audio(greet.wav)"`.
    fn describe(&self) -> String;
}

/// `play_audio{file, loop?}`: blocks until the media plane reports
/// Completed (success) or Stopped (also success) — `Error` surfaces the
/// reported cause.
pub struct PlayAudioAction {
    pub file: String,
    pub loop_playback: bool,
}

#[async_trait]
impl Action for PlayAudioAction {
    async fn execute(&self, _ctx: &CancellationToken, session: &dyn CallSession) -> DialplanResult<()> {
        session.play_audio(&self.file, self.loop_playback).await
    }

    fn describe(&self) -> String {
        format!("play_audio({})", self.file)
    }
}

/// `dial{target, timeout}`: resolves the target and originates/bridges a
/// B-leg through the session boundary.
pub struct DialAction {
    pub params: DialParams,
}

#[async_trait]
impl Action for DialAction {
    async fn execute(&self, _ctx: &CancellationToken, session: &dyn CallSession) -> DialplanResult<()> {
        session.dial(&self.params.target, self.params.timeout).await
    }

    fn describe(&self) -> String {
        format!("dial({})", self.params.target)
    }
}

/// `hangup{reason?}`.
pub struct HangupAction {
    pub reason: Option<String>,
}

#[async_trait]
impl Action for HangupAction {
    async fn execute(&self, _ctx: &CancellationToken, session: &dyn CallSession) -> DialplanResult<()> {
        session.hangup(self.reason.as_deref()).await
    }

    fn describe(&self) -> String {
        match &self.reason {
            Some(reason) => format!("hangup({})", reason),
            None => "hangup".to_string(),
        }
    }
}

/// Builds an `Action` from its JSON parameter blob. Registered per action
/// type up front; unknown types fail route loading.
pub trait ActionFactory: Send + Sync {
    fn build(&self, params: &serde_json::Value) -> DialplanResult<Box<dyn Action>>;
}

struct PlayAudioFactory;
impl ActionFactory for PlayAudioFactory {
    fn build(&self, params: &serde_json::Value) -> DialplanResult<Box<dyn Action>> {
        let parsed = PlayAudioParams::parse(params)?;
        Ok(Box::new(PlayAudioAction {
            file: parsed.file,
            loop_playback: parsed.loop_playback,
        }))
    }
}

struct DialFactory;
impl ActionFactory for DialFactory {
    fn build(&self, params: &serde_json::Value) -> DialplanResult<Box<dyn Action>> {
        Ok(Box::new(DialAction {
            params: DialParams::parse(params)?,
        }))
    }
}

struct HangupFactory;
impl ActionFactory for HangupFactory {
    fn build(&self, params: &serde_json::Value) -> DialplanResult<Box<dyn Action>> {
        let parsed = HangupParams::parse(params)?;
        Ok(Box::new(HangupAction { reason: parsed.reason }))
    }
}

/// A tagged-variant discriminator rather than an open interface: built-in
/// types are registered up front, and new action types extend this registry
/// rather than the trait surface.
pub struct ActionRegistry {
    factories: std::collections::HashMap<String, Box<dyn ActionFactory>>,
}

impl ActionRegistry {
    /// Registers the three built-in action types: `play_audio`, `dial`, `hangup`.
    pub fn with_builtins() -> ActionRegistry {
        let mut registry = ActionRegistry {
            factories: std::collections::HashMap::new(),
        };
        registry.register("play_audio", Box::new(PlayAudioFactory));
        registry.register("dial", Box::new(DialFactory));
        registry.register("hangup", Box::new(HangupFactory));
        registry
    }

    pub fn register(&mut self, action_type: impl Into<String>, factory: Box<dyn ActionFactory>) {
        self.factories.insert(action_type.into(), factory);
    }

    pub fn build(&self, action_type: &str, params: &serde_json::Value) -> DialplanResult<Box<dyn Action>> {
        let factory = self
            .factories
            .get(action_type)
            .ok_or_else(|| DialplanError::ActionNotFound(action_type.to_string()))?;
        factory.build(params)
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.factories.contains_key(action_type)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtins_cover_the_three_action_types() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.contains("play_audio"));
        assert!(registry.contains("dial"));
        assert!(registry.contains("hangup"));
        assert!(!registry.contains("transfer"));
    }

    #[test]
    fn build_unknown_action_type_fails_loudly() {
        let registry = ActionRegistry::with_builtins();
        let err = registry.build("transfer", &json!({})).unwrap_err();
        assert!(matches!(err, DialplanError::ActionNotFound(t) if t == "transfer"));
    }

    #[test]
    fn build_play_audio_applies_default_loop_false() {
        let registry = ActionRegistry::with_builtins();
        let action = registry.build("play_audio", &json!({"file": "greet.wav"})).unwrap();
        assert_eq!(action.describe(), "play_audio(greet.wav)");
    }

    #[test]
    fn build_play_audio_rejects_missing_required_file() {
        let registry = ActionRegistry::with_builtins();
        let err = registry.build("play_audio", &json!({})).unwrap_err();
        assert!(matches!(err, DialplanError::InvalidActionParams { action, .. } if action == "play_audio"));
    }

    #[test]
    fn build_dial_applies_default_timeout() {
        let registry = ActionRegistry::with_builtins();
        let action = registry.build("dial", &json!({"target": "user/1001"})).unwrap();
        assert_eq!(action.describe(), "dial(user/1001)");
    }

    #[test]
    fn build_hangup_with_null_params_uses_default_reason() {
        let registry = ActionRegistry::with_builtins();
        let action = registry.build("hangup", &serde_json::Value::Null).unwrap();
        assert_eq!(action.describe(), "hangup");
    }

    #[test]
    fn build_hangup_with_reason() {
        let registry = ActionRegistry::with_builtins();
        let action = registry.build("hangup", &json!({"reason": "normal-clearing"})).unwrap();
        assert_eq!(action.describe(), "hangup(normal-clearing)");
    }

    #[test]
    fn custom_action_type_can_be_registered() {
        struct EchoFactory;
        impl ActionFactory for EchoFactory {
            fn build(&self, _params: &serde_json::Value) -> DialplanResult<Box<dyn Action>> {
                Ok(Box::new(HangupAction { reason: None }))
            }
        }

        let mut registry = ActionRegistry::with_builtins();
        registry.register("echo", Box::new(EchoFactory));
        assert!(registry.contains("echo"));
        assert!(registry.build("echo", &json!({})).is_ok());
    }
}
