use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::{DialplanError, DialplanResult};

/// How a route's destination match is expressed in `dialplan.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchSpec {
    Regex { pattern: String },
    Literal { value: String },
}

/// A compiled destination match, built once at route-load time so
/// evaluation never re-compiles a pattern per call.
#[derive(Debug, Clone)]
pub enum DestinationMatch {
    Regex(Regex),
    Literal(String),
}

impl DestinationMatch {
    pub fn compile(spec: &MatchSpec, route_id: &str) -> DialplanResult<DestinationMatch> {
        match spec {
            MatchSpec::Regex { pattern } => {
                let re = Regex::new(pattern).map_err(|e| DialplanError::InvalidPattern {
                    route_id: route_id.to_string(),
                    message: e.to_string(),
                })?;
                Ok(DestinationMatch::Regex(re))
            }
            MatchSpec::Literal { value } => Ok(DestinationMatch::Literal(value.clone())),
        }
    }

    pub fn matches(&self, destination: &str) -> bool {
        match self {
            DestinationMatch::Regex(re) => re.is_match(destination),
            DestinationMatch::Literal(value) => value == destination,
        }
    }
}

/// One step of a route: a tagged action with its own parameter blob. Action
/// factories parse their own parameter blob and fail loudly at route-load
/// time rather than on first call, so the loader builds (and discards) every
/// step's action once up front to validate it.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The JSON shape of one route entry in `dialplan.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "match")]
    pub match_spec: MatchSpec,
    pub actions: Vec<ActionSpec>,
}

/// A loaded, compiled route: destination match plus its ordered actions.
#[derive(Debug, Clone)]
pub struct Route {
    pub id: String,
    pub name: Option<String>,
    pub destination_match: DestinationMatch,
    pub actions: Vec<ActionSpec>,
}

impl Route {
    pub fn from_spec(spec: RouteSpec) -> DialplanResult<Route> {
        let destination_match = DestinationMatch::compile(&spec.match_spec, &spec.id)?;
        Ok(Route {
            id: spec.id,
            name: spec.name,
            destination_match,
            actions: spec.actions,
        })
    }
}

/// Parsed `dial` parameters, shared by the built-in action and by callers
/// that want to resolve a target without going through the executor.
#[derive(Debug, Clone)]
pub struct DialParams {
    pub target: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct DialParamsWire {
    target: String,
    #[serde(default)]
    timeout: Option<u64>,
}

impl DialParams {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn parse(value: &serde_json::Value) -> DialplanResult<DialParams> {
        let wire: DialParamsWire =
            serde_json::from_value(value.clone()).map_err(|e| DialplanError::InvalidActionParams {
                action: "dial".to_string(),
                message: e.to_string(),
            })?;
        Ok(DialParams {
            target: wire.target,
            timeout: wire.timeout.map(Duration::from_secs).unwrap_or(Self::DEFAULT_TIMEOUT),
        })
    }
}

/// Parsed `play_audio` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayAudioParams {
    pub file: String,
    #[serde(rename = "loop", default)]
    pub loop_playback: bool,
}

impl PlayAudioParams {
    pub fn parse(value: &serde_json::Value) -> DialplanResult<PlayAudioParams> {
        serde_json::from_value(value.clone()).map_err(|e| DialplanError::InvalidActionParams {
            action: "play_audio".to_string(),
            message: e.to_string(),
        })
    }
}

/// Parsed `hangup` parameters.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HangupParams {
    pub reason: Option<String>,
}

impl HangupParams {
    pub fn parse(value: &serde_json::Value) -> DialplanResult<HangupParams> {
        if value.is_null() {
            return Ok(HangupParams::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| DialplanError::InvalidActionParams {
            action: "hangup".to_string(),
            message: e.to_string(),
        })
    }
}

/// The three SIP-dialable shapes a `dial` target may take: a location-store
/// lookup by user, a direct SIP URI, or a bare extension (implicit user
/// lookup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    User(String),
    Direct(String),
    Extension(String),
}

impl DialTarget {
    pub fn parse(raw: &str) -> DialTarget {
        if let Some(user) = raw.strip_prefix("user/") {
            DialTarget::User(user.to_string())
        } else if raw.starts_with("sip:") || raw.starts_with("sips:") {
            DialTarget::Direct(raw.to_string())
        } else {
            DialTarget::Extension(raw.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_target_recognizes_all_three_shapes() {
        assert_eq!(DialTarget::parse("user/1001"), DialTarget::User("1001".to_string()));
        assert_eq!(
            DialTarget::parse("sip:bob@10.0.0.2:5060"),
            DialTarget::Direct("sip:bob@10.0.0.2:5060".to_string())
        );
        assert_eq!(DialTarget::parse("2000"), DialTarget::Extension("2000".to_string()));
    }

    #[test]
    fn literal_match_is_exact() {
        let m = DestinationMatch::compile(
            &MatchSpec::Literal {
                value: "1000".to_string(),
            },
            "r1",
        )
        .unwrap();
        assert!(m.matches("1000"));
        assert!(!m.matches("10000"));
    }

    #[test]
    fn regex_match_applies_to_destination() {
        let m = DestinationMatch::compile(
            &MatchSpec::Regex {
                pattern: "^1[0-9]{3}$".to_string(),
            },
            "r1",
        )
        .unwrap();
        assert!(m.matches("1000"));
        assert!(!m.matches("2000"));
    }

    #[test]
    fn invalid_pattern_fails_at_compile_time() {
        let err = DestinationMatch::compile(
            &MatchSpec::Regex {
                pattern: "(".to_string(),
            },
            "bad-route",
        )
        .unwrap_err();
        assert!(matches!(err, DialplanError::InvalidPattern { .. }));
    }
}
