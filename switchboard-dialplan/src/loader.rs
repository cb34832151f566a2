use std::path::Path;

use crate::action::ActionRegistry;
use crate::error::{DialplanError, DialplanResult};
use crate::route::{Route, RouteSpec};

/// Parses a `dialplan.json` route file and eagerly validates every action's
/// type and parameter blob against `registry`, so a bad route fails at load
/// time rather than on the first matching call.
pub fn load_routes_from_str(json: &str, registry: &ActionRegistry) -> DialplanResult<Vec<Route>> {
    let specs: Vec<RouteSpec> = serde_json::from_str(json).map_err(|e| DialplanError::InvalidActionParams {
        action: "route file".to_string(),
        message: e.to_string(),
    })?;

    let mut routes = Vec::with_capacity(specs.len());
    for spec in specs {
        for action in &spec.actions {
            if !registry.contains(&action.action_type) {
                return Err(DialplanError::ActionNotFound(action.action_type.clone()));
            }
            // Validate params parse even though the built Action is
            // discarded here — this is the "fail loudly at route-load
            // time" half of the contract; `build` runs again per-call.
            registry.build(&action.action_type, &action.params)?;
        }
        routes.push(Route::from_spec(spec)?);
    }
    Ok(routes)
}

pub fn load_routes_from_path(path: impl AsRef<Path>, registry: &ActionRegistry) -> DialplanResult<Vec<Route>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| DialplanError::InvalidActionParams {
        action: "route file".to_string(),
        message: format!("reading {}: {}", path.display(), e),
    })?;
    load_routes_from_str(&contents, registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    [
        {
            "id": "greet",
            "name": "Greeting line",
            "match": { "type": "literal", "value": "1000" },
            "actions": [
                { "type": "play_audio", "params": { "file": "greet.wav" } },
                { "type": "hangup", "params": {} }
            ]
        },
        {
            "id": "dial-user",
            "match": { "type": "regex", "pattern": "^2[0-9]{3}$" },
            "actions": [
                { "type": "dial", "params": { "target": "user/1001", "timeout": 20 } }
            ]
        }
    ]
    "#;

    #[test]
    fn loads_valid_routes() {
        let registry = ActionRegistry::with_builtins();
        let routes = load_routes_from_str(SAMPLE, &registry).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].id, "greet");
        assert!(routes[0].destination_match.matches("1000"));
        assert!(routes[1].destination_match.matches("2001"));
    }

    #[test]
    fn unknown_action_type_fails_route_loading() {
        let registry = ActionRegistry::with_builtins();
        let bad = r#"[{"id":"r","match":{"type":"literal","value":"1"},"actions":[{"type":"teleport","params":{}}]}]"#;
        let err = load_routes_from_str(bad, &registry).unwrap_err();
        assert!(matches!(err, DialplanError::ActionNotFound(t) if t == "teleport"));
    }

    #[test]
    fn malformed_action_params_fail_route_loading() {
        let registry = ActionRegistry::with_builtins();
        let bad = r#"[{"id":"r","match":{"type":"literal","value":"1"},"actions":[{"type":"dial","params":{}}]}]"#;
        let err = load_routes_from_str(bad, &registry).unwrap_err();
        assert!(matches!(err, DialplanError::InvalidActionParams { .. }));
    }
}
