//! Action execution at the model boundary.
//!
//! Turns a raw [`ActionRequest`] into an [`ActionResult`]. Only two
//! failures escape as errors: an unknown action name and arguments that do
//! not fit the action's declared fields. Everything that goes wrong inside
//! a handler, panics included, becomes a failed result for the model.

use futures::FutureExt;
use sagebot_core::action::{ActionRegistry, ActionRequest, ActionResult, ActionSpec};
use sagebot_core::error::ActionError;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ActionExecutor {
    registry: Arc<ActionRegistry>,
}

impl ActionExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub async fn execute(&self, request: &ActionRequest) -> Result<ActionResult, ActionError> {
        let spec = self
            .registry
            .spec(&request.name)
            .ok_or_else(|| ActionError::UnknownAction(request.name.clone()))?;

        let raw = parse_arguments(spec, &request.arguments)?;
        let args = spec.validate(&raw)?;

        info!(action = %request.name, "Executing action");
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.registry.dispatch(&request.name, args))
            .catch_unwind()
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(payload)) => ActionResult::success(&request.name, payload),
            Ok(Err(ActionError::UnknownAction(name))) => {
                return Err(ActionError::UnknownAction(name));
            }
            Ok(Err(e)) => {
                warn!(action = %request.name, error = %e, "Action failed");
                ActionResult::failure(&request.name, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(action = %request.name, panic = %message, "Action panicked");
                ActionResult::failure(&request.name, format!("action crashed: {message}"))
            }
        };

        debug!(
            action = %request.name,
            succeeded = result.succeeded,
            duration_ms,
            "Action finished"
        );
        Ok(result)
    }
}

/// Arguments as a field map, whatever shape the model sent them in.
///
/// Objects pass through. A string is parsed as JSON first. Anything that
/// still is not an object is taken as the single positional value, which
/// only works for actions with exactly one field.
pub fn parse_arguments(spec: &ActionSpec, raw: &Value) -> Result<Map<String, Value>, ActionError> {
    let value = match raw {
        Value::Null => return Ok(Map::new()),
        Value::Object(map) => return Ok(map.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => return Ok(map),
            Ok(Value::Null) => return Ok(Map::new()),
            Ok(scalar @ (Value::Number(_) | Value::Bool(_))) => scalar,
            _ => Value::String(s.clone()),
        },
        scalar @ (Value::Number(_) | Value::Bool(_)) => scalar.clone(),
        Value::Array(_) => {
            return Err(ActionError::invalid(
                &spec.name,
                "arguments must be an object",
            ));
        }
    };

    let field = spec.sole_field().ok_or_else(|| {
        ActionError::invalid(
            &spec.name,
            "arguments are not an object and the action takes more than one field",
        )
    })?;

    let mut map = Map::new();
    map.insert(field.name.clone(), value);
    Ok(map)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sagebot_core::action::{ActionHandler, FieldSpec, FieldType, ValidatedArgs};

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn call(&self, args: ValidatedArgs) -> Result<Value, ActionError> {
            Ok(serde_json::json!({ "url": args.str("url") }))
        }
    }

    struct Failing;

    #[async_trait]
    impl ActionHandler for Failing {
        async fn call(&self, _args: ValidatedArgs) -> Result<Value, ActionError> {
            Err(ActionError::failure("getAssetPrice", "connection refused"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl ActionHandler for Panicking {
        async fn call(&self, _args: ValidatedArgs) -> Result<Value, ActionError> {
            panic!("socket exploded");
        }
    }

    fn executor() -> ActionExecutor {
        let mut registry = ActionRegistry::new();
        registry.register(
            ActionSpec::new("scrapePage", "read a page")
                .field(FieldSpec::required("url", FieldType::String)),
            Arc::new(Echo),
        );
        registry.register(
            ActionSpec::new("getAssetPrice", "price")
                .field(FieldSpec::required("symbol", FieldType::String))
                .field(FieldSpec::optional("exchange", FieldType::String)),
            Arc::new(Failing),
        );
        registry.register(
            ActionSpec::new("explode", "always panics"),
            Arc::new(Panicking),
        );
        ActionExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn structured_arguments() {
        let req = ActionRequest::new("scrapePage", serde_json::json!({"url": "https://a.io"}));
        let result = executor().execute(&req).await.unwrap();
        assert!(result.succeeded);
        assert_eq!(result.payload["url"], "https://a.io");
    }

    #[tokio::test]
    async fn serialized_string_arguments() {
        let req = ActionRequest::new(
            "scrapePage",
            Value::String(r#"{"url":"https://b.io"}"#.into()),
        );
        let result = executor().execute(&req).await.unwrap();
        assert_eq!(result.payload["url"], "https://b.io");
    }

    #[tokio::test]
    async fn bare_string_falls_back_to_single_field() {
        let req = ActionRequest::new("scrapePage", Value::String("https://c.io".into()));
        let result = executor().execute(&req).await.unwrap();
        assert_eq!(result.payload["url"], "https://c.io");
    }

    #[tokio::test]
    async fn bare_string_for_multi_field_action_is_invalid() {
        let req = ActionRequest::new("getAssetPrice", Value::String("XAU/USD".into()));
        let err = executor().execute(&req).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn type_mismatch_is_invalid() {
        let req = ActionRequest::new("scrapePage", serde_json::json!({"url": 42}));
        let err = executor().execute(&req).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let req = ActionRequest::new("launchRocket", serde_json::json!({}));
        let err = executor().execute(&req).await.unwrap_err();
        assert!(matches!(err, ActionError::UnknownAction(ref n) if n == "launchRocket"));
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let req = ActionRequest::new("getAssetPrice", serde_json::json!({"symbol": "XAU/USD"}));
        let result = executor().execute(&req).await.unwrap();
        assert!(!result.succeeded);
        assert!(result.error_message.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn handler_panic_becomes_failed_result() {
        let req = ActionRequest::new("explode", Value::Null);
        let result = executor().execute(&req).await.unwrap();
        assert!(!result.succeeded);
        assert!(result.error_message.unwrap().contains("socket exploded"));
    }

    #[test]
    fn numeric_string_becomes_scalar() {
        let spec = ActionSpec::new("k", "k").field(FieldSpec::required("k", FieldType::Integer));
        let map = parse_arguments(&spec, &Value::String("7".into())).unwrap();
        assert_eq!(map["k"], 7);
    }
}
