//! Actions — the capabilities the model may ask the backend to run.
//!
//! An [`ActionSpec`] is advertised to the model as a function declaration.
//! When the model answers with an [`ActionRequest`], its raw arguments are
//! validated against its `ActionSpec` into [`ValidatedArgs`] (a map of typed
//! [`ArgValue`]s) before the handler ever sees them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ActionError;

/// Primitive type of a declared action field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// A validated argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Number(f64),
    Boolean(bool),
}

impl ArgValue {
    fn matches(&self, ty: FieldType) -> bool {
        matches!(
            (self, ty),
            (Self::String(_), FieldType::String)
                | (Self::Integer(_), FieldType::Integer)
                | (Self::Number(_), FieldType::Number)
                | (Self::Boolean(_), FieldType::Boolean)
        )
    }

    /// Coerce a raw JSON value into the declared type, or `None` on mismatch.
    fn from_json(value: &serde_json::Value, ty: FieldType) -> Option<Self> {
        use serde_json::Value;
        match (ty, value) {
            (FieldType::String, Value::String(s)) => Some(Self::String(s.clone())),
            (FieldType::Integer, Value::Number(n)) => n.as_i64().map(Self::Integer).or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| Self::Integer(f as i64))
            }),
            (FieldType::Number, Value::Number(n)) => n.as_f64().map(Self::Number),
            (FieldType::Boolean, Value::Bool(b)) => Some(Self::Boolean(*b)),
            _ => None,
        }
    }
}

/// One named field of an action's input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub ty: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    /// Used when the model omits the field or sends an empty string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ArgValue>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            required: true,
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, value: ArgValue) -> Self {
        self.default = Some(value);
        self
    }
}

/// Declaration of one action: its name, purpose and input fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ActionSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// The `parameters` object of the function declaration.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for f in &self.fields {
            let mut prop = serde_json::json!({ "type": f.ty.as_str() });
            if let Some(desc) = &f.description {
                prop["description"] = serde_json::json!(desc);
            }
            properties.insert(f.name.clone(), prop);
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// `{name, description, parameters}` as the model API expects it.
    pub fn to_declaration(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters_schema(),
        })
    }

    /// The only field, when the action takes exactly one scalar argument.
    pub fn sole_field(&self) -> Option<&FieldSpec> {
        match self.fields.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Validate raw model arguments against the declared fields.
    ///
    /// Unknown fields, type mismatches and missing required fields without a
    /// default are all rejected as `InvalidArguments`.
    pub fn validate(
        &self,
        raw: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<ValidatedArgs, ActionError> {
        if let Some(unknown) = raw
            .keys()
            .find(|k| !self.fields.iter().any(|f| &f.name == *k))
        {
            return Err(ActionError::invalid(
                &self.name,
                format!("unexpected field '{unknown}'"),
            ));
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let supplied = raw.get(&field.name).filter(|v| match v {
                serde_json::Value::Null => false,
                serde_json::Value::String(s) => !(s.trim().is_empty() && field.default.is_some()),
                _ => true,
            });

            let value = match supplied {
                Some(v) => ArgValue::from_json(v, field.ty).ok_or_else(|| {
                    ActionError::invalid(
                        &self.name,
                        format!("field '{}' must be of type {}", field.name, field.ty.as_str()),
                    )
                })?,
                None => match &field.default {
                    Some(default) if default.matches(field.ty) => default.clone(),
                    _ if field.required => {
                        return Err(ActionError::invalid(
                            &self.name,
                            format!("missing required field '{}'", field.name),
                        ));
                    }
                    _ => continue,
                },
            };
            values.insert(field.name.clone(), value);
        }

        Ok(ValidatedArgs { values })
    }
}

/// Arguments that passed validation against an [`ActionSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ArgValue::Number(n)) => Some(*n),
            Some(ArgValue::Integer(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ArgValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A model-authored request to run an action.
///
/// Kept exactly as the model produced it: `arguments` is the raw value
/// (an object, or occasionally a serialized string) and `thought_signature`
/// is the opaque token some models attach to the call part. Both are echoed
/// back verbatim in the follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,

    #[serde(default)]
    pub arguments: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            thought_signature: None,
        }
    }
}

/// The normalized outcome of running an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub name: String,
    pub succeeded: bool,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ActionResult {
    pub fn success(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            succeeded: true,
            payload,
            error_message: None,
        }
    }

    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            name: name.into(),
            succeeded: false,
            payload: serde_json::Value::Null,
            error_message: Some(message),
        }
    }
}

/// Serialize a handler's typed output, falling back to its debug string form
/// so a result never fails to become a payload.
pub fn payload_of<T: Serialize + std::fmt::Debug>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Action output not serializable, using string form");
        serde_json::Value::String(format!("{value:?}"))
    })
}

/// Executes one action with validated arguments. May perform network I/O.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, args: ValidatedArgs) -> Result<serde_json::Value, ActionError>;
}

struct RegisteredAction {
    spec: ActionSpec,
    handler: Arc<dyn ActionHandler>,
}

/// The set of actions available to the model.
///
/// Built once at startup and shared read-only across concurrent turns. The
/// registry neither retries nor caches.
#[derive(Default)]
pub struct ActionRegistry {
    actions: Vec<RegisteredAction>,
    index: HashMap<String, usize>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Replaces any existing action with the same name.
    pub fn register(&mut self, spec: ActionSpec, handler: Arc<dyn ActionHandler>) {
        let entry = RegisteredAction { spec, handler };
        match self.index.get(&entry.spec.name) {
            Some(&i) => self.actions[i] = entry,
            None => {
                self.index.insert(entry.spec.name.clone(), self.actions.len());
                self.actions.push(entry);
            }
        }
    }

    /// All specs, in registration order (for advertising to the model).
    pub fn describe(&self) -> Vec<ActionSpec> {
        self.actions.iter().map(|a| a.spec.clone()).collect()
    }

    pub fn spec(&self, name: &str) -> Option<&ActionSpec> {
        self.index.get(name).map(|&i| &self.actions[i].spec)
    }

    /// Run the named action. Fails with `UnknownAction` if it is not registered.
    pub async fn dispatch(
        &self,
        name: &str,
        args: ValidatedArgs,
    ) -> Result<serde_json::Value, ActionError> {
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;
        self.actions[i].handler.call(args).await
    }

    pub fn names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
