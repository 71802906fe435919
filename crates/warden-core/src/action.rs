//! Action contract, parameter schemas and the action registry.
//!
//! Actions are leaf functions: they read and mutate an [`ExecutionEvent`]
//! and never deliver findings themselves. Parameters are validated and
//! bound when a playbook is built, so a running chain only ever sees typed
//! parameters.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{ActionError, EngineError, ParamViolation, Result};
use crate::event::{EventKind, ExecutionEvent};

/// JSON type a parameter field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A string.
    String,
    /// An integer.
    Integer,
    /// Any number.
    Number,
    /// A boolean.
    Bool,
    /// An array.
    Array,
    /// An object.
    Object,
    /// Anything.
    Any,
}

impl FieldKind {
    fn admits(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Expected type.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
}

/// Declared parameter shape of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamsSchema {
    fields: Vec<FieldSpec>,
}

impl ParamsSchema {
    /// Creates an empty schema (no parameters accepted).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Declares an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// Returns the declared fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Returns true if the schema declares `name`.
    #[must_use]
    pub fn declares(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Validates a raw parameter block, returning every violation.
    ///
    /// `null` is treated as an empty object. Explicit `null` field values
    /// count as absent.
    #[must_use]
    pub fn validate(&self, raw: &Value) -> Vec<ParamViolation> {
        let empty = serde_json::Map::new();
        let map = match raw {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return vec![ParamViolation::new(
                    "",
                    format!("expected object, got {}", json_type(other)),
                )];
            }
        };

        let mut violations = Vec::new();
        for field in &self.fields {
            match map.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(ParamViolation::new(&field.name, "required field is missing"));
                    }
                }
                Some(value) if !field.kind.admits(value) => {
                    violations.push(ParamViolation::new(
                        &field.name,
                        format!("expected {}, got {}", field.kind.as_str(), json_type(value)),
                    ));
                }
                Some(_) => {}
            }
        }
        let mut unknown: Vec<&String> = map.keys().filter(|k| !self.declares(k)).collect();
        unknown.sort();
        for key in unknown {
            violations.push(ParamViolation::new(key.as_str(), "unknown field"));
        }
        violations
    }
}

/// Typed parameter model of an action.
pub trait ActionParams: DeserializeOwned + Send + Sync + 'static {
    /// Declared shape, checked before deserialization.
    fn schema() -> ParamsSchema;

    /// Semantic checks that the shape cannot express.
    fn validate(&self) -> Vec<ParamViolation> {
        Vec::new()
    }
}

/// Parameter model for actions that take no parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NoParams {}

impl ActionParams for NoParams {
    fn schema() -> ParamsSchema {
        ParamsSchema::new()
    }
}

/// Parameters after validation, ready for [`Action::run`].
pub type BoundParams = Arc<dyn Any + Send + Sync>;

/// A registered action.
pub trait Action: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Event kinds the action can run against. Empty means every kind.
    fn accepts(&self) -> &[EventKind];

    /// Declared parameter shape.
    fn schema(&self) -> &ParamsSchema;

    /// Validates and deserializes a raw parameter block.
    fn bind(&self, raw: &Value) -> std::result::Result<BoundParams, Vec<ParamViolation>>;

    /// Runs the action.
    fn run(&self, event: &mut ExecutionEvent, params: &BoundParams)
    -> std::result::Result<(), ActionError>;

    /// Returns true if the action can run against `kind`.
    fn accepts_kind(&self, kind: EventKind) -> bool {
        self.accepts().is_empty() || self.accepts().contains(&kind)
    }
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name())
            .field("accepts", &self.accepts())
            .finish_non_exhaustive()
    }
}

/// Action backed by a closure and a typed parameter model.
pub struct FnAction<P, F> {
    name: String,
    accepts: Vec<EventKind>,
    schema: ParamsSchema,
    func: F,
    _params: PhantomData<fn() -> P>,
}

impl<P, F> FnAction<P, F>
where
    P: ActionParams,
    F: Fn(&mut ExecutionEvent, &P) -> std::result::Result<(), ActionError> + Send + Sync,
{
    /// Creates an action.
    #[must_use]
    pub fn new(name: impl Into<String>, accepts: Vec<EventKind>, func: F) -> Self {
        Self {
            name: name.into(),
            accepts,
            schema: P::schema(),
            func,
            _params: PhantomData,
        }
    }
}

impl<P, F> Action for FnAction<P, F>
where
    P: ActionParams,
    F: Fn(&mut ExecutionEvent, &P) -> std::result::Result<(), ActionError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self) -> &[EventKind] {
        &self.accepts
    }

    fn schema(&self) -> &ParamsSchema {
        &self.schema
    }

    fn bind(&self, raw: &Value) -> std::result::Result<BoundParams, Vec<ParamViolation>> {
        let violations = self.schema.validate(raw);
        if !violations.is_empty() {
            return Err(violations);
        }
        let raw = if raw.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            raw.clone()
        };
        let params: P =
            serde_json::from_value(raw).map_err(|e| vec![ParamViolation::new("", e.to_string())])?;
        let violations = params.validate();
        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(Arc::new(params))
    }

    fn run(
        &self,
        event: &mut ExecutionEvent,
        params: &BoundParams,
    ) -> std::result::Result<(), ActionError> {
        let params = params
            .downcast_ref::<P>()
            .ok_or_else(|| ActionError::ParamsMismatch {
                action: self.name.clone(),
            })?;
        (self.func)(event, params)
    }
}

/// Name-indexed table of actions.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn Action>>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action.
    pub fn register(&mut self, action: Arc<dyn Action>) -> Result<()> {
        let name = action.name().to_string();
        if self.actions.contains_key(&name) {
            return Err(EngineError::DuplicateAction { name });
        }
        self.actions.insert(name, action);
        Ok(())
    }

    /// Registers a closure-backed action.
    pub fn register_fn<P, F>(
        &mut self,
        name: impl Into<String>,
        accepts: Vec<EventKind>,
        func: F,
    ) -> Result<()>
    where
        P: ActionParams,
        F: Fn(&mut ExecutionEvent, &P) -> std::result::Result<(), ActionError>
            + Send
            + Sync
            + 'static,
    {
        self.register(Arc::new(FnAction::<P, F>::new(name, accepts, func)))
    }

    /// Looks up an action.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(name).cloned()
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Returns the registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if no actions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
