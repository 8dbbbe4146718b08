//! Declarative parameter schemas for calibration nodes and workflows.
//!
//! A [`ParameterSchema`] is an ordered list of fields. Validation checks every
//! declared field, fills in defaults for missing optional fields and rejects
//! keys the schema does not declare. Errors are collected rather than
//! short-circuited so callers get the full list in one response.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Expected JSON shape of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Bool,
    Integer,
    Float,
    String,
    List,
    Object,
    Any,
}

impl FieldKind {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            // Integers are valid floats.
            FieldKind::Float => value.is_number(),
            FieldKind::String => value.is_string(),
            FieldKind::List => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }

    /// Store the value as the declared kind; integers given for a float
    /// field become floats.
    fn coerce(self, value: &Value) -> Value {
        match (self, value.as_f64()) {
            (FieldKind::Float, Some(f)) if !value.is_f64() => Value::from(f),
            _ => value.clone(),
        }
    }

    fn type_error(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool_type",
            FieldKind::Integer => "int_type",
            FieldKind::Float => "float_type",
            FieldKind::String => "string_type",
            FieldKind::List => "list_type",
            FieldKind::Object => "dict_type",
            FieldKind::Any => "any_type",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldKind::Bool => write!(f, "bool"),
            FieldKind::Integer => write!(f, "integer"),
            FieldKind::Float => write!(f, "float"),
            FieldKind::String => write!(f, "string"),
            FieldKind::List => write!(f, "list"),
            FieldKind::Object => write!(f, "object"),
            FieldKind::Any => write!(f, "any"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, default: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: Some(default),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A single validation failure, located by its path inside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl FieldError {
    pub fn new(loc: Vec<String>, msg: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            loc,
            msg: msg.into(),
            error_type: error_type.into(),
        }
    }

    /// Prepend path segments, used when a schema is nested in a larger one.
    pub fn nested_under(mut self, prefix: &[&str]) -> Self {
        let mut loc: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        loc.append(&mut self.loc);
        self.loc = loc;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    fields: Vec<FieldSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate `input` and return it with defaults applied.
    pub fn validate(&self, input: &Map<String, Value>) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut validated = Map::new();

        for spec in &self.fields {
            match input.get(&spec.name) {
                Some(value) if spec.kind.accepts(value) => {
                    validated.insert(spec.name.clone(), spec.kind.coerce(value));
                }
                Some(_) => errors.push(FieldError::new(
                    vec![spec.name.clone()],
                    format!("Input should be a valid {}", spec.kind),
                    spec.kind.type_error(),
                )),
                None if spec.required => errors.push(FieldError::new(
                    vec![spec.name.clone()],
                    "Field required",
                    "missing",
                )),
                None => {
                    validated.insert(
                        spec.name.clone(),
                        spec.default.clone().unwrap_or(Value::Null),
                    );
                }
            }
        }

        for key in input.keys() {
            if self.get(key).is_none() {
                errors.push(FieldError::new(
                    vec![key.clone()],
                    "Extra inputs are not permitted",
                    "extra_forbidden",
                ));
            }
        }

        if errors.is_empty() {
            Ok(validated)
        } else {
            Err(errors)
        }
    }

    /// Catalog representation of the schema.
    pub fn to_json(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    json!({
                        "type": f.kind,
                        "required": f.required,
                        "default": f.default,
                        "description": f.description,
                    }),
                )
            })
            .collect();
        Value::Object(fields)
    }
}
