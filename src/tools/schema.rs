//! Declared argument schemas and validation

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Expected JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Integer => "integer",
            ArgType::Boolean => "boolean",
            ArgType::Array => "array",
            ArgType::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            ArgType::String => value.is_string(),
            ArgType::Number => value.is_number(),
            ArgType::Integer => value.is_i64() || value.is_u64(),
            ArgType::Boolean => value.is_boolean(),
            ArgType::Array => value.is_array(),
            ArgType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub ty: ArgType,
    pub required: bool,
    pub description: String,
}

/// Mapping from parameter name to expected type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgSchema {
    params: BTreeMap<String, ParamSpec>,
}

impl ArgSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(self, name: impl Into<String>, ty: ArgType, description: impl Into<String>) -> Self {
        self.param(name, ty, true, description)
    }

    pub fn optional(self, name: impl Into<String>, ty: ArgType, description: impl Into<String>) -> Self {
        self.param(name, ty, false, description)
    }

    fn param(
        mut self,
        name: impl Into<String>,
        ty: ArgType,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        self.params.insert(
            name.into(),
            ParamSpec {
                ty,
                required,
                description: description.into(),
            },
        );
        self
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamSpec)> {
        self.params.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// JSON Schema advertised to the model
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    json!({
                        "type": spec.ty.as_str(),
                        "description": spec.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Check model-supplied arguments against the declared parameters.
    ///
    /// `null` is accepted as "no arguments" so parameterless tools work with
    /// models that omit the argument object entirely.
    pub fn validate(&self, arguments: &Value) -> Result<Map<String, Value>, String> {
        let args = match arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            Value::String(raw) => {
                return Err(format!("arguments are not a JSON object: {raw:?}"));
            }
            other => {
                return Err(format!("arguments must be an object, got {other}"));
            }
        };

        for (name, spec) in &self.params {
            match args.get(name) {
                None if spec.required => {
                    return Err(format!("missing required argument '{name}'"));
                }
                Some(value) if !spec.ty.matches(value) => {
                    return Err(format!(
                        "argument '{name}' must be of type {}, got {value}",
                        spec.ty.as_str()
                    ));
                }
                _ => {}
            }
        }

        if let Some(unknown) = args.keys().find(|k| !self.params.contains_key(*k)) {
            return Err(format!("unexpected argument '{unknown}'"));
        }

        Ok(args)
    }
}
