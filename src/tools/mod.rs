pub mod code_interpreter;

use serde_json::Value;

use crate::error::{SchemaError, ToolError};
use crate::llm::ModelToolDefinition;

/// Declaration of a function the model may ask the playground to invoke.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub fn definition(&self) -> ModelToolDefinition {
        ModelToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.json_schema.clone(),
        }
    }

    pub fn validate_arguments(&self, args: &Value) -> Result<(), ToolError> {
        validate_arguments(&self.name, &self.json_schema, args)
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema_obj = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    let root_type = schema_obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(SchemaError::RootTypeMustBeObject)?;

    if root_type != "object" {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    if let Some(required) = schema_obj.get("required") {
        let required_arr = required.as_array().ok_or(SchemaError::InvalidRequired)?;
        if required_arr.iter().any(|item| !item.is_string()) {
            return Err(SchemaError::InvalidRequired);
        }
    }

    Ok(())
}

fn validate_arguments(tool_name: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let invalid = |message: String| ToolError::InvalidArguments {
        tool: tool_name.to_string(),
        message,
    };

    let args_obj = args
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;

    let schema_obj = schema
        .as_object()
        .ok_or_else(|| invalid("tool schema must be a JSON object".to_string()))?;

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field_name in required.iter().filter_map(Value::as_str) {
            if !args_obj.contains_key(field_name) {
                return Err(invalid(format!("missing required field: {field_name}")));
            }
        }
    }

    let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, value) in args_obj {
        let expected = properties
            .get(key)
            .and_then(|field| field.get("type"))
            .and_then(Value::as_str);
        if let Some(type_name) = expected
            && !value_matches_type(value, type_name)
        {
            return Err(invalid(format!("field '{key}' must be of type {type_name}")));
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "number" => value.as_f64().is_some(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
