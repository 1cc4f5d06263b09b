use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::tools::call::ToolName;
use crate::tools::types::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Navigation,
    Interaction,
    Observation,
    State,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn accepts(&self, v: &Value) -> bool {
        match self {
            Self::String => v.is_string(),
            Self::Integer => v.is_u64() || v.is_i64() || v.as_f64().is_some_and(|f| f.fract() == 0.0),
            Self::Number => v.is_number(),
            Self::Boolean => v.is_boolean(),
            Self::Array => v.is_array(),
            Self::Object => v.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<&'static [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ParamSpec {
    pub fn required(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            required: true,
            enum_values: None,
            default: None,
            description,
        }
    }

    pub fn optional(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Static description of one tool. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub category: ToolCategory,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub examples: Vec<Value>,
}

impl ToolDefinition {
    pub fn new(name: ToolName, category: ToolCategory, description: &'static str) -> Self {
        Self {
            name,
            category,
            description,
            params: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }

    /// Checks `params` against this schema and fills in defaults.
    ///
    /// Fails on a non-object payload, a missing required parameter, a
    /// mistyped value, or a value outside its enum. Unknown keys pass through.
    pub fn validate(&self, params: &Value) -> Result<Map<String, Value>, ToolError> {
        let mut map = match params {
            Value::Object(m) => m.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(ToolError::invalid_params(format!(
                    "{}: parameters must be an object, got {other}",
                    self.name
                )))
            }
        };

        for spec in &self.params {
            match map.get(spec.name) {
                None | Some(Value::Null) => {
                    if let Some(default) = &spec.default {
                        map.insert(spec.name.to_string(), default.clone());
                    } else if spec.required {
                        return Err(ToolError::invalid_params(format!(
                            "{}: missing required parameter '{}'",
                            self.name, spec.name
                        )));
                    } else {
                        map.remove(spec.name);
                    }
                }
                Some(v) => {
                    if !spec.param_type.accepts(v) {
                        return Err(ToolError::invalid_params(format!(
                            "{}: parameter '{}' must be {}",
                            self.name,
                            spec.name,
                            spec.param_type.as_str()
                        )));
                    }
                    if let (Some(allowed), Some(s)) = (spec.enum_values, v.as_str()) {
                        if !allowed.contains(&s) {
                            return Err(ToolError::invalid_params(format!(
                                "{}: parameter '{}' must be one of {:?}, got '{s}'",
                                self.name, spec.name, allowed
                            )));
                        }
                    }
                }
            }
        }
        Ok(map)
    }

    /// JSON-Schema object for the LLM tool list.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut prop = json!({
                "type": p.param_type.as_str(),
                "description": p.description,
            });
            if let Some(values) = p.enum_values {
                prop["enum"] = json!(values);
            }
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            if p.param_type == ParamType::Array {
                prop["items"] = json!({ "type": "string" });
            }
            properties.insert(p.name.to_string(), prop);
        }
        let required: Vec<&str> = self.required_params().map(|p| p.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// A valid parameter object: the first example, or every required
    /// parameter with a representative value.
    pub fn sample_params(&self) -> Value {
        if let Some(example) = self.examples.first() {
            return example.clone();
        }
        let mut map = Map::new();
        for p in self.required_params() {
            let v = match (p.enum_values, p.param_type) {
                (Some(values), _) if !values.is_empty() => json!(values[0]),
                (_, ParamType::String) => json!("#sample"),
                (_, ParamType::Integer) => json!(0),
                (_, ParamType::Number) => json!(0.0),
                (_, ParamType::Boolean) => json!(false),
                (_, ParamType::Array) => json!([]),
                (_, ParamType::Object) => json!({}),
            };
            map.insert(p.name.to_string(), v);
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolErrorCode;

    fn def() -> ToolDefinition {
        ToolDefinition::new(ToolName::ScrollPage, ToolCategory::Interaction, "scroll")
            .param(
                ParamSpec::optional("direction", ParamType::String, "where")
                    .one_of(&["up", "down"])
                    .with_default(json!("down")),
            )
            .param(ParamSpec::required("amount", ParamType::Number, "pixels"))
    }

    #[test]
    fn fills_defaults() {
        let out = def().validate(&json!({"amount": 300})).unwrap();
        assert_eq!(out["direction"], "down");
    }

    #[test]
    fn rejects_missing_mistyped_and_out_of_enum() {
        let d = def();
        for bad in [
            json!({}),
            json!({"amount": "lots"}),
            json!({"amount": 1, "direction": "sideways"}),
            json!([1, 2]),
        ] {
            let err = d.validate(&bad).unwrap_err();
            assert_eq!(err.code, ToolErrorCode::InvalidParameters, "{bad}");
        }
    }

    #[test]
    fn json_schema_lists_required() {
        let schema = def().to_json_schema();
        assert_eq!(schema["required"], json!(["amount"]));
        assert_eq!(schema["properties"]["direction"]["enum"], json!(["up", "down"]));
    }
}
