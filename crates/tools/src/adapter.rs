//! Tool adapters.
//!
//! Concrete backends (databases, document stores, analytics engines) stay
//! opaque behind this trait. Adapters register at startup with a static
//! schema; the policy engine validates call parameters against it.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use am_domain::error::Result;
use am_domain::TransactionContext;

/// Parameter type in a tool's input schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    fn json_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

/// One declared input parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: description.into(),
        }
    }
}

/// Static input schema declared by an adapter at registration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolSchema {
    pub parameters: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(parameters: Vec<ParamSpec>) -> Self {
        Self { parameters }
    }

    /// JSON-schema-shaped rendering for `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    json!({ "type": p.kind.json_type(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate presence of required parameters and absence of undeclared
    /// ones. Type checking stays with the adapter.
    pub fn check_arguments(&self, args: &Value) -> std::result::Result<(), String> {
        let Some(map) = args.as_object() else {
            if args.is_null() && self.parameters.iter().all(|p| !p.required) {
                return Ok(());
            }
            return Err("arguments must be a JSON object".into());
        };
        for p in self.parameters.iter().filter(|p| p.required) {
            if !map.contains_key(&p.name) {
                return Err(format!("missing required parameter \"{}\"", p.name));
            }
        }
        for key in map.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                return Err(format!("undeclared parameter \"{key}\""));
            }
        }
        Ok(())
    }
}

/// A named handler exposed to specialized agents through the tool server.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> ToolSchema;

    /// Execute the tool. The transaction context carries the caller's
    /// identity for tracing; cancellation arrives as task cancellation at
    /// the server's timeout boundary.
    async fn call(&self, arguments: Value, ctx: &TransactionContext) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::required("table", ParamKind::String, "target table"),
            ParamSpec::optional("filter", ParamKind::String, "row filter"),
        ])
    }

    #[test]
    fn json_schema_shape() {
        let js = schema().to_json_schema();
        assert_eq!(js["type"], "object");
        assert_eq!(js["properties"]["table"]["type"], "string");
        assert_eq!(js["required"], json!(["table"]));
    }

    #[test]
    fn check_arguments_accepts_valid() {
        let s = schema();
        assert!(s.check_arguments(&json!({ "table": "users" })).is_ok());
        assert!(s
            .check_arguments(&json!({ "table": "users", "filter": "age > 30" }))
            .is_ok());
    }

    #[test]
    fn check_arguments_rejects_missing_required() {
        let err = schema().check_arguments(&json!({ "filter": "x" })).unwrap_err();
        assert!(err.contains("table"));
    }

    #[test]
    fn check_arguments_rejects_undeclared() {
        let err = schema()
            .check_arguments(&json!({ "table": "users", "limit": 10 }))
            .unwrap_err();
        assert!(err.contains("limit"));
    }

    #[test]
    fn null_arguments_ok_when_nothing_required() {
        let s = ToolSchema::default();
        assert!(s.check_arguments(&Value::Null).is_ok());
        assert!(schema().check_arguments(&Value::Null).is_err());
    }
}
