use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::context::RunContext;
use crate::error::ToolError;
use crate::llm::ToolDefinition;

pub type ToolArgs = serde_json::Map<String, serde_json::Value>;

/// Trait for tools callable by a skill.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the argument object.
    fn parameters(&self) -> serde_json::Value;

    /// Shown to the caller as a `Status` response before the tool runs.
    fn status_message(&self) -> Option<String> {
        None
    }

    async fn execute(&self, ctx: &RunContext, args: ToolArgs) -> Result<String, ToolError>;
}

/// Tool with a typed argument struct.
///
/// The schema is generated from `Args`, and arguments are decoded before
/// `call` runs. A decode failure is a retryable error.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send;

    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn status_message(&self) -> Option<String> {
        None
    }

    async fn call(&self, ctx: &RunContext, args: Self::Args) -> Result<String, ToolError>;
}

/// Adapts a `TypedTool` to the untyped `Tool` interface.
pub struct Typed<T: TypedTool> {
    inner: T,
    schema: serde_json::Value,
}

impl<T: TypedTool> Typed<T> {
    pub fn new(inner: T) -> Self {
        Self {
            schema: schema_for_args::<T::Args>(),
            inner,
        }
    }
}

/// Wrap a typed tool for registration.
pub fn typed<T: TypedTool>(tool: T) -> Arc<dyn Tool> {
    Arc::new(Typed::new(tool))
}

#[async_trait]
impl<T: TypedTool> Tool for Typed<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> serde_json::Value {
        self.schema.clone()
    }

    fn status_message(&self) -> Option<String> {
        self.inner.status_message()
    }

    async fn execute(&self, ctx: &RunContext, args: ToolArgs) -> Result<String, ToolError> {
        let args: T::Args = serde_json::from_value(serde_json::Value::Object(args))
            .map_err(|e| ToolError::retryable(format!("invalid arguments: {e}")))?;
        self.inner.call(ctx, args).await
    }
}

/// Inline JSON schema for an argument type, without the `$schema` header.
pub fn schema_for_args<A: JsonSchema>() -> serde_json::Value {
    let generator = schemars::gen::SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let root = generator.into_root_schema_for::<A>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("type").or_insert_with(|| "object".into());
    }
    value
}

/// Ordered registry of tools, unique by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Result<Self> {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            anyhow::bail!("duplicate tool name '{name}'");
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Function definitions, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }
}

/// Validate tool parameters against a JSON schema.
/// Returns a list of validation error strings (empty if valid).
pub(crate) fn validate_params(params: &serde_json::Value, schema: &serde_json::Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_value(params, schema, "", &mut errors);
    errors
}

fn validate_value(
    val: &serde_json::Value,
    schema: &serde_json::Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    let display_path = if path.is_empty() { "root" } else { path };

    // Check type
    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let type_ok = match expected_type {
            "object" => val.is_object(),
            "array" => val.is_array(),
            "string" => val.is_string(),
            "integer" => val.is_i64() || val.is_u64(),
            "number" => val.is_number(),
            "boolean" => val.is_boolean(),
            "null" => val.is_null(),
            _ => true,
        };
        if !type_ok {
            errors.push(format!("{display_path}: expected type '{expected_type}'"));
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(val) {
            errors.push(format!("{display_path}: value not in allowed enum"));
        }
    }

    if let Some(n) = val.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                errors.push(format!("{display_path}: value {n} < minimum {min}"));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                errors.push(format!("{display_path}: value {n} > maximum {max}"));
            }
        }
    }

    if let Some(s) = val.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min_len) = schema.get("minLength").and_then(|m| m.as_u64()) {
            if len < min_len {
                errors.push(format!(
                    "{display_path}: string length {len} < minLength {min_len}"
                ));
            }
        }
        if let Some(max_len) = schema.get("maxLength").and_then(|m| m.as_u64()) {
            if len > max_len {
                errors.push(format!(
                    "{display_path}: string length {len} > maxLength {max_len}"
                ));
            }
        }
    }

    // Object: check required fields and validate properties
    if let Some(obj) = val.as_object() {
        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|r| r.as_str()) {
                if !obj.contains_key(field) {
                    let field_path = if path.is_empty() {
                        field.to_string()
                    } else {
                        format!("{path}.{field}")
                    };
                    errors.push(format!("{field_path}: required field missing"));
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, prop_schema) in props {
                if let Some(prop_val) = obj.get(key) {
                    let prop_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    validate_value(prop_val, prop_schema, &prop_path, errors);
                }
            }
        }
    }

    if let Some(arr) = val.as_array() {
        if let Some(items_schema) = schema.get("items") {
            for (i, item) in arr.iter().enumerate() {
                let item_path = format!("{display_path}[{i}]");
                validate_value(item, items_schema, &item_path, errors);
            }
        }
    }
}
