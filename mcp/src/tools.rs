//! Tool registry and tool definitions.
//!
//! [`ToolRegistry`] is an immutable snapshot of the provider's tools, built
//! by [`ToolRegistry::fetch`]. A newer snapshot replaces an older one
//! wholesale; nothing is refreshed in place.
//!
//! [`ToolDefinition`] is the description shape shared by the registration
//! POST and the local listing endpoint:
//!
//! ```json
//! { "name": "mcp__playwright__browser_navigate",
//!   "display_name": "Browser Navigate",
//!   "description": "Navigate to a URL",
//!   "parameters": { "type": "object", "properties": { "url": { "type": "string" } } } }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::mcp::{ProviderError, ToolProvider, ToolSpec};

/// A locally invocable tool.
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    /// Registry name, what commands refer to.
    pub name: String,
    /// Name the provider knows the tool by.
    pub remote_name: String,
    pub description: String,
    pub input_schema: Option<Value>,
}

impl Tool {
    pub fn from_spec(spec: ToolSpec, prefix: Option<&str>) -> Self {
        let name = match prefix {
            Some(p) => format!("{p}{}", spec.name),
            None => spec.name.clone(),
        };
        Self {
            name,
            remote_name: spec.name,
            description: spec.description.unwrap_or_default(),
            input_schema: spec.input_schema,
        }
    }

    /// Describe the tool for registration and listing.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            display_name: display_name(&self.remote_name),
            description: self.description.clone(),
            parameters: parameters_for(&self.remote_name, self.input_schema.as_ref()),
        }
    }
}

/// Tool description sent to the control server and served locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub parameters: Value,
}

/// Ordered, name-unique snapshot of the provider's tools.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    /// Build a registry. Later duplicates of a name are dropped.
    pub fn new(tools: Vec<Tool>) -> Self {
        let mut unique: Vec<Tool> = Vec::with_capacity(tools.len());
        for tool in tools {
            if unique.iter().any(|t| t.name == tool.name) {
                warn!("Duplicate tool name '{}' from provider, keeping the first", tool.name);
                continue;
            }
            unique.push(tool);
        }
        Self { tools: unique }
    }

    /// Fetch a fresh snapshot from the provider.
    pub async fn fetch(
        provider: &dyn ToolProvider,
        prefix: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let specs = provider.list_tools().await?;
        Ok(Self::new(
            specs
                .into_iter()
                .map(|spec| Tool::from_spec(spec, prefix))
                .collect(),
        ))
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tools in provider order.
    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(Tool::definition).collect()
    }
}

/// `browser_navigate` → `Browser Navigate`.
fn display_name(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Parameter schema for a tool: the declared input schema when it has
/// properties, otherwise a default keyed on the tool name.
fn parameters_for(name: &str, schema: Option<&Value>) -> Value {
    let declared = schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty());
    if declared {
        if let Some(schema) = schema {
            let mut schema = schema.clone();
            if schema.get("type").is_none() {
                schema["type"] = json!("object");
            }
            return schema;
        }
    }

    if name.contains("navigate") {
        return json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to navigate to"
                }
            },
            "required": ["url"]
        });
    }

    json!({ "type": "object", "properties": {} })
}
