//! route_to_category: unlock a group of deferred tools

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use super::{Tool, ToolError, ToolOutput};
use crate::context::ExecutionContext;

/// Unlocks the tools of one category for the rest of the run
pub struct RouteToCategoryTool {
    categories: BTreeMap<String, Vec<String>>,
    description: String,
}

impl RouteToCategoryTool {
    pub fn new(categories: BTreeMap<String, Vec<String>>) -> Self {
        let listing = categories
            .iter()
            .map(|(name, tools)| format!("{} ({})", name, tools.join(", ")))
            .collect::<Vec<_>>()
            .join("; ");
        let description = format!(
            "Unlock a category of tools for the rest of this request. Categories: {}",
            listing
        );
        Self {
            categories,
            description,
        }
    }
}

#[derive(Deserialize)]
struct RouteArgs {
    category: String,
}

#[async_trait]
impl Tool for RouteToCategoryTool {
    fn name(&self) -> &str {
        "route_to_category"
    }
    fn description(&self) -> &str {
        &self.description
    }
    fn parameters(&self) -> serde_json::Value {
        let names: Vec<&String> = self.categories.keys().collect();
        json!({
            "type": "object",
            "properties": {
                "category": { "type": "string", "enum": names, "description": "Category to unlock" }
            },
            "required": ["category"]
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError> {
        let args: RouteArgs = serde_json::from_value(args)?;
        let category = args.category.trim().to_lowercase();

        let Some(tools) = self.categories.get(&category) else {
            let known: Vec<&str> = self.categories.keys().map(String::as_str).collect();
            return Ok(ToolOutput::failure(format!(
                "unknown category '{}'. Available: {}",
                args.category,
                known.join(", ")
            )));
        };

        debug!("routing to category {}", category);
        Ok(ToolOutput::structured(json!({
            "category": category,
            "tools": tools,
            "message": format!("Tools unlocked: {}", tools.join(", "))
        }))
        .with_categories(vec![category]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> RouteToCategoryTool {
        let mut map = BTreeMap::new();
        map.insert(
            "web".to_string(),
            vec!["web_search".to_string(), "web_fetch".to_string()],
        );
        map.insert("shell".to_string(), vec!["exec".to_string()]);
        RouteToCategoryTool::new(map)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("/tmp", "cli", "direct", "cli:direct", "m")
    }

    #[tokio::test]
    async fn test_known_category_expands() {
        let out = tool()
            .execute(json!({"category": "Web"}), &ctx())
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.add_tools, Some(vec!["web".to_string()]));
    }

    #[tokio::test]
    async fn test_unknown_category_lists_known() {
        let out = tool()
            .execute(json!({"category": "email"}), &ctx())
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.add_tools.is_none());
        let err = out.error.unwrap();
        assert!(err.contains("shell"));
        assert!(err.contains("web"));
    }

    #[test]
    fn test_description_lists_tools() {
        let t = tool();
        assert!(t.description().contains("web (web_search, web_fetch)"));
        assert_eq!(t.parameters()["properties"]["category"]["enum"], json!(["shell", "web"]));
    }
}
