use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use super::schema::validate_arguments;
use super::{Tool, ToolCall, ToolContext, ToolDescriptor, ToolError, ToolResult};

/// Name-keyed set of tools owned by one executor. Populated before the first
/// conversation is served.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), ToolError> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateName(descriptor.name));
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn register_tool(&mut self, tool: impl Tool + 'static) -> Result<(), ToolError> {
        self.register(ToolDescriptor::local(tool))
    }

    pub fn get(&self, name: &str) -> Result<&ToolDescriptor, ToolError> {
        self.tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    pub fn get_schemas(&self) -> Vec<Value> {
        self.names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(ToolDescriptor::schema)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Looks the tool up, validates the arguments against its schema and runs
    /// it once under `timeout`.
    pub async fn execute(
        &self,
        tool_call: &ToolCall,
        context: &ToolContext,
        timeout: Duration,
    ) -> Result<ToolResult, ToolError> {
        let descriptor = self.get(&tool_call.name)?;

        validate_arguments(&descriptor.parameters, &tool_call.params).map_err(|reason| {
            ToolError::InvalidArguments {
                tool: descriptor.name.clone(),
                reason,
            }
        })?;

        let run = descriptor
            .callable()
            .execute(tool_call.params.clone(), context);

        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(ToolError::Execution {
                tool: descriptor.name.clone(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: descriptor.name.clone(),
                after: timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::echo::EchoTool;
    use serde_json::json;

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool::new()).unwrap();

        let err = registry.register_tool(EchoTool::new()).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateName(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_is_exact() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool::new()).unwrap();

        assert!(registry.get("echo").is_ok());
        assert!(matches!(registry.get("Echo"), Err(ToolError::UnknownTool(_))));
    }

    #[tokio::test]
    async fn test_execute_validates_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool::new()).unwrap();

        let call = ToolCall {
            name: "echo".to_string(),
            params: json!({"message": "hi"}),
        };
        let err = registry
            .execute(&call, &ToolContext::default(), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_schemas_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register_tool(crate::tools::report_progress::ReportProgressTool::new())
            .unwrap();
        registry.register_tool(EchoTool::new()).unwrap();

        let names: Vec<String> = registry
            .get_schemas()
            .iter()
            .map(|s| s["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["echo", "report_progress"]);
    }
}
