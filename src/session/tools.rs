//! Client-side tools the model can call during a session.

use crate::error::{Result, VoxdeskError};
use crate::session::config::ToolDeclaration;
use serde_json::Value;
use std::sync::Arc;

/// Runs one tool call and returns the JSON response for the model.
pub trait ToolHandler: Send + Sync {
    fn call(&self, args: &Value) -> Value;
}

impl<F> ToolHandler for F
where
    F: Fn(&Value) -> Value + Send + Sync,
{
    fn call(&self, args: &Value) -> Value {
        self(args)
    }
}

#[derive(Clone)]
struct RegisteredTool {
    declaration: ToolDeclaration,
    handler: Arc<dyn ToolHandler>,
}

/// Tools available to a session, in declaration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn register(mut self, declaration: ToolDeclaration, handler: impl ToolHandler + 'static) -> Self {
        self.tools
            .retain(|tool| tool.declaration.name != declaration.name);
        self.tools.push(RegisteredTool {
            declaration,
            handler: Arc::new(handler),
        });
        self
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.declaration.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.declaration.name == name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run the named tool.
    ///
    /// # Errors
    /// `VoxdeskError::Protocol` when no tool has that name.
    pub fn invoke(&self, name: &str, args: &Value) -> Result<Value> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.declaration.name == name)
            .ok_or_else(|| VoxdeskError::Protocol {
                message: format!("model called unknown tool '{}'", name),
            })?;
        Ok(tool.handler.call(args))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| &t.declaration.name))
            .finish()
    }
}
