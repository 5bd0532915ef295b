//! Tool definition and registry.
//!
//! The core does not implement tools; it consumes them through [`Tool`].
//! A [`ToolRegistry`] collects the tools a client offers to the model and
//! is read-only once handed to the scheduler.
//!
//! # Implementing a Tool
//!
//! ```ignore
//! use agent_core::{Tool, ToolResult};
//!
//! struct ListFiles;
//!
//! #[async_trait]
//! impl Tool for ListFiles {
//!     fn name(&self) -> &str { "list_files" }
//!     fn description(&self) -> &str { "Lists files in a directory" }
//!     fn parameter_schema(&self) -> Value { json!({ "type": "object" }) }
//!
//!     async fn execute(&self, args: Value, cancel: CancellationToken) -> Result<ToolResult> {
//!         Ok(ToolResult::new("a.rs\nb.rs"))
//!     }
//! }
//! ```

use crate::llm::FunctionDeclaration;
use crate::types::ToolResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What kind of action the operator is asked to approve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    /// File modification
    Edit,
    /// Shell command
    Exec,
    /// Anything else, e.g. a network fetch
    Info,
}

/// Descriptor returned by [`Tool::should_confirm_execute`] when a call needs
/// approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDetails {
    pub kind: ConfirmationKind,
    pub title: String,
    /// Free-form text shown to the operator (diff, command line, URL)
    pub prompt: String,
}

impl ConfirmationDetails {
    #[must_use]
    pub fn new(kind: ConfirmationKind, title: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            prompt: prompt.into(),
        }
    }
}

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Human-readable name for UI. Defaults to [`Tool::name`].
    fn display_name(&self) -> &str {
        self.name()
    }

    fn description(&self) -> &str;

    /// JSON schema for the tool's arguments.
    fn parameter_schema(&self) -> Value;

    /// Whether running the tool mutates files in a way worth checkpointing.
    fn is_restorable(&self) -> bool {
        false
    }

    /// Files the call will touch. Defaults to the `file_path` argument.
    fn affected_paths(&self, args: &Value) -> Vec<PathBuf> {
        args.get("file_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .into_iter()
            .collect()
    }

    /// Reject malformed arguments before anything else happens.
    ///
    /// # Errors
    /// Returns a message for the model describing what is wrong.
    fn validate_args(&self, args: &Value) -> Result<(), String> {
        let _ = args;
        Ok(())
    }

    /// Return details when the call needs operator approval, `None` to run
    /// it directly.
    async fn should_confirm_execute(
        &self,
        args: &Value,
        cancel: &CancellationToken,
    ) -> Option<ConfirmationDetails> {
        let _ = (args, cancel);
        None
    }

    /// Run the tool.
    ///
    /// # Errors
    /// Returns an error if execution fails. The error is reported to the
    /// model and does not affect other calls in the batch.
    async fn execute(&self, args: Value, cancel: CancellationToken) -> Result<ToolResult>;
}

/// Registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced.
    pub fn register<T>(&mut self, tool: T) -> &mut Self
    where
        T: Tool + 'static,
    {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_owned();
        if self.tools.insert(name.clone(), tool).is_some() {
            log::warn!("Tool registered twice, keeping the latest tool={name}");
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Remove tools whose name fails `predicate`.
    pub fn filter<F>(&mut self, predicate: F)
    where
        F: Fn(&str) -> bool,
    {
        self.tools.retain(|name, _| predicate(name));
    }

    /// Declarations for every tool, sorted by name.
    #[must_use]
    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        let mut declarations: Vec<_> = self
            .tools
            .values()
            .map(|tool| FunctionDeclaration {
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                parameters: tool.parameter_schema(),
            })
            .collect();
        declarations.sort_by(|a, b| a.name.cmp(&b.name));
        declarations
    }
}
