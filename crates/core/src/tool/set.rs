use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use colloquy_model::ToolDeclaration;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{Error, Tool, ToolRegistry, ToolResult};

trait ToolObject: Send + Sync + 'static {
    fn declaration(&self) -> ToolDeclaration;

    fn execute(&self, arguments: Value) -> Pin<Box<dyn Future<Output = ToolResult> + Send>>;
}

struct AnyTool<T: Tool>(T);

impl<T: Tool> ToolObject for AnyTool<T> {
    #[inline]
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.0.name().to_owned(),
            description: self.0.description().to_owned(),
            parameters: self.0.parameter_schema().clone(),
        }
    }

    fn execute(&self, arguments: Value) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolResult::Err(
                    Error::invalid_input().with_reason(reason),
                )));
            }
        };
        Box::pin(self.0.execute(input))
    }
}

/// A [`ToolRegistry`] of statically typed [`Tool`]s.
///
/// Declarations are listed in name order.
#[derive(Default)]
pub struct ToolSet {
    tools: BTreeMap<String, Box<dyn ToolObject>>,
}

impl ToolSet {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, replacing any tool with the same name.
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if self.tools.insert(name, Box::new(AnyTool(tool))).is_some() {
            debug!("replaced a tool with the same name");
        }
    }

    /// Registers a tool and returns the set.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.add_tool(tool);
        self
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if there are no tools.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolRegistry for ToolSet {
    fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.values().map(|tool| tool.declaration()).collect()
    }

    async fn execute(
        &self,
        name: &str,
        args: Map<String, Value>,
        cancel: CancellationToken,
    ) -> ToolResult {
        let Some(tool) = self.tools.get(name) else {
            warn!("tool not found: {name}");
            return Err(Error::not_found().with_reason(format!("no tool named `{name}`")));
        };

        trace!("executing a tool ({name}) with args: {args:?}");
        let fut = tool
            .execute(Value::Object(args))
            .instrument(debug_span!("tool execute", tool = name));
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::cancelled()),
            result = fut => result,
        }
    }
}
