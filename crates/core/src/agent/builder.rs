use std::sync::Arc;

use colloquy_model::ModelProvider;
use tracing::Span;

use super::{Agent, FallbackHook};
use crate::config::AgentConfig;
use crate::environment::EnvironmentContext;
use crate::model_client::ModelClient;
use crate::tool::{Tool, ToolRegistry, ToolSet};

/// [`Agent`] builder.
pub struct AgentBuilder {
    pub(crate) model_client: ModelClient,
    pub(crate) config: AgentConfig,
    pub(crate) tool_registry: Option<Arc<dyn ToolRegistry>>,
    pub(crate) tool_set: ToolSet,
    pub(crate) environment: Option<EnvironmentContext>,
    pub(crate) span: Option<Span>,
    pub(crate) on_fallback: Option<FallbackHook>,
}

impl AgentBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(provider: P) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            config: AgentConfig::default(),
            tool_registry: None,
            tool_set: ToolSet::new(),
            environment: None,
            span: None,
            on_fallback: None,
        }
    }

    /// Sets the configuration.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tool_set.add_tool(tool);
        self
    }

    /// Uses a custom tool registry. Tools added by [`with_tool`] are
    /// ignored then.
    ///
    /// [`with_tool`]: Self::with_tool
    #[inline]
    pub fn with_tool_registry<R: ToolRegistry + 'static>(mut self, registry: R) -> Self {
        self.tool_registry = Some(Arc::new(registry));
        self
    }

    /// Sets the context that precedes the conversation.
    #[inline]
    pub fn with_environment(mut self, environment: EnvironmentContext) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Sets the span that all operations of the agent are recorded in.
    #[inline]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches a callback that is asked before falling back to a cheaper
    /// model. Without it the agent never falls back.
    #[inline]
    pub fn on_fallback(
        mut self,
        on_fallback: impl FnMut(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_fallback = Some(Box::new(on_fallback));
        self
    }

    /// Builds the agent.
    #[inline]
    pub fn build(self) -> Agent {
        Agent::from_builder(self)
    }
}
