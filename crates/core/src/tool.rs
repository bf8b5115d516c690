//! Tool call supports.

mod error;
mod set;

use async_trait::async_trait;
use colloquy_model::ToolDeclaration;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

pub use error::{Error, ErrorKind};
pub use set::ToolSet;

/// The result of a tool call.
pub type ToolResult = Result<ToolContent, Error>;

/// The successful output of a tool call.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ToolContent {
    /// Sent back to the model.
    pub content: String,
    /// Shown to the user.
    pub display: String,
}

impl ToolContent {
    /// Creates an output that displays something else than what the model
    /// receives.
    #[inline]
    pub fn new<S1: Into<String>, S2: Into<String>>(content: S1, display: S2) -> Self {
        Self {
            content: content.into(),
            display: display.into(),
        }
    }
}

impl From<String> for ToolContent {
    #[inline]
    fn from(content: String) -> Self {
        Self {
            display: content.clone(),
            content,
        }
    }
}

impl From<&str> for ToolContent {
    #[inline]
    fn from(content: &str) -> Self {
        content.to_owned().into()
    }
}

/// A tool that can be called by the model.
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    ///
    /// See [`parameter_schema_for`] for deriving it from the input type.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// Generates the JSON schema of a tool input type.
#[inline]
pub fn parameter_schema_for<T: JsonSchema>() -> Value {
    schema_for!(T).to_value()
}

/// The set of tools a conversation can call.
///
/// Failures are returned as errors and folded into the transcript by the
/// caller, they never abort a turn.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Returns the declarations sent to the model.
    fn declarations(&self) -> Vec<ToolDeclaration>;

    /// Executes the tool named `name`.
    ///
    /// Implementations should stop early and return an error with the
    /// [`ErrorKind::Cancelled`] kind when `cancel` fires.
    async fn execute(
        &self,
        name: &str,
        args: Map<String, Value>,
        cancel: CancellationToken,
    ) -> ToolResult;
}
