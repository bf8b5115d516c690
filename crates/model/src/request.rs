use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Message;

/// A request to be sent to the model provider.
///
/// The request always carries the complete conversation. Backends with
/// native multi-turn state are free to ignore the parts they already know,
/// others must resend everything.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// Identifier of the model to sample from.
    pub model: String,
    /// The input messages.
    pub messages: Vec<Message>,
    /// Sampling parameters and instructions.
    pub config: GenerationConfig,
    /// Tools that are available to the model.
    pub tools: Vec<ToolDeclaration>,
}

/// Generation parameters shared by all backends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Upper bound of generated tokens.
    pub max_output_tokens: Option<u32>,
    /// The system instructions.
    pub system_instruction: Option<String>,
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    pub parameters: Value,
}
