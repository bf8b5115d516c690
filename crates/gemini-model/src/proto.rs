use colloquy_model::{
    FinishReason, Message, ModelRequest, Part as ModelPart, Role,
    ToolDeclaration, ToolOutput, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

// -------------------------------
// Types shared in both directions
// -------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: Value,
}

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountTokensResponse {
    pub total_tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct BatchEmbedResponse {
    pub embeddings: Vec<ContentEmbedding>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ContentEmbedding {
    pub values: Vec<f32>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "GenerationConfig::is_empty")]
    generation_config: GenerationConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        self == &GenerationConfig::default()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CountTokensRequest {
    contents: Vec<Content>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchEmbedRequest {
    requests: Vec<EmbedContentRequest>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
struct EmbedContentRequest {
    model: String,
    content: Content,
}

// -----------
// Conversions
// -----------

pub fn create_request(req: &ModelRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: create_contents(&req.messages),
        system_instruction: req
            .config
            .system_instruction
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| Content {
                role: None,
                parts: vec![text_part(s.clone())],
            }),
        tools: if req.tools.is_empty() {
            vec![]
        } else {
            vec![Tool {
                function_declarations: req
                    .tools
                    .iter()
                    .map(create_declaration)
                    .collect(),
            }]
        },
        generation_config: GenerationConfig {
            temperature: req.config.temperature,
            max_output_tokens: req.config.max_output_tokens,
            response_mime_type: None,
            response_schema: None,
        },
    }
}

pub fn create_json_request(
    req: &ModelRequest,
    schema: &Value,
) -> GenerateContentRequest {
    let mut gemini_req = create_request(req);
    // Structured output and function calling cannot be combined.
    gemini_req.tools.clear();
    gemini_req.generation_config.response_mime_type = Some("application/json");
    gemini_req.generation_config.response_schema = Some(schema.clone());
    gemini_req
}

pub fn create_count_tokens_request(messages: &[Message]) -> CountTokensRequest {
    CountTokensRequest {
        contents: create_contents(messages),
    }
}

pub fn create_embed_request(model: &str, texts: &[String]) -> BatchEmbedRequest {
    let model = format!("models/{model}");
    BatchEmbedRequest {
        requests: texts
            .iter()
            .map(|text| EmbedContentRequest {
                model: model.clone(),
                content: Content {
                    role: None,
                    parts: vec![text_part(text.clone())],
                },
            })
            .collect(),
    }
}

/// Converts the transcript. Roles map one to one, empty messages are
/// skipped since the backend rejects contents without parts.
fn create_contents(messages: &[Message]) -> Vec<Content> {
    messages
        .iter()
        .filter_map(|msg| {
            let parts: Vec<Part> =
                msg.parts.iter().filter_map(create_part).collect();
            if parts.is_empty() {
                return None;
            }
            let role = match msg.role {
                Role::User => "user",
                Role::Model => "model",
            };
            Some(Content {
                role: Some(role.to_owned()),
                parts,
            })
        })
        .collect()
}

fn create_part(part: &ModelPart) -> Option<Part> {
    match part {
        ModelPart::Text(text) if text.is_empty() => None,
        ModelPart::Text(text) => Some(text_part(text.clone())),
        ModelPart::ToolCall(call) => Some(Part {
            function_call: Some(FunctionCall {
                id: (!call.id.is_empty()).then(|| call.id.clone()),
                name: call.name.clone(),
                args: call.args.clone(),
            }),
            ..Default::default()
        }),
        ModelPart::ToolResult(result) => {
            let response = match &result.output {
                ToolOutput::Success(content) => json!({ "output": content }),
                ToolOutput::Error(message) => json!({ "error": message }),
            };
            Some(Part {
                function_response: Some(FunctionResponse {
                    id: (!result.tool_call_id.is_empty())
                        .then(|| result.tool_call_id.clone()),
                    name: result.name.clone(),
                    response,
                }),
                ..Default::default()
            })
        }
    }
}

#[inline]
fn text_part(text: String) -> Part {
    Part {
        text: Some(text),
        ..Default::default()
    }
}

#[inline]
fn create_declaration(tool: &ToolDeclaration) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

#[inline]
pub fn map_finish_reason(reason: &str, has_tool_calls: bool) -> FinishReason {
    match reason {
        "STOP" if has_tool_calls => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        _ => FinishReason::Other,
    }
}

#[inline]
pub fn map_usage(usage: UsageMetadata) -> Usage {
    Usage {
        input_tokens: usage.prompt_token_count,
        output_tokens: usage.candidates_token_count,
    }
}
