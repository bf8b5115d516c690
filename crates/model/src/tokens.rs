use crate::{Message, Part};

/// Characters per token assumed by [`estimate_token_count`].
pub const CHARS_PER_TOKEN: usize = 4;

/// Approximates the token count of `messages`.
///
/// Text parts count their characters, tool calls count their name and
/// serialized arguments, tool results count their payload. The total is
/// divided by [`CHARS_PER_TOKEN`], rounding up. The value is advisory only.
pub fn estimate_token_count(messages: &[Message]) -> u64 {
    let chars: usize = messages
        .iter()
        .flat_map(|msg| msg.parts.iter())
        .map(|part| match part {
            Part::Text(text) => text.chars().count(),
            Part::ToolCall(call) => {
                let args = serde_json::to_string(&call.args).unwrap_or_default();
                call.name.chars().count() + args.chars().count()
            }
            Part::ToolResult(result) => result.output.as_str().chars().count(),
        })
        .sum();
    chars.div_ceil(CHARS_PER_TOKEN) as u64
}
