/// Context window assumed for models missing from the table.
pub const DEFAULT_TOKEN_LIMIT: u64 = 1_048_576;

/// Returns the context window of `model`, in tokens.
///
/// Matching is by prefix, so dated or suffixed variants (`gpt-4o-mini`,
/// `gemini-1.5-pro-002`) share the limit of their family.
pub fn token_limit(model: &str) -> u64 {
    let model = model.strip_prefix("models/").unwrap_or(model);
    if model.starts_with("gemini-1.5-pro") {
        2_097_152
    } else if model.starts_with("gemini-") {
        1_048_576
    } else if model.starts_with("gpt-4.1") {
        1_047_576
    } else if model.starts_with("gpt-4o") {
        128_000
    } else {
        DEFAULT_TOKEN_LIMIT
    }
}
