use std::fs;
use std::path::Path;

use colloquy_core::tool::{Error as ToolError, Tool, ToolContent, ToolResult};
use glob::Pattern;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::spawn_blocking;

const MAX_ENTRIES: usize = 200;

#[derive(Deserialize, JsonSchema)]
pub struct ListFilesParameters {
    #[schemars(description = "Absolute path to the directory to list.")]
    path: String,
    #[schemars(
        description = "Optional glob pattern, e.g. `*.rs`. Only matching names are listed."
    )]
    pattern: Option<String>,
}

/// A tool for listing the entries of a directory.
pub struct ListFilesTool {
    parameter_schema: Value,
}

impl ListFilesTool {
    /// Creates a new list files tool.
    #[inline]
    pub fn new() -> Self {
        ListFilesTool {
            parameter_schema: schema_for!(ListFilesParameters).to_value(),
        }
    }
}

impl Default for ListFilesTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for ListFilesTool {
    type Input = ListFilesParameters;

    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        r#"
Lists the files and directories directly inside a directory, sorted by name.
Directories are suffixed with `/`. Returns up to 200 entries."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: ListFilesParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            if !Path::new(&input.path).is_absolute() {
                return Err(ToolError::invalid_input().with_reason("`path` must be absolute"));
            }
            let pattern = match input.pattern.as_deref().map(Pattern::new) {
                Some(Ok(pattern)) => Some(pattern),
                Some(Err(err)) => {
                    return Err(ToolError::invalid_input().with_reason(err.to_string()));
                }
                None => None,
            };

            let entries = spawn_blocking(move || list_dir(&input.path, pattern.as_ref()))
                .await
                .map_err(|_| ToolError::execution_error().with_reason("Failed to list files"))??;

            let display = format!("Found {} entries", entries.len());
            let truncated = entries.len() > MAX_ENTRIES;
            let mut content = entries
                .into_iter()
                .take(MAX_ENTRIES)
                .collect::<Vec<_>>()
                .join("\n");
            if truncated {
                content.push_str("\n(more entries omitted)");
            }
            Ok(ToolContent::new(content, display))
        }
    }
}

fn list_dir(path: &str, pattern: Option<&Pattern>) -> Result<Vec<String>, ToolError> {
    let read_dir = fs::read_dir(path)
        .map_err(|err| ToolError::execution_error().with_reason(err.to_string()))?;

    let mut entries = vec![];
    for entry in read_dir {
        let entry =
            entry.map_err(|err| ToolError::execution_error().with_reason(err.to_string()))?;
        let mut name = entry.file_name().to_string_lossy().into_owned();
        if pattern.is_some_and(|pattern| !pattern.matches(&name)) {
            continue;
        }
        if entry.file_type().is_ok_and(|ty| ty.is_dir()) {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();
    Ok(entries)
}
