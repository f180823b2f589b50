//! Tool definitions for the review protocol.
//!
//! The model gets exactly one tool: fetching full file contents for paths
//! that exist in the commit under review. The path list is baked into the
//! tool schema as a closed enum so the model cannot ask for arbitrary files.

use serde::{Deserialize, Serialize};

pub const FILE_CONTENTS_TOOL: &str = "get_file_contents";

/// Tool definition sent to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: &'static str,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// A tool call from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as on the wire.
    pub arguments: String,
}

/// Arguments accepted by `get_file_contents`.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchArgs {
    pub files: Vec<String>,
}

/// Build the `get_file_contents` definition for one commit: `paths` are
/// the files present in the commit's tree.
pub fn file_contents_tool(paths: &[String]) -> ToolDefinition {
    ToolDefinition {
        tool_type: "function",
        function: FunctionDefinition {
            name: FILE_CONTENTS_TOOL,
            strict: Some(true),
            description: "Fetch the full contents of files from the commit under review. \
                          Only paths listed in the schema exist.",
            parameters: serde_json::json!({
                "type": "object",
                "required": ["files"],
                "additionalProperties": false,
                "properties": {
                    "files": {
                        "type": "array",
                        "description": "Repository-relative paths to fetch",
                        "items": { "type": "string", "enum": paths }
                    }
                }
            }),
        },
    }
}

/// Parse the arguments of a `get_file_contents` call.
pub fn parse_fetch_args(call: &ToolCall) -> anyhow::Result<FetchArgs> {
    if call.function.name != FILE_CONTENTS_TOOL {
        anyhow::bail!("Unknown tool '{}'", call.function.name);
    }
    let args: FetchArgs = serde_json::from_str(&call.function.arguments)
        .map_err(|e| anyhow::anyhow!("Invalid {} arguments: {}", FILE_CONTENTS_TOOL, e))?;
    Ok(args)
}

/// Keep only the requested paths that actually exist in the commit.
/// Hallucinated paths are dropped silently; the fetch output notes misses.
pub fn filter_known_paths(requested: &[String], known: &[String]) -> Vec<String> {
    requested
        .iter()
        .filter(|path| known.iter().any(|k| k == *path))
        .cloned()
        .collect()
}
