//! Workspace file tools: read, list, write, edit

use crate::tools::permissions::PermissionRequest;
use crate::tools::registry::Tool;
use crate::tools::types::{
    PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use walkdir::WalkDir;

/// Lines returned by read_file when no limit is given
const DEFAULT_READ_LIMIT: usize = 2000;
/// Entries returned by list_files before truncating
const MAX_LIST_ENTRIES: usize = 1000;

fn object_schema(properties: HashMap<String, PropertySchema>, required: &[&str]) -> ToolInputSchema {
    ToolInputSchema {
        schema_type: "object".to_string(),
        properties,
        required: required.iter().map(|r| r.to_string()).collect(),
    }
}

/// Permission request for a tool that writes `params.path`
fn write_request(params: &Value, context: &ToolContext, verb: &str) -> Option<PermissionRequest> {
    let raw = params.get("path")?.as_str()?;
    let path = context.resolve_path(raw).ok()?;
    let description = format!("{} {}", verb, context.display_path(&path));
    Some(PermissionRequest::file_write(path, description))
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub struct ReadFileTool {
    definition: ToolDefinition,
}

impl ReadFileTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "path".to_string(),
            PropertySchema::string("Path of the file, relative to the workspace root"),
        );
        properties.insert(
            "offset".to_string(),
            PropertySchema::integer("1-based line to start reading from").with_default(json!(1)),
        );
        properties.insert(
            "limit".to_string(),
            PropertySchema::integer("Maximum number of lines to return")
                .with_default(json!(DEFAULT_READ_LIMIT)),
        );

        ReadFileTool {
            definition: ToolDefinition {
                name: "read_file".to_string(),
                description: "Read a text file from the workspace. Output lines are prefixed with their line number.".to_string(),
                input_schema: object_schema(properties, &["path"]),
                group: ToolGroup::Filesystem,
            },
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: ReadFileParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        let path = match context.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::error(format!("Failed to read {}: {}", params.path, e))
            }
        };

        let offset = params.offset.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_READ_LIMIT);
        let total = content.lines().count();

        let mut output = String::new();
        for (i, line) in content.lines().enumerate().skip(offset - 1).take(limit) {
            output.push_str(&format!("{:>6}\t{}\n", i + 1, line));
        }
        let shown_end = (offset - 1 + limit).min(total);
        if shown_end < total {
            output.push_str(&format!(
                "... ({} more lines, continue with offset {})\n",
                total - shown_end,
                shown_end + 1
            ));
        }

        ToolResult::success(output)
            .with_title(format!("Read {}", context.display_path(&path)))
            .with_metadata(json!({ "path": params.path, "lines": total }))
    }
}

// ---------------------------------------------------------------------------
// list_files
// ---------------------------------------------------------------------------

pub struct ListFilesTool {
    definition: ToolDefinition,
}

impl ListFilesTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "path".to_string(),
            PropertySchema::string("Directory to list, relative to the workspace root")
                .with_default(json!(".")),
        );
        properties.insert(
            "recursive".to_string(),
            PropertySchema::boolean("List subdirectories too").with_default(json!(false)),
        );
        properties.insert(
            "max_depth".to_string(),
            PropertySchema::integer("Maximum depth when recursive").with_default(json!(4)),
        );

        ListFilesTool {
            definition: ToolDefinition {
                name: "list_files".to_string(),
                description: "List files and directories in the workspace. Directories end with '/'. Hidden entries and build output (.git, target, node_modules) are skipped.".to_string(),
                input_schema: object_schema(properties, &[]),
                group: ToolGroup::Filesystem,
            },
        }
    }
}

impl Default for ListFilesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ListFilesParams {
    #[serde(default = "default_dir")]
    path: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    max_depth: Option<usize>,
}

fn default_dir() -> String {
    ".".to_string()
}

/// Entries no tool should descend into
pub(crate) fn is_ignored_dir(name: &str) -> bool {
    (name.starts_with('.') && name != "." && name != "..")
        || matches!(name, "target" | "node_modules")
}

#[async_trait]
impl Tool for ListFilesTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: ListFilesParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        let root = match context.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        if !root.is_dir() {
            return ToolResult::error(format!("Not a directory: {}", params.path));
        }

        let depth = if params.recursive {
            params.max_depth.unwrap_or(4).max(1)
        } else {
            1
        };

        let mut entries = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(&e.file_name().to_string_lossy()));

        for entry in walker.flatten() {
            if entries.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if entry.file_type().is_dir() {
                entries.push(format!("{}/", rel));
            } else {
                entries.push(rel);
            }
        }

        let count = entries.len();
        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n... (truncated at {} entries)", MAX_LIST_ENTRIES));
        }
        if count == 0 {
            output = "(empty directory)".to_string();
        }

        ToolResult::success(output)
            .with_title(format!("Listed {}", params.path))
            .with_metadata(json!({ "count": count, "truncated": truncated }))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub struct WriteFileTool {
    definition: ToolDefinition,
}

impl WriteFileTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "path".to_string(),
            PropertySchema::string("Path of the file, relative to the workspace root"),
        );
        properties.insert(
            "content".to_string(),
            PropertySchema::string("Full new content of the file"),
        );

        WriteFileTool {
            definition: ToolDefinition {
                name: "write_file".to_string(),
                description: "Create or overwrite a file in the workspace. Parent directories are created as needed.".to_string(),
                input_schema: object_schema(properties, &["path", "content"]),
                group: ToolGroup::Filesystem,
            },
        }
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn permission_request(&self, params: &Value, context: &ToolContext) -> Option<PermissionRequest> {
        write_request(params, context, "Write")
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: WriteFileParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        let path = match context.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create {}: {}", parent.display(), e));
            }
        }

        let existed = path.exists();
        if let Err(e) = tokio::fs::write(&path, &params.content).await {
            return ToolResult::error(format!("Failed to write {}: {}", params.path, e));
        }

        let display = context.display_path(&path);
        let metadata = json!({
            "path": display,
            "bytes": params.content.len(),
            "created": !existed,
        });
        context.emit_metadata("write_file", metadata.clone());

        ToolResult::success(format!(
            "Wrote {} bytes to {}",
            params.content.len(),
            display
        ))
        .with_title(format!("Wrote {}", display))
        .with_metadata(metadata)
    }
}

// ---------------------------------------------------------------------------
// edit_file
// ---------------------------------------------------------------------------

pub struct EditFileTool {
    definition: ToolDefinition,
}

impl EditFileTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "path".to_string(),
            PropertySchema::string("Path of the file, relative to the workspace root"),
        );
        properties.insert(
            "old_string".to_string(),
            PropertySchema::string("Exact text to replace. Must appear exactly once in the file."),
        );
        properties.insert(
            "new_string".to_string(),
            PropertySchema::string("Replacement text"),
        );

        EditFileTool {
            definition: ToolDefinition {
                name: "edit_file".to_string(),
                description: "Replace one exact occurrence of old_string with new_string in a file. Include enough surrounding context to make old_string unique.".to_string(),
                input_schema: object_schema(properties, &["path", "old_string", "new_string"]),
                group: ToolGroup::Filesystem,
            },
        }
    }
}

impl Default for EditFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct EditFileParams {
    path: String,
    old_string: String,
    new_string: String,
}

#[async_trait]
impl Tool for EditFileTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn permission_request(&self, params: &Value, context: &ToolContext) -> Option<PermissionRequest> {
        write_request(params, context, "Edit")
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: EditFileParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        if params.old_string.is_empty() {
            return ToolResult::error("old_string must not be empty");
        }
        if params.old_string == params.new_string {
            return ToolResult::error("old_string and new_string are identical");
        }

        let path = match context.resolve_path(&params.path) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                return ToolResult::error(format!("Failed to read {}: {}", params.path, e))
            }
        };

        match content.matches(params.old_string.as_str()).count() {
            0 => return ToolResult::error(format!("old_string not found in {}", params.path)),
            1 => {}
            n => {
                return ToolResult::error(format!(
                    "old_string appears {} times in {}; add more context to make it unique",
                    n, params.path
                ))
            }
        }

        let updated = content.replacen(&params.old_string, &params.new_string, 1);
        if let Err(e) = tokio::fs::write(&path, &updated).await {
            return ToolResult::error(format!("Failed to write {}: {}", params.path, e));
        }

        let display = context.display_path(&path);
        let metadata = json!({
            "path": display,
            "removed_lines": params.old_string.lines().count(),
            "added_lines": params.new_string.lines().count(),
        });
        context.emit_metadata("edit_file", metadata.clone());

        ToolResult::success(format!("Edited {}", display))
            .with_title(format!("Edited {}", display))
            .with_metadata(metadata)
    }
}
