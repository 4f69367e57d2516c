//! Workspace search: glob patterns and regex content search

use super::fs::is_ignored_dir;
use crate::tools::registry::Tool;
use crate::tools::types::{
    PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult,
};
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MAX_GLOB_RESULTS: usize = 500;
const DEFAULT_GREP_RESULTS: usize = 200;
/// Files larger than this are not searched
const MAX_GREP_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Walk `root`, skipping hidden and build directories, yielding files only
fn workspace_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(&e.file_name().to_string_lossy()))
        .flatten()
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    }
}

/// Bare file patterns like `*.rs` match at any depth
fn compile_glob(raw: &str) -> Result<Pattern, String> {
    let pattern = if raw.contains('/') {
        raw.to_string()
    } else {
        format!("**/{}", raw)
    };
    Pattern::new(&pattern).map_err(|e| format!("Invalid glob pattern '{}': {}", raw, e))
}

// ---------------------------------------------------------------------------
// glob
// ---------------------------------------------------------------------------

pub struct GlobTool {
    definition: ToolDefinition,
}

impl GlobTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "pattern".to_string(),
            PropertySchema::string("Glob pattern such as '**/*.rs' or 'src/*.toml'. Bare patterns match at any depth."),
        );
        properties.insert(
            "path".to_string(),
            PropertySchema::string("Directory to search from, relative to the workspace root")
                .with_default(json!(".")),
        );

        GlobTool {
            definition: ToolDefinition {
                name: "glob".to_string(),
                description: "Find files by name pattern. Returns workspace-relative paths.".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["pattern".to_string()],
                },
                group: ToolGroup::Search,
            },
        }
    }
}

impl Default for GlobTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GlobParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: GlobParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        let pattern = match compile_glob(&params.pattern) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let root = match context.resolve_path(params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };

        let options = match_options();
        let mut matches = Vec::new();
        let mut truncated = false;
        for path in workspace_files(&root) {
            let rel = path.strip_prefix(&root).unwrap_or(&path);
            if pattern.matches_path_with(rel, options) {
                if matches.len() >= MAX_GLOB_RESULTS {
                    truncated = true;
                    break;
                }
                matches.push(context.display_path(&path));
            }
        }

        log::debug!("[TOOLS] glob '{}' matched {} file(s)", params.pattern, matches.len());

        let count = matches.len();
        let mut output = if matches.is_empty() {
            format!("No files match '{}'", params.pattern)
        } else {
            matches.join("\n")
        };
        if truncated {
            output.push_str(&format!("\n... (truncated at {} results)", MAX_GLOB_RESULTS));
        }

        ToolResult::success(output)
            .with_title(format!("Glob {}", params.pattern))
            .with_metadata(json!({ "count": count, "truncated": truncated }))
    }
}

// ---------------------------------------------------------------------------
// grep
// ---------------------------------------------------------------------------

pub struct GrepTool {
    definition: ToolDefinition,
}

impl GrepTool {
    pub fn new() -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "pattern".to_string(),
            PropertySchema::string("Regular expression to search for"),
        );
        properties.insert(
            "path".to_string(),
            PropertySchema::string("Directory or file to search, relative to the workspace root")
                .with_default(json!(".")),
        );
        properties.insert(
            "include".to_string(),
            PropertySchema::string("Only search files matching this glob, e.g. '*.rs'"),
        );
        properties.insert(
            "case_insensitive".to_string(),
            PropertySchema::boolean("Ignore case").with_default(json!(false)),
        );
        properties.insert(
            "max_results".to_string(),
            PropertySchema::integer("Maximum matching lines to return")
                .with_default(json!(DEFAULT_GREP_RESULTS)),
        );

        GrepTool {
            definition: ToolDefinition {
                name: "grep".to_string(),
                description: "Search file contents with a regular expression. Returns path:line: text for each match.".to_string(),
                input_schema: ToolInputSchema {
                    schema_type: "object".to_string(),
                    properties,
                    required: vec!["pattern".to_string()],
                },
                group: ToolGroup::Search,
            },
        }
    }
}

impl Default for GrepTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct GrepParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    include: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    max_results: Option<usize>,
}

#[async_trait]
impl Tool for GrepTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, context: &ToolContext) -> ToolResult {
        let params: GrepParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };

        let regex = match RegexBuilder::new(&params.pattern)
            .case_insensitive(params.case_insensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("Invalid regex '{}': {}", params.pattern, e)),
        };
        let include = match params.include.as_deref().map(compile_glob).transpose() {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let root = match context.resolve_path(params.path.as_deref().unwrap_or(".")) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let max_results = params.max_results.unwrap_or(DEFAULT_GREP_RESULTS).max(1);

        let files: Vec<PathBuf> = if root.is_file() {
            vec![root.clone()]
        } else {
            workspace_files(&root).collect()
        };

        let options = match_options();
        let mut lines = Vec::new();
        let mut files_matched = 0usize;
        let mut truncated = false;

        'files: for path in files {
            if context.cancel.is_cancelled() {
                break;
            }
            if let Some(ref include) = include {
                let rel = path.strip_prefix(&root).unwrap_or(&path);
                if !include.matches_path_with(rel, options) {
                    continue;
                }
            }
            let too_big = std::fs::metadata(&path)
                .map(|m| m.len() > MAX_GREP_FILE_BYTES)
                .unwrap_or(true);
            if too_big {
                continue;
            }
            // Binary and non-UTF-8 files are skipped
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };

            let display = context.display_path(&path);
            let mut hit = false;
            for (i, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    if lines.len() >= max_results {
                        truncated = true;
                        break 'files;
                    }
                    hit = true;
                    lines.push(format!("{}:{}: {}", display, i + 1, line.trim_end()));
                }
            }
            if hit {
                files_matched += 1;
            }
        }

        let count = lines.len();
        let mut output = if lines.is_empty() {
            format!("No matches for '{}'", params.pattern)
        } else {
            lines.join("\n")
        };
        if truncated {
            output.push_str(&format!("\n... (truncated at {} matches)", max_results));
        }

        ToolResult::success(output)
            .with_title(format!("Grep {}", params.pattern))
            .with_metadata(json!({
                "matches": count,
                "files": files_matched,
                "truncated": truncated,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/ai")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {\n    run();\n}\n").unwrap();
        std::fs::write(dir.path().join("src/ai/loop.rs"), "pub fn run() {}\n// TODO: Run faster\n").unwrap();
        std::fs::write(dir.path().join("target/debug/run.rs"), "fn run() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "run it\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_glob_bare_pattern_matches_any_depth() {
        let dir = workspace();
        let ctx = ToolContext::new().with_workspace(dir.path());
        let result = GlobTool::new().execute(json!({"pattern": "*.rs"}), &ctx).await;
        assert!(result.success);
        assert_eq!(result.output, "src/ai/loop.rs\nsrc/main.rs");
    }

    #[tokio::test]
    async fn test_glob_no_match() {
        let dir = workspace();
        let ctx = ToolContext::new().with_workspace(dir.path());
        let result = GlobTool::new().execute(json!({"pattern": "*.py"}), &ctx).await;
        assert!(result.output.starts_with("No files match"));
    }

    #[tokio::test]
    async fn test_grep_with_include_and_case() {
        let dir = workspace();
        let ctx = ToolContext::new().with_workspace(dir.path());
        let result = GrepTool::new()
            .execute(
                json!({"pattern": "run", "include": "*.rs", "case_insensitive": true}),
                &ctx,
            )
            .await;
        assert!(result.success);
        assert!(result.output.contains("src/main.rs:2:     run();"));
        assert!(result.output.contains("src/ai/loop.rs:2: // TODO: Run faster"));
        assert!(!result.output.contains("README.md"));
        assert!(!result.output.contains("target"));
        assert_eq!(result.metadata.unwrap()["files"], 2);
    }

    #[tokio::test]
    async fn test_grep_invalid_regex() {
        let dir = workspace();
        let ctx = ToolContext::new().with_workspace(dir.path());
        let result = GrepTool::new().execute(json!({"pattern": "("}), &ctx).await;
        assert!(!result.success);
        assert!(result.output.starts_with("Invalid regex"));
    }

    #[tokio::test]
    async fn test_grep_truncates() {
        let dir = workspace();
        let ctx = ToolContext::new().with_workspace(dir.path());
        let result = GrepTool::new()
            .execute(json!({"pattern": "run", "max_results": 1}), &ctx)
            .await;
        assert!(result.output.contains("truncated at 1 matches"));
    }
}
