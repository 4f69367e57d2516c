use crate::ai::multi_agent::conflicts::FileClaim;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool groups for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolGroup {
    #[default]
    Filesystem,
    Search,
    Exec,
    System,
}

impl ToolGroup {
    pub fn all() -> Vec<ToolGroup> {
        vec![
            ToolGroup::Filesystem,
            ToolGroup::Search,
            ToolGroup::Exec,
            ToolGroup::System,
        ]
    }

    pub fn from_str(s: &str) -> Option<ToolGroup> {
        match s.to_lowercase().as_str() {
            "filesystem" | "fs" => Some(ToolGroup::Filesystem),
            "search" => Some(ToolGroup::Search),
            "exec" | "shell" => Some(ToolGroup::Exec),
            "system" => Some(ToolGroup::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolGroup::Filesystem => "filesystem",
            ToolGroup::Search => "search",
            ToolGroup::Exec => "exec",
            ToolGroup::System => "system",
        }
    }
}

/// Tool profiles for quick configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolProfile {
    /// No tools enabled
    None,
    /// Filesystem reads and search only (write tools are still filtered by the gate)
    ReadOnly,
    /// Filesystem + search + exec
    #[default]
    Standard,
    /// All tools enabled, including delegation
    Full,
    /// Custom configuration
    Custom,
}

impl ToolProfile {
    pub fn allowed_groups(&self) -> Vec<ToolGroup> {
        match self {
            ToolProfile::None => vec![],
            ToolProfile::ReadOnly => vec![ToolGroup::Filesystem, ToolGroup::Search],
            ToolProfile::Standard => vec![ToolGroup::Filesystem, ToolGroup::Search, ToolGroup::Exec],
            ToolProfile::Full => ToolGroup::all(),
            ToolProfile::Custom => vec![], // Custom profile uses explicit allow/deny lists
        }
    }

    pub fn from_str(s: &str) -> Option<ToolProfile> {
        match s.to_lowercase().as_str() {
            "none" => Some(ToolProfile::None),
            "readonly" | "read_only" => Some(ToolProfile::ReadOnly),
            "standard" => Some(ToolProfile::Standard),
            "full" => Some(ToolProfile::Full),
            "custom" => Some(ToolProfile::Custom),
            _ => None,
        }
    }
}

/// JSON Schema property definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl PropertySchema {
    pub fn string(description: impl Into<String>) -> Self {
        Self::typed("string", description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::typed("integer", description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::typed("boolean", description)
    }

    pub fn typed(schema_type: &str, description: impl Into<String>) -> Self {
        PropertySchema {
            schema_type: schema_type.to_string(),
            description: description.into(),
            default: None,
            items: None,
            enum_values: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn array_of(description: impl Into<String>, items: PropertySchema) -> Self {
        let mut schema = Self::typed("array", description);
        schema.items = Some(Box::new(items));
        schema
    }

    /// Render as a JSON Schema fragment
    pub fn to_json_schema(&self) -> Value {
        let mut map = serde_json::Map::new();
        map.insert("type".to_string(), Value::String(self.schema_type.clone()));
        map.insert("description".to_string(), Value::String(self.description.clone()));
        if let Some(ref items) = self.items {
            map.insert("items".to_string(), items.to_json_schema());
        }
        if let Some(ref values) = self.enum_values {
            map.insert(
                "enum".to_string(),
                Value::Array(values.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }
}

/// Tool input schema using JSON Schema format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub properties: HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ToolInputSchema {
    fn default() -> Self {
        ToolInputSchema {
            schema_type: "object".to_string(),
            properties: HashMap::new(),
            required: vec![],
        }
    }
}

impl ToolInputSchema {
    /// Full JSON Schema document, used both for validation and for the provider payload
    pub fn to_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json_schema()))
            .collect();
        serde_json::json!({
            "type": self.schema_type,
            "properties": properties,
            "required": self.required,
        })
    }
}

/// Tool definition that gets sent to the AI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
    #[serde(skip)]
    pub group: ToolGroup,
}

/// Result of tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Short human-readable summary ("Read src/main.rs", "Ran cargo fmt")
    #[serde(default)]
    pub title: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            title: String::new(),
            output: output.into(),
            error: None,
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let msg = message.into();
        ToolResult {
            success: false,
            title: String::new(),
            output: msg.clone(),
            error: Some(msg),
            metadata: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Callback tools use to stream metadata (progress, diff stats) to the caller
pub type MetadataSink = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Context provided to tools during execution
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    /// Agent instance this context is scoped to
    pub agent_id: Option<String>,
    /// Base directory for file operations (sandbox root)
    pub workspace_dir: PathBuf,
    /// Files the agent was pointed at when spawned
    pub context_files: Vec<String>,
    /// Skip interactive approval for side effects
    pub auto_approve: bool,
    pub cancel: CancellationToken,
    /// Additional context data
    pub extra: HashMap<String, Value>,
    metadata_sink: Option<MetadataSink>,
    file_claim: Option<FileClaim>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("agent_id", &self.agent_id)
            .field("workspace_dir", &self.workspace_dir)
            .field("context_files", &self.context_files)
            .field("auto_approve", &self.auto_approve)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("extra", &self.extra)
            .field("metadata_sink", &self.metadata_sink.is_some())
            .field("file_claim", &self.file_claim.is_some())
            .finish()
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        ToolContext {
            session_id: uuid::Uuid::new_v4().to_string(),
            agent_id: None,
            workspace_dir: PathBuf::from("."),
            context_files: Vec::new(),
            auto_approve: false,
            cancel: CancellationToken::new(),
            extra: HashMap::new(),
            metadata_sink: None,
            file_claim: None,
        }
    }
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_workspace(mut self, workspace_dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = workspace_dir.into();
        self
    }

    pub fn with_context_files(mut self, files: Vec<String>) -> Self {
        self.context_files = files;
        self
    }

    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_metadata_sink(mut self, sink: MetadataSink) -> Self {
        self.metadata_sink = Some(sink);
        self
    }

    pub fn with_file_claim(mut self, claim: FileClaim) -> Self {
        self.file_claim = Some(claim);
        self
    }

    pub fn file_claim(&self) -> Option<&FileClaim> {
        self.file_claim.as_ref()
    }

    /// Emit tool metadata to whoever is listening (no-op without a sink)
    pub fn emit_metadata(&self, tool_name: &str, metadata: Value) {
        if let Some(ref sink) = self.metadata_sink {
            sink(tool_name, metadata);
        }
    }

    /// Resolve a tool-supplied path against the workspace, refusing escapes.
    ///
    /// Symlinks are followed for the part of the path that exists, so a link
    /// inside the workspace cannot point a tool outside it.
    pub fn resolve_path(&self, raw: &str) -> Result<PathBuf, String> {
        if raw.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }
        let root = self.workspace_root();
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        let normalized = normalize_path(&joined);
        if !normalized.starts_with(&root) {
            return Err(format!("Path '{}' is outside the workspace", raw));
        }

        let real = canonicalize_existing(&normalized)
            .map_err(|e| format!("Path '{}' cannot be used: {}", raw, e))?;
        if !real.starts_with(&root) {
            log::warn!(
                "[TOOLS] '{}' resolves to {} outside the workspace",
                raw,
                real.display()
            );
            return Err(format!(
                "Path '{}' is outside the workspace (via symlink)",
                raw
            ));
        }
        Ok(real)
    }

    /// Absolute, normalized workspace root with symlinks resolved
    pub fn workspace_root(&self) -> PathBuf {
        let absolute = std::path::absolute(&self.workspace_dir)
            .unwrap_or_else(|_| self.workspace_dir.clone());
        let normalized = normalize_path(&absolute);
        canonicalize_existing(&normalized).unwrap_or(normalized)
    }

    /// Workspace-relative display form of a resolved path
    pub fn display_path(&self, path: &Path) -> String {
        let root = self.workspace_root();
        path.strip_prefix(&root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }
}

/// Lexically normalize a path (resolve `.` and `..` without touching the filesystem)
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor of an absolute, normalized path
/// and re-append the components that do not exist yet.
pub fn canonicalize_existing(path: &Path) -> Result<PathBuf, String> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();
    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut real) => {
                for part in missing.iter().rev() {
                    real.push(part);
                }
                return Ok(real);
            }
            Err(e) => {
                // Present but unresolvable, e.g. a dangling symlink
                if std::fs::symlink_metadata(&existing).is_ok() {
                    return Err(format!("{}: {}", existing.display(), e));
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        missing.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Ok(path.to_path_buf()),
                }
            }
        }
    }
}

/// Tool configuration for one agent or batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub profile: ToolProfile,
    pub allow_list: Vec<String>,     // Specific tools to allow
    pub deny_list: Vec<String>,      // Specific tools to deny
    pub allowed_groups: Vec<String>, // Tool groups to allow
    pub denied_groups: Vec<String>,  // Tool groups to deny
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            profile: ToolProfile::Standard,
            allow_list: vec![],
            deny_list: vec![],
            allowed_groups: vec![
                "filesystem".to_string(),
                "search".to_string(),
                "exec".to_string(),
            ],
            denied_groups: vec![],
        }
    }
}

impl ToolConfig {
    pub fn with_profile(profile: ToolProfile) -> Self {
        ToolConfig {
            profile,
            ..Default::default()
        }
    }

    /// Return a copy that additionally denies the given tool
    pub fn denying(mut self, tool_name: &str) -> Self {
        if !self.deny_list.iter().any(|t| t == tool_name) {
            self.deny_list.push(tool_name.to_string());
        }
        self
    }

    /// Check if a tool is allowed by this configuration
    pub fn is_tool_allowed(&self, tool_name: &str, tool_group: ToolGroup) -> bool {
        // Explicit deny takes precedence
        if self.deny_list.iter().any(|t| t == tool_name) {
            return false;
        }

        // Explicit allow overrides group settings
        if self.allow_list.iter().any(|t| t == tool_name) {
            return true;
        }

        let group_str = tool_group.as_str();
        if self.denied_groups.iter().any(|g| g == group_str) {
            return false;
        }

        match &self.profile {
            ToolProfile::Custom => self.allowed_groups.iter().any(|g| g == group_str),
            _ => self.profile.allowed_groups().contains(&tool_group),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_list_beats_allow_list() {
        let config = ToolConfig {
            allow_list: vec!["exec".to_string()],
            deny_list: vec!["exec".to_string()],
            ..Default::default()
        };
        assert!(!config.is_tool_allowed("exec", ToolGroup::Exec));
    }

    #[test]
    fn test_profiles() {
        let read_only = ToolConfig::with_profile(ToolProfile::ReadOnly);
        assert!(read_only.is_tool_allowed("read_file", ToolGroup::Filesystem));
        assert!(!read_only.is_tool_allowed("exec", ToolGroup::Exec));

        let standard = ToolConfig::default();
        assert!(!standard.is_tool_allowed("spawn_agents", ToolGroup::System));

        let full = ToolConfig::with_profile(ToolProfile::Full);
        assert!(full.is_tool_allowed("spawn_agents", ToolGroup::System));
        assert!(!full.denying("spawn_agents").is_tool_allowed("spawn_agents", ToolGroup::System));
    }

    #[test]
    fn test_custom_profile_uses_allowed_groups() {
        let config = ToolConfig {
            profile: ToolProfile::Custom,
            allowed_groups: vec!["search".to_string()],
            ..Default::default()
        };
        assert!(config.is_tool_allowed("grep", ToolGroup::Search));
        assert!(!config.is_tool_allowed("read_file", ToolGroup::Filesystem));
    }

    #[test]
    fn test_resolve_path_stays_in_workspace() {
        let ctx = ToolContext::new().with_workspace("/work/repo");
        assert_eq!(
            ctx.resolve_path("src/../src/lib.rs").unwrap(),
            PathBuf::from("/work/repo/src/lib.rs")
        );
        assert!(ctx.resolve_path("../other/secret").is_err());
        assert!(ctx.resolve_path("/etc/passwd").is_err());
        assert!(ctx.resolve_path("  ").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_path_refuses_symlink_escape() {
        let workspace = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), workspace.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("missing.txt"),
            workspace.path().join("dangling"),
        )
        .unwrap();
        std::fs::create_dir(workspace.path().join("src")).unwrap();
        std::os::unix::fs::symlink(workspace.path().join("src"), workspace.path().join("alias"))
            .unwrap();

        let ctx = ToolContext::new().with_workspace(workspace.path());
        let err = ctx.resolve_path("link/escaped.txt").unwrap_err();
        assert!(err.contains("outside the workspace"));
        assert!(ctx.resolve_path("dangling").is_err());

        // Links that stay inside resolve to the real location
        assert_eq!(
            ctx.resolve_path("alias/new.rs").unwrap(),
            ctx.resolve_path("src/new.rs").unwrap()
        );
    }

    #[test]
    fn test_error_result_mirrors_message() {
        let result = ToolResult::error("boom");
        assert!(!result.success);
        assert_eq!(result.output, "boom");
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
