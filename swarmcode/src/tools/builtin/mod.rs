//! Built-in tools for the agent
//!
//! - `fs`: read, list, write and edit files in the workspace
//! - `search`: glob and regex search
//! - `exec`: shell commands

mod exec;
mod fs;
mod search;

pub use exec::ExecTool;
pub use fs::{EditFileTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use search::{GlobTool, GrepTool};
