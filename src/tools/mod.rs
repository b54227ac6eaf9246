pub mod fs;
pub mod git;
pub mod path;
pub mod sandbox;
pub mod terminal;
pub mod validator;

use serde::{Deserialize, Serialize};

use crate::semantic;
use crate::tools::fs::Filesystem;
use crate::tools::git::GitTool;
use crate::tools::terminal::Terminal;

/// Shared tool singletons exposed to the runner. The set of dispatchable
/// tools is closed; lookup is by schema name.
pub struct Registry {
    pub fs: Filesystem,
    pub terminal: Terminal,
    pub git: GitTool,
    pub semantic: Option<semantic::Engine>,
}

/// Describes a tool for schema listing and argument validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<SchemaField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub required: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

fn field(name: &str, field_type: &str, description: &str, required: bool) -> SchemaField {
    SchemaField {
        name: name.to_string(),
        field_type: field_type.to_string(),
        description: description.to_string(),
        required,
        enum_values: Vec::new(),
    }
}

impl Registry {
    pub fn new(
        fs: Filesystem,
        terminal: Terminal,
        git: GitTool,
        semantic: Option<semantic::Engine>,
    ) -> Self {
        Self {
            fs,
            terminal,
            git,
            semantic,
        }
    }

    pub fn schema(&self, name: &str) -> Option<Schema> {
        self.schemas().into_iter().find(|s| s.name == name)
    }

    /// Descriptors for the closed tool set. `semantic.search` appears only
    /// when the engine is enabled.
    pub fn schemas(&self) -> Vec<Schema> {
        let mut out = vec![
            Schema {
                name: "fs.read_file".to_string(),
                description: "Read a file relative to workspace".to_string(),
                parameters: vec![field("path", "string", "Relative file path", true)],
            },
            Schema {
                name: "fs.write_file".to_string(),
                description: "Write content to a file".to_string(),
                parameters: vec![
                    field("path", "string", "", true),
                    field("content", "string", "", true),
                    field("overwrite", "boolean", "", false),
                ],
            },
            Schema {
                name: "fs.search".to_string(),
                description: "Search files under a root for a substring".to_string(),
                parameters: vec![
                    field("root", "string", "Relative directory to search", true),
                    field("pattern", "string", "", true),
                ],
            },
            Schema {
                name: "terminal.exec".to_string(),
                description: "Execute a command".to_string(),
                parameters: vec![
                    field("command", "string", "", true),
                    field("args", "array", "Arguments", false),
                ],
            },
            Schema {
                name: "git.apply_patch".to_string(),
                description: "Apply a git patch; use dry_run true to validate without applying"
                    .to_string(),
                parameters: vec![
                    field("patch", "string", "", true),
                    field("dry_run", "boolean", "", false),
                ],
            },
            Schema {
                name: "git.status".to_string(),
                description: "Show short workspace status".to_string(),
                parameters: Vec::new(),
            },
            Schema {
                name: "git.restore_backup".to_string(),
                description:
                    "Restore the latest saved patch backup (or specific id/name if provided)"
                        .to_string(),
                parameters: vec![field("name", "string", "", false)],
            },
            Schema {
                name: "git.list_backups".to_string(),
                description: "List saved patch backups".to_string(),
                parameters: Vec::new(),
            },
            Schema {
                name: "git.preview_backup".to_string(),
                description: "Preview a backup by name (or latest if not provided)".to_string(),
                parameters: vec![field("name", "string", "", false)],
            },
        ];
        if self.semantic.is_some() {
            out.push(Schema {
                name: "semantic.search".to_string(),
                description:
                    "Find relevant files by semantic overlap (lightweight tokenizer-based search)"
                        .to_string(),
                parameters: vec![
                    field("query", "string", "", true),
                    field("limit", "integer", "", false),
                ],
            });
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    pub(crate) fn test_registry(dir: &str, with_semantic: bool) -> Registry {
        let fs = Filesystem::new(dir, true).expect("fs");
        let engine =
            with_semantic.then(|| semantic::Engine::new(std::sync::Arc::new(fs.clone()), 0, 0));
        Registry::new(
            fs,
            Terminal {
                working_dir: dir.to_string(),
                allowed: Vec::new(),
                denied: Vec::new(),
                timeout: Duration::from_secs(5),
                allow_execution: true,
            },
            GitTool::new(dir, true, false, ""),
            engine,
        )
    }

    #[test]
    fn semantic_schema_listed_only_when_enabled() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().to_str().unwrap();

        let without = test_registry(dir, false);
        assert!(without.schema("semantic.search").is_none());

        let with = test_registry(dir, true);
        assert!(with.schema("semantic.search").is_some());
    }

    #[test]
    fn schema_lookup_by_name() {
        let tmp = tempdir().expect("tempdir");
        let reg = test_registry(tmp.path().to_str().unwrap(), false);
        let schema = reg.schema("git.apply_patch").expect("schema");
        assert!(schema.parameters.iter().any(|p| p.name == "patch" && p.required));
        assert!(reg.schema("unknown.tool").is_none());
    }

    #[test]
    fn schemas_serialize_with_wire_field_names() {
        let tmp = tempdir().expect("tempdir");
        let reg = test_registry(tmp.path().to_str().unwrap(), false);
        let s = serde_json::to_string(&reg.schemas()).expect("serialize");
        assert!(s.contains("\"type\":\"string\""));
        assert!(s.contains("fs.read_file"));
    }
}
