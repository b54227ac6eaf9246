use anyhow::bail;
use serde_json::{Map, Value};

use crate::tools::{Registry, Schema};

/// Validates a tool call against its schema and the registry's permission
/// flags before dispatch. Unknown tool names are rejected.
pub fn validate_call(reg: &Registry, name: &str, args: &Value) -> anyhow::Result<()> {
    let empty = Map::new();
    let args_map = args.as_object().unwrap_or(&empty);

    if let Some(schema) = reg.schema(name) {
        validate_against_schema(&schema, args_map)?;
    }

    match name {
        "fs.read_file" | "fs.write_file" | "fs.search" => {
            if name != "fs.search" && !args_map.get("path").map(Value::is_string).unwrap_or(false) {
                bail!("path is required and must be string");
            }
            if name == "fs.write_file" {
                if !args_map
                    .get("content")
                    .map(Value::is_string)
                    .unwrap_or(false)
                {
                    bail!("content is required and must be string");
                }
                if !reg.fs.allow_write() {
                    bail!("write operations are disabled by configuration");
                }
            }
            if name == "fs.search"
                && !args_map
                    .get("pattern")
                    .map(Value::is_string)
                    .unwrap_or(false)
            {
                bail!("pattern is required and must be string");
            }
        }
        "terminal.exec" => {
            if !reg.terminal.allow_execution {
                bail!("exec disabled by configuration");
            }
            if !args_map
                .get("command")
                .map(Value::is_string)
                .unwrap_or(false)
            {
                bail!("command is required and must be string");
            }
        }
        "git.apply_patch" | "git.status" => {
            if !reg.git.allow_exec {
                bail!("git operations disabled");
            }
            if name == "git.apply_patch" {
                if !args_map.get("patch").map(Value::is_string).unwrap_or(false) {
                    bail!("patch is required");
                }
                if reg.git.dry_run_only {
                    let dry = args_map
                        .get("dry_run")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if !dry {
                        bail!("apply_patch allowed only in dry-run mode");
                    }
                }
            }
        }
        "git.restore_backup" | "git.list_backups" | "git.preview_backup" => {
            if !reg.git.allow_exec {
                bail!("git operations disabled");
            }
            if name == "git.restore_backup" {
                if let Some(v) = args_map.get("name") {
                    if !v.is_string() {
                        bail!("name must be string");
                    }
                }
            }
        }
        "semantic.search" => {
            if reg.semantic.is_none() {
                bail!("semantic engine unavailable");
            }
            if !args_map.get("query").map(Value::is_string).unwrap_or(false) {
                bail!("query is required and must be string");
            }
            if let Some(limit) = args_map.get("limit") {
                if !limit.is_number() {
                    bail!("limit must be number");
                }
            }
        }
        other => bail!("unknown tool {other:?}"),
    }
    Ok(())
}

fn validate_against_schema(schema: &Schema, args: &Map<String, Value>) -> anyhow::Result<()> {
    for field in &schema.parameters {
        let Some(val) = args.get(&field.name) else {
            if field.required {
                bail!("{} is required", field.name);
            }
            continue;
        };
        match field.field_type.as_str() {
            "string" => {
                if !val.is_string() {
                    bail!("{} must be string", field.name);
                }
            }
            "boolean" => {
                if !val.is_boolean() {
                    bail!("{} must be boolean", field.name);
                }
            }
            "array" => {
                if !val.is_array() {
                    bail!("{} must be array", field.name);
                }
            }
            "integer" => {
                if !val.is_number() {
                    bail!("{} must be integer", field.name);
                }
            }
            _ => {}
        }
        if !field.enum_values.is_empty() {
            let s = val.as_str().unwrap_or_default();
            if !field.enum_values.iter().any(|allowed| allowed == s) {
                bail!("{} must be one of {:?}", field.name, field.enum_values);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::tools::tests::test_registry;

    #[test]
    fn read_file_requires_string_path() {
        let tmp = tempdir().expect("tempdir");
        let reg = test_registry(tmp.path().to_str().unwrap(), false);
        assert!(validate_call(&reg, "fs.read_file", &json!({"path":"a.txt"})).is_ok());
        assert!(validate_call(&reg, "fs.read_file", &json!({"path":42})).is_err());
        assert!(validate_call(&reg, "fs.read_file", &json!({})).is_err());
    }

    #[test]
    fn write_file_requires_content_and_permission() {
        let tmp = tempdir().expect("tempdir");
        let reg = test_registry(tmp.path().to_str().unwrap(), false);
        assert!(
            validate_call(&reg, "fs.write_file", &json!({"path":"a.txt","content":"x"})).is_ok()
        );
        assert!(validate_call(&reg, "fs.write_file", &json!({"path":"a.txt"})).is_err());

        let mut read_only = test_registry(tmp.path().to_str().unwrap(), false);
        read_only.fs = crate::tools::fs::Filesystem::new(tmp.path().to_str().unwrap(), false)
            .expect("fs");
        let err = validate_call(
            &read_only,
            "fs.write_file",
            &json!({"path":"a.txt","content":"x"}),
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn terminal_exec_requires_command_and_enablement() {
        let tmp = tempdir().expect("tempdir");
        let mut reg = test_registry(tmp.path().to_str().unwrap(), false);
        assert!(validate_call(&reg, "terminal.exec", &json!({"command":"echo"})).is_ok());
        assert!(validate_call(&reg, "terminal.exec", &json!({"args":["x"]})).is_err());

        reg.terminal.allow_execution = false;
        assert!(validate_call(&reg, "terminal.exec", &json!({"command":"echo"})).is_err());
    }

    #[test]
    fn exec_args_must_be_array() {
        let tmp = tempdir().expect("tempdir");
        let reg = test_registry(tmp.path().to_str().unwrap(), false);
        let err = validate_call(
            &reg,
            "terminal.exec",
            &json!({"command":"echo","args":"not-a-list"}),
        )
        .expect_err("should fail");
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn apply_patch_dry_run_only_enforced() {
        let tmp = tempdir().expect("tempdir");
        let mut reg = test_registry(tmp.path().to_str().unwrap(), false);
        reg.git.dry_run_only = true;
        assert!(validate_call(
            &reg,
            "git.apply_patch",
            &json!({"patch":"p","dry_run":true})
        )
        .is_ok());
        let err = validate_call(&reg, "git.apply_patch", &json!({"patch":"p"}))
            .expect_err("should fail");
        assert!(err.to_string().contains("dry-run"));
    }

    #[test]
    fn semantic_search_requires_engine() {
        let tmp = tempdir().expect("tempdir");
        let without = test_registry(tmp.path().to_str().unwrap(), false);
        assert!(validate_call(&without, "semantic.search", &json!({"query":"q"})).is_err());

        let with = test_registry(tmp.path().to_str().unwrap(), true);
        assert!(validate_call(&with, "semantic.search", &json!({"query":"q"})).is_ok());
        assert!(
            validate_call(&with, "semantic.search", &json!({"query":"q","limit":"x"})).is_err()
        );
    }

    #[test]
    fn unknown_tool_rejected() {
        let tmp = tempdir().expect("tempdir");
        let reg = test_registry(tmp.path().to_str().unwrap(), false);
        let err = validate_call(&reg, "browser.open", &json!({})).expect_err("should fail");
        assert!(err.to_string().contains("unknown tool"));
    }
}
