use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DEFAULT_BACKUP_DIR: &str = ".mycodex/patch-backups";

/// A single patch backup with lineage. Entries form a linear chain:
/// `parent_id` of entry i equals `id` of entry i-1 (empty for the first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    pub file_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PatchStack {
    #[serde(default)]
    entries: Vec<PatchEntry>,
}

impl PatchStack {
    fn latest(&self) -> Option<&PatchEntry> {
        self.entries.last()
    }

    fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read(path) {
            Ok(data) => {
                serde_json::from_slice(&data).context("failed parsing patch stack file")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(self).context("failed encoding patch stack")?;
        std::fs::write(path, data).with_context(|| format!("failed writing {}", path.display()))
    }
}

/// Minimal git operations with a patch backup stack. Non-dry-run applies
/// push the patch onto the stack first so it can be reverse-applied later.
/// The stack file assumes a single concurrent run per workspace.
pub struct GitTool {
    pub working_dir: String,
    pub allow_exec: bool,
    pub dry_run_only: bool,
    pub backup_dir: String,
    stack: Mutex<Option<PatchStack>>,
}

impl GitTool {
    pub fn new(working_dir: &str, allow_exec: bool, dry_run_only: bool, backup_dir: &str) -> Self {
        Self {
            working_dir: working_dir.to_string(),
            allow_exec,
            dry_run_only,
            backup_dir: backup_dir.to_string(),
            stack: Mutex::new(None),
        }
    }

    /// `git status --short`.
    pub async fn status(&self) -> anyhow::Result<String> {
        if !self.allow_exec {
            bail!("git operations disabled");
        }
        self.run(&["status", "--short"], "").await
    }

    /// Applies a patch; `dry_run` validates with `--check` only.
    pub async fn apply_patch(&self, patch: &str, dry_run: bool) -> anyhow::Result<String> {
        if !self.allow_exec {
            bail!("git operations disabled");
        }
        if self.dry_run_only && !dry_run {
            bail!("apply_patch is restricted to dry-run mode");
        }
        if !dry_run {
            self.create_backup(patch).context("create backup")?;
        }
        let args: &[&str] = if dry_run {
            &["apply", "--check", "-"]
        } else {
            &["apply", "-"]
        };
        self.run(args, patch).await
    }

    /// Reverse-applies a backup by id or file name (latest when empty).
    pub async fn restore_backup(&self, name: &str) -> anyhow::Result<String> {
        if !self.allow_exec {
            bail!("git operations disabled");
        }
        if self.dry_run_only {
            bail!("restore_backup not allowed in dry-run-only mode");
        }
        let data = self.read_backup(name)?;
        self.run(&["apply", "-R", "-"], &data).await
    }

    /// Lists backup entry ids in stack order.
    pub fn list_backups(&self) -> anyhow::Result<Vec<String>> {
        let mut guard = self.stack.lock().unwrap_or_else(|p| p.into_inner());
        let stack = self.load_stack(&mut guard)?;
        Ok(stack.entries.iter().map(|e| e.id.clone()).collect())
    }

    /// Returns the literal bytes of a backup (latest when `name` is empty).
    pub fn preview_backup(&self, name: &str) -> anyhow::Result<String> {
        self.read_backup(name)
    }

    fn backup_dir(&self) -> &str {
        if self.backup_dir.is_empty() {
            DEFAULT_BACKUP_DIR
        } else {
            &self.backup_dir
        }
    }

    fn stack_path(&self) -> PathBuf {
        Path::new(&self.working_dir)
            .join(self.backup_dir())
            .join("stack.json")
    }

    fn load_stack<'a>(
        &self,
        guard: &'a mut Option<PatchStack>,
    ) -> anyhow::Result<&'a mut PatchStack> {
        if guard.is_none() {
            *guard = Some(PatchStack::load(&self.stack_path())?);
        }
        Ok(guard.as_mut().unwrap())
    }

    fn create_backup(&self, patch: &str) -> anyhow::Result<()> {
        let dir = Path::new(&self.working_dir).join(self.backup_dir());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating {}", dir.display()))?;

        let mut guard = self.stack.lock().unwrap_or_else(|p| p.into_inner());
        let stack = self.load_stack(&mut guard)?;

        let parent = stack.latest().map(|e| e.id.clone()).unwrap_or_default();
        let entry_id = format!("backup-{}", crate::unix_nanos());
        let file_name = format!("{entry_id}.patch");
        std::fs::write(dir.join(&file_name), patch)
            .with_context(|| format!("failed writing backup {file_name}"))?;

        stack.entries.push(PatchEntry {
            id: entry_id,
            parent_id: parent,
            file_name,
            created_at: crate::now_rfc3339(),
        });
        stack.save(&self.stack_path())
    }

    fn read_backup(&self, name: &str) -> anyhow::Result<String> {
        let mut guard = self.stack.lock().unwrap_or_else(|p| p.into_inner());
        let stack = self.load_stack(&mut guard)?;
        if stack.entries.is_empty() {
            bail!("no backups available");
        }
        let file_name = if name.is_empty() {
            stack.entries.last().unwrap().file_name.clone()
        } else {
            stack
                .entries
                .iter()
                .find(|e| e.id == name || e.file_name == name)
                .map(|e| e.file_name.clone())
                .ok_or_else(|| anyhow!("backup {name} not found"))?
        };
        drop(guard);

        let path = Path::new(&self.working_dir)
            .join(self.backup_dir())
            .join(&file_name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))
    }

    async fn run(&self, args: &[&str], input: &str) -> anyhow::Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .stdin(if input.is_empty() {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.working_dir.is_empty() {
            cmd.current_dir(&self.working_dir);
        }

        let mut child = cmd.spawn().context("failed to spawn git")?;
        if !input.is_empty() {
            let mut stdin = child.stdin.take().context("git stdin unavailable")?;
            stdin
                .write_all(input.as_bytes())
                .await
                .context("failed writing patch to git stdin")?;
            drop(stdin);
        }
        let output = child
            .wait_with_output()
            .await
            .context("failed waiting for git")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "git {} failed: {}",
                args.first().copied().unwrap_or(""),
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
