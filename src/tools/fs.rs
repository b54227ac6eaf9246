use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use walkdir::WalkDir;

use crate::tools::path::PathGuard;

/// Directories never included in structure outlines or searches.
const SKIP_STRUCTURE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".idea",
    ".vscode",
    "vendor",
    ".cache",
    ".github",
];

fn skip_structure_dir(name: &str) -> bool {
    let lower = name.to_lowercase();
    SKIP_STRUCTURE_DIRS.contains(&lower.as_str())
}

/// A single pattern match from `search`.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub path: String,
    pub line: usize,
    pub snippet: String,
}

/// Safe file operations rooted at a base directory.
#[derive(Debug, Clone)]
pub struct Filesystem {
    guard: PathGuard,
    allow_write: bool,
}

impl Filesystem {
    pub fn new(base_dir: &str, allow_write: bool) -> anyhow::Result<Self> {
        Ok(Self {
            guard: PathGuard::new(base_dir)?,
            allow_write,
        })
    }

    pub fn base_dir(&self) -> &Path {
        self.guard.base_dir()
    }

    pub fn allow_write(&self) -> bool {
        self.allow_write
    }

    /// Returns file contents, lossily decoded as UTF-8.
    pub fn read_file(&self, path: &str) -> anyhow::Result<String> {
        let resolved = self.guard.resolve(path)?;
        let data =
            fs::read(&resolved).with_context(|| format!("failed reading {}", resolved.display()))?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Writes content to a file, creating parent directories.
    pub fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        if !self.allow_write {
            bail!("write is disabled by configuration");
        }
        let resolved = self.guard.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        fs::write(&resolved, content)
            .with_context(|| format!("failed writing {}", resolved.display()))
    }

    pub fn stat(&self, path: &str) -> anyhow::Result<fs::Metadata> {
        let resolved = self.guard.resolve(path)?;
        fs::metadata(&resolved).with_context(|| format!("failed to stat {}", resolved.display()))
    }

    /// Looks for substring occurrences in files under `root`.
    pub fn search(
        &self,
        root: &str,
        pattern: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<SearchResult>> {
        if pattern.is_empty() {
            bail!("pattern is required");
        }
        let max_results = if max_results == 0 { 20 } else { max_results };
        let resolved = self.guard.resolve(root)?;

        let mut results = Vec::new();
        let walker = WalkDir::new(&resolved)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && skip_structure_dir(&e.file_name().to_string_lossy())));
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(self.guard.base_dir())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if line.contains(pattern) {
                    results.push(SearchResult {
                        path: rel.clone(),
                        line: idx + 1,
                        snippet: line.to_string(),
                    });
                    if results.len() >= max_results {
                        return Ok(results);
                    }
                }
            }
        }
        Ok(results)
    }

    /// Walks regular files under `root` (symlinks excluded), invoking `f`
    /// with base-relative paths, up to `max_files` when non-zero.
    pub fn walk_files(
        &self,
        root: &str,
        max_files: usize,
        f: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()> {
        let resolved = self.guard.resolve(root)?;
        let mut count = 0usize;
        for entry in WalkDir::new(&resolved).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() || entry.path_is_symlink() {
                continue;
            }
            if max_files > 0 && count >= max_files {
                break;
            }
            let rel = entry
                .path()
                .strip_prefix(self.guard.base_dir())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            count += 1;
            f(&rel);
        }
        Ok(())
    }

    /// Returns a tree-like outline for a directory with depth/entry caps,
    /// skipping build and IDE directories.
    pub fn describe_structure(
        &self,
        root: &str,
        max_depth: usize,
        max_entries: usize,
    ) -> anyhow::Result<String> {
        let max_depth = if max_depth == 0 { 3 } else { max_depth };
        let max_entries = if max_entries == 0 { 200 } else { max_entries };

        let resolved = self.guard.resolve(root)?;
        let info = fs::metadata(&resolved)
            .with_context(|| format!("failed to stat {}", resolved.display()))?;
        if !info.is_dir() {
            bail!("{root} is not a directory");
        }

        let mut out = format!("{}/", root.trim_end_matches('/'));
        let mut added = 0usize;
        self.outline_dir(&resolved, 1, max_depth, max_entries, &mut added, &mut out)?;
        Ok(out)
    }

    fn outline_dir(
        &self,
        dir: &Path,
        depth: usize,
        max_depth: usize,
        max_entries: usize,
        added: &mut usize,
        out: &mut String,
    ) -> anyhow::Result<bool> {
        if depth > max_depth {
            return Ok(false);
        }
        let mut entries: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("failed listing {}", dir.display()))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if skip_structure_dir(&name) {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let prefix = "  ".repeat(depth - 1);
            let _ = write!(out, "\n{prefix}- {name}{}", if is_dir { "/" } else { "" });
            *added += 1;
            if *added >= max_entries {
                let _ = write!(out, "\n{prefix}... truncated after {max_entries} entries");
                return Ok(true);
            }
            if is_dir {
                let truncated = self.outline_dir(
                    &entry.path(),
                    depth + 1,
                    max_depth,
                    max_entries,
                    added,
                    out,
                )?;
                if truncated {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
