use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;

use crate::tools::fs::Filesystem;

/// Abstracts file traversal and reading for the ranking engine.
pub trait FileWalker: Send + Sync {
    fn walk_files(
        &self,
        root: &str,
        max_files: usize,
        f: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()>;

    fn read_file(&self, path: &str) -> anyhow::Result<String>;
}

impl FileWalker for Filesystem {
    fn walk_files(
        &self,
        root: &str,
        max_files: usize,
        f: &mut dyn FnMut(&str),
    ) -> anyhow::Result<()> {
        Filesystem::walk_files(self, root, max_files, f)
    }

    fn read_file(&self, path: &str) -> anyhow::Result<String> {
        Filesystem::read_file(self, path)
    }
}

/// A single search hit.
#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub score: f64,
    pub snippet: String,
}

/// Ranks workspace files by token overlap with a query.
pub struct Engine {
    fs: Arc<dyn FileWalker>,
    max_files: usize,
    max_file_bytes: usize,
}

impl Engine {
    pub fn new(fs: Arc<dyn FileWalker>, max_files: usize, max_file_bytes: usize) -> Self {
        Self {
            fs,
            max_files: if max_files == 0 { 200 } else { max_files },
            max_file_bytes: if max_file_bytes == 0 {
                64 * 1024
            } else {
                max_file_bytes
            },
        }
    }

    /// Returns the top-`limit` files by overlap score (desc), path (asc).
    pub fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<Hit>> {
        if query.trim().is_empty() {
            bail!("query is required");
        }
        let limit = if limit == 0 { 5 } else { limit };

        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            bail!("query too short");
        }

        let mut results: Vec<Hit> = Vec::new();
        self.fs.walk_files(".", self.max_files, &mut |rel| {
            // Unreadable files are skipped rather than failing the search.
            let Ok(mut content) = self.fs.read_file(rel) else {
                return;
            };
            if content.len() > self.max_file_bytes {
                content = truncate_at_boundary(&content, self.max_file_bytes);
            }
            let score = overlap_score(&query_tokens, &tokenize(&content));
            if score <= 0.0 {
                return;
            }
            results.push(Hit {
                path: rel.to_string(),
                score,
                snippet: summarize(&content),
            });
        })?;

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        results.truncate(limit);
        Ok(results)
    }
}

fn tokenize(s: &str) -> Vec<String> {
    let lower = s.to_lowercase();
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in lower.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn overlap_score(query: &[String], doc: &[String]) -> f64 {
    if query.is_empty() || doc.is_empty() {
        return 0.0;
    }
    let seen: HashSet<&str> = doc.iter().map(String::as_str).collect();
    let overlap = query.iter().filter(|q| seen.contains(q.as_str())).count();
    overlap as f64 / query.len() as f64
}

/// First non-blank line, trimmed, capped to 200 chars.
fn summarize(content: &str) -> String {
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.len() > 200 {
            return format!("{}...", truncate_at_boundary(trimmed, 200));
        }
        return trimmed.to_string();
    }
    if content.len() > 200 {
        return format!("{}...", truncate_at_boundary(content, 200));
    }
    content.to_string()
}

fn truncate_at_boundary(s: &str, limit: usize) -> String {
    let mut end = limit.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
