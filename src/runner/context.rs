use std::collections::HashSet;

use anyhow::Context;
use regex::Regex;

use crate::agent::types::ContextFile;
use crate::tools::Registry;

const PER_FILE_CAP: usize = 32 * 1024;
const MAX_CANDIDATES: usize = 12;

const DEFAULT_CANDIDATES: &[&str] = &[
    ".",
    "README.md",
    "CONTRIBUTING.md",
    "go.mod",
    "package.json",
    "Makefile",
    "configs/config.yaml",
    "cmd",
    "internal",
    "src",
];

/// Assembles the ordered, deduplicated context-file list for a run.
/// Explicit paths win; otherwise candidates come from the semantic engine
/// (top 5) followed by prompt-mentioned paths and the fixed default list.
/// `max_bytes` of 0 means unbounded.
pub fn build_context_files(
    reg: &Registry,
    prompt: &str,
    paths: &[String],
    max_bytes: usize,
) -> anyhow::Result<Vec<ContextFile>> {
    let candidates: Vec<String> = if paths.is_empty() {
        let mut merged = Vec::new();
        if let Some(semantic) = &reg.semantic {
            if let Ok(hits) = semantic.search(prompt, 5) {
                merged.extend(hits.into_iter().map(|h| h.path));
            }
        }
        merged.extend(discover_context_paths(reg, prompt));
        merged
    } else {
        paths.to_vec()
    };

    let mut per_file_cap = PER_FILE_CAP;
    if max_bytes > 0 && max_bytes < per_file_cap {
        per_file_cap = max_bytes;
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut total = 0usize;

    for path in candidates {
        if !seen.insert(path.clone()) {
            continue;
        }
        if max_bytes > 0 && total >= max_bytes {
            break;
        }

        let info = reg
            .fs
            .stat(&path)
            .with_context(|| format!("read context {path}"))?;

        if info.is_dir() {
            let content = reg
                .fs
                .describe_structure(&path, 3, 200)
                .with_context(|| format!("describe context {path}"))?;
            let entry = ContextFile {
                path: format!("{} (structure)", path.trim_end_matches('/')),
                content,
            };
            if append_with_budget(&mut out, entry, &mut total, max_bytes, per_file_cap) {
                break;
            }
            continue;
        }

        let content = reg
            .fs
            .read_file(&path)
            .with_context(|| format!("read context {path}"))?;
        let entry = ContextFile { path, content };
        if append_with_budget(&mut out, entry, &mut total, max_bytes, per_file_cap) {
            break;
        }
    }

    Ok(out)
}

/// Appends a context file, clipping to the per-file cap and the remaining
/// byte budget. Returns true when the budget is exhausted.
fn append_with_budget(
    out: &mut Vec<ContextFile>,
    mut cf: ContextFile,
    total: &mut usize,
    max_bytes: usize,
    per_file_cap: usize,
) -> bool {
    let mut limit = per_file_cap;
    if max_bytes > 0 {
        let remaining = max_bytes.saturating_sub(*total);
        if remaining == 0 {
            return true;
        }
        if remaining < limit {
            limit = remaining;
        }
    }

    if limit > 0 && cf.content.len() > limit {
        let mut end = limit;
        while end > 0 && !cf.content.is_char_boundary(end) {
            end -= 1;
        }
        cf.content.truncate(end);
        cf.content.push_str("\n[truncated]");
    }

    *total += cf.content.len();
    out.push(cf);

    max_bytes > 0 && *total >= max_bytes
}

fn discover_context_paths(reg: &Registry, prompt: &str) -> Vec<String> {
    let mut raw = extract_mentioned_paths(prompt);
    raw.extend(DEFAULT_CANDIDATES.iter().map(|s| s.to_string()));

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for cand in raw {
        let cand = cand.trim().to_string();
        if cand.is_empty() || seen.contains(&cand) {
            continue;
        }
        if out.len() >= MAX_CANDIDATES {
            break;
        }
        if reg.fs.stat(&cand).is_err() {
            continue;
        }
        seen.insert(cand.clone());
        out.push(cand);
    }
    out
}

/// Paths mentioned in the prompt: word-ish tokens containing `/` or `.`,
/// trimmed of surrounding punctuation.
fn extract_mentioned_paths(prompt: &str) -> Vec<String> {
    let re = Regex::new(r"[A-Za-z0-9][A-Za-z0-9._/-]+").unwrap();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in re.find_iter(prompt) {
        let token = m
            .as_str()
            .trim_matches(&['.', ',', ';', ':', '!', '"', '\''][..]);
        if token.is_empty() {
            continue;
        }
        if !token.contains('/') && !token.contains('.') {
            continue;
        }
        if seen.insert(token.to_string()) {
            out.push(token.to_string());
        }
    }
    out
}
