use std::time::Duration;

use anyhow::Context;

use crate::config::{SandboxConfig, ToolsConfig};
use crate::tools::fs::Filesystem;
use crate::tools::terminal::Terminal;

/// Commands denied by default when network access is disallowed.
const DEFAULT_NETWORK_DENIED: &[&str] = &[
    "curl", "wget", "ping", "nc", "netcat", "telnet", "ssh", "scp", "sftp",
];

/// Configured filesystem and terminal tools built from sandbox/tools config.
pub struct Sandbox {
    pub fs: Filesystem,
    pub terminal: Terminal,
}

pub fn build(
    base_dir: &str,
    sandbox_cfg: &SandboxConfig,
    tools_cfg: &ToolsConfig,
) -> anyhow::Result<Sandbox> {
    let fs = Filesystem::new(base_dir, sandbox_cfg.allow_write && tools_cfg.allow_file_write)
        .context("build filesystem tool")?;

    let mut denied = sandbox_cfg.denied_commands.clone();
    if !sandbox_cfg.allow_network {
        denied.extend(DEFAULT_NETWORK_DENIED.iter().map(|s| s.to_string()));
    }

    let terminal = Terminal {
        working_dir: base_dir.to_string(),
        allowed: sandbox_cfg.allowed_commands.clone(),
        denied: dedupe(denied),
        timeout: Duration::from_secs(sandbox_cfg.timeout_seconds),
        allow_execution: tools_cfg.allow_exec && sandbox_cfg.enabled && allow_commands(sandbox_cfg),
    };

    Ok(Sandbox { fs, terminal })
}

fn allow_commands(s: &SandboxConfig) -> bool {
    s.allow_write || !s.allowed_commands.is_empty() || !s.denied_commands.is_empty() || s.allow_network
}

fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
