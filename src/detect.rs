//! Shell detection: pick a supported shell family and a runnable executable.

use std::path::{Path, PathBuf};

use crate::shell_hooks::ShellKind;

/// Environment variable that names a preferred shell.
pub const SHELL_OVERRIDE_VAR: &str = "TUTR_SHELL";

const POSIX_DEFAULTS: [&str; 4] = ["bash", "zsh", "pwsh", "powershell"];
const WINDOWS_DEFAULTS: [&str; 4] = ["pwsh", "powershell", "bash", "zsh"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellDetectionError {
    pub tried: Vec<String>,
}

impl std::fmt::Display for ShellDetectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "No supported shell found. Install bash, zsh, or PowerShell, \
             or set {SHELL_OVERRIDE_VAR} to one of them."
        )
    }
}

impl std::error::Error for ShellDetectionError {}

/// A supported shell that resolved to something runnable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedShell {
    pub kind: ShellKind,
    pub executable: PathBuf,
}

/// Map a candidate name or path to its shell family.
pub fn classify_shell(candidate: &str) -> Option<ShellKind> {
    let base = candidate
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(candidate)
        .to_ascii_lowercase();
    let base = base.strip_suffix(".exe").unwrap_or(&base);
    match base {
        "bash" => Some(ShellKind::Bash),
        "zsh" => Some(ShellKind::Zsh),
        "pwsh" | "powershell" => Some(ShellKind::PowerShell),
        _ => None,
    }
}

/// Candidate shells in preference order, de-duplicated case-insensitively.
pub fn shell_candidates(
    override_shell: Option<&str>,
    env_shell: Option<&str>,
    windows: bool,
) -> Vec<String> {
    let defaults = if windows {
        WINDOWS_DEFAULTS
    } else {
        POSIX_DEFAULTS
    };

    let mut candidates: Vec<String> = Vec::new();
    let preferred = [override_shell, env_shell]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    for item in preferred.chain(defaults) {
        let key = item.to_lowercase();
        if candidates.iter().any(|c| c.to_lowercase() == key) {
            continue;
        }
        candidates.push(item.to_string());
    }
    candidates
}

/// Candidates built from `TUTR_SHELL`, `SHELL` and the current platform.
pub fn candidates_from_env() -> Vec<String> {
    let override_shell = std::env::var(SHELL_OVERRIDE_VAR).ok();
    let env_shell = std::env::var("SHELL").ok();
    shell_candidates(
        override_shell.as_deref(),
        env_shell.as_deref(),
        cfg!(windows),
    )
}

fn has_path_separator(candidate: &str) -> bool {
    candidate.contains('/') || candidate.contains(std::path::MAIN_SEPARATOR)
}

fn is_executable_file(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Resolve a candidate to a runnable path. Paths are checked directly, bare
/// names are looked up on `PATH`.
pub fn resolve_executable(candidate: &str) -> Option<PathBuf> {
    if has_path_separator(candidate) {
        let path = PathBuf::from(candidate);
        return is_executable_file(&path).then_some(path);
    }
    which::which(candidate).ok()
}

pub fn detect_shell_from(candidates: &[String]) -> Result<DetectedShell, ShellDetectionError> {
    for candidate in candidates {
        let Some(kind) = classify_shell(candidate) else {
            tracing::debug!("skipping unsupported shell candidate {candidate}");
            continue;
        };
        if let Some(executable) = resolve_executable(candidate) {
            tracing::debug!("detected {kind} at {}", executable.display());
            return Ok(DetectedShell { kind, executable });
        }
        tracing::debug!("shell candidate {candidate} did not resolve");
    }
    Err(ShellDetectionError {
        tried: candidates.to_vec(),
    })
}

pub fn detect_shell() -> Result<DetectedShell, ShellDetectionError> {
    detect_shell_from(&candidates_from_env())
}
