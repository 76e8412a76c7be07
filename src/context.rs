//! Documentation and system context gathered for an advisory query.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

const HELP_TIMEOUT: Duration = Duration::from_secs(5);
const MAN_TIMEOUT: Duration = Duration::from_secs(10);
const MAN_MAX_LINES: usize = 200;
const MAX_LISTED_COMMANDS: usize = 400;

/// Run a command, returning its stdout (or stderr when stdout is empty) if it
/// finishes within `limit`. A command still holding its pipes open at the
/// deadline is killed and yields nothing.
async fn run_with_timeout(
    mut cmd: tokio::process::Command,
    limit: Duration,
) -> Option<(bool, String)> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let output = match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::debug!("context command failed to start: {e}");
            return None;
        }
        Err(_) => {
            tracing::debug!("context command timed out after {}s", limit.as_secs_f32());
            return None;
        }
    };

    let text = if output.stdout.iter().any(|b| !b.is_ascii_whitespace()) {
        output.stdout
    } else {
        output.stderr
    };
    Some((output.status.success(), String::from_utf8_lossy(&text).into_owned()))
}

pub async fn help_output(cmd: &str) -> Option<String> {
    let mut command = tokio::process::Command::new(cmd);
    command.arg("--help");
    let (_, text) = run_with_timeout(command, HELP_TIMEOUT).await?;
    let text = text.trim();
    tracing::debug!("{cmd} --help returned {} chars", text.len());
    (!text.is_empty()).then(|| text.to_string())
}

pub async fn man_page(cmd: &str) -> Option<String> {
    let mut command = tokio::process::Command::new("man");
    command
        .arg(cmd)
        .env("MANPAGER", "cat")
        .env("MANWIDTH", "120");
    let (ok, text) = run_with_timeout(command, MAN_TIMEOUT).await?;
    if !ok || text.trim().is_empty() {
        tracing::debug!("man {cmd} returned nothing");
        return None;
    }
    Some(truncate_lines(text.trim(), MAN_MAX_LINES))
}

pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return lines.join("\n");
    }
    let mut kept = lines[..max_lines].join("\n");
    kept.push_str(&format!(
        "\n\n... (truncated, {max_lines} of {} lines shown)",
        lines.len()
    ));
    kept
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Executable names reachable through `path_env`, sorted, with the total count
/// before truncation to `max`.
pub fn available_commands(path_env: &str, max: usize) -> (Vec<String>, usize) {
    let mut names = BTreeSet::new();
    let mut seen_dirs = BTreeSet::new();
    for dir in std::env::split_paths(path_env) {
        if dir.as_os_str().is_empty() || !seen_dirs.insert(dir.clone()) {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !is_executable(&entry.path()) {
                continue;
            }
            names.insert(name);
        }
    }
    let total = names.len();
    (names.into_iter().take(max).collect(), total)
}

pub fn available_commands_summary() -> String {
    let path_env = std::env::var("PATH").unwrap_or_default();
    let (commands, total) = available_commands(&path_env, MAX_LISTED_COMMANDS);
    if commands.is_empty() {
        return "Available commands in PATH: unavailable".into();
    }
    if total > commands.len() {
        format!(
            "Available commands in PATH (showing {} of {total}): {}",
            commands.len(),
            commands.join(", ")
        )
    } else {
        format!("Available commands in PATH ({total}): {}", commands.join(", "))
    }
}

fn detect_os() -> String {
    #[cfg(target_os = "macos")]
    {
        let version = Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .unwrap_or_default();
        if version.is_empty() {
            "macOS".into()
        } else {
            format!("macOS {version}")
        }
    }
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find_map(|l| l.strip_prefix("PRETTY_NAME="))
                    .map(|v| v.trim_matches('"').to_string())
            })
            .unwrap_or_else(|| "Linux".into())
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        std::env::consts::OS.to_string()
    }
}

fn kernel_release() -> String {
    Command::new("uname")
        .arg("-r")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string())
}

pub fn system_info() -> String {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "unknown".into());
    format!("OS: {} ({})\nShell: {shell}", detect_os(), kernel_release())
}

/// Help text and man page for `cmd`, or a note plus the list of installed
/// commands when neither exists.
pub async fn gather_context(cmd: Option<&str>) -> String {
    let Some(cmd) = cmd else {
        return String::new();
    };
    let mut parts = Vec::new();
    if let Some(help) = help_output(cmd).await {
        parts.push(format!("=== {cmd} --help ===\n{help}"));
    }
    if let Some(man) = man_page(cmd).await {
        parts.push(format!("=== man {cmd} ===\n{man}"));
    }
    if parts.is_empty() {
        parts.push(format!(
            "No documentation found for '{cmd}'. Rely on general knowledge."
        ));
        parts.push(available_commands_summary());
    }
    let context = parts.join("\n\n");
    tracing::debug!("context for {cmd}: {} chars", context.len());
    context
}
