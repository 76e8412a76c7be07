//! Temporary shell startup hooks that emit command markers.
//!
//! Each supported shell family gets a startup fragment that sources the user's
//! normal rc file and then reports `exit code + last history entry` through the
//! marker defined in [`crate::marker`] after every command. The history entry
//! is only reported when a command actually ran since the previous prompt
//! (bash `PS0`, zsh `preexec`). Pressing Enter on an empty line therefore
//! does not re-report the last failure, while re-running a command that
//! history de-duplicates still does.
//!
//! Artifacts are created owner-only under the system temp directory and are
//! persisted; removal is the session's job.

use std::io::Write;
use std::path::PathBuf;

/// Closed set of shell families the wrapper knows how to hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    Bash,
    Zsh,
    PowerShell,
}

impl ShellKind {
    pub const ALL: [ShellKind; 3] = [ShellKind::Bash, ShellKind::Zsh, ShellKind::PowerShell];

    pub fn name(&self) -> &'static str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Zsh => "zsh",
            ShellKind::PowerShell => "powershell",
        }
    }

    /// Write this family's hook artifact and return its path (a file for
    /// bash and PowerShell, a startup directory for zsh).
    pub fn write_hook(&self) -> anyhow::Result<PathBuf> {
        match self {
            ShellKind::Bash => write_bash_rcfile(),
            ShellKind::Zsh => write_zsh_rcdir(),
            ShellKind::PowerShell => write_powershell_profile(),
        }
    }
}

impl std::fmt::Display for ShellKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub const BASH_HOOK: &str = r#"[ -f ~/.bashrc ] && source ~/.bashrc
__tutr_ran=
__tutr_emit_marker() {
  local __tutr_e=$? __tutr_line __tutr_num __tutr_cmd=
  __tutr_line=$(HISTTIMEFORMAT= builtin history 1)
  if [ -z "${__tutr_ps0:-}" ]; then
    # No PS0 before bash 4.4: a new history number means a command ran.
    __tutr_num=$(printf '%s\n' "$__tutr_line" | sed -n '1s/^ *\([0-9]*\).*/\1/p')
    if [ -n "${__tutr_primed:-}" ] && [ "$__tutr_num" != "${__tutr_last_hist:-}" ]; then
      __tutr_ran=1
    fi
    __tutr_primed=1
    __tutr_last_hist=$__tutr_num
  fi
  if [ -n "$__tutr_ran" ]; then
    __tutr_cmd=$(printf '%s\n' "$__tutr_line" | sed '1s/^ *[0-9]*\*\{0,1\} *//')
  fi
  __tutr_ran=
  __tutr_cmd=${__tutr_cmd//$'\a'/}
  printf '\033]7770;%d;%s\007' "$__tutr_e" "$__tutr_cmd"
  return $__tutr_e
}
if (( BASH_VERSINFO[0] > 4 || (BASH_VERSINFO[0] == 4 && BASH_VERSINFO[1] >= 4) )); then
  __tutr_ps0=1
  PS0='${__tutr_ran:(__tutr_ran=1,0):0}'"${PS0:-}"
fi
PROMPT_COMMAND="__tutr_emit_marker${PROMPT_COMMAND:+; $PROMPT_COMMAND}"
"#;

pub const ZSH_HOOK: &str = r#"[ -f ~/.zshrc ] && source ~/.zshrc
autoload -Uz add-zsh-hook 2>/dev/null || true
_tutr_ran=
_tutr_cmd_line=
_tutr_mark_ran() {
  _tutr_ran=1
  _tutr_cmd_line=$1
}
_tutr_emit_marker() {
  local __tutr_e=$? __tutr_cmd=
  if [[ -n $_tutr_ran ]]; then
    __tutr_cmd=$(fc -ln -1 2>/dev/null)
    [[ -n $__tutr_cmd ]] || __tutr_cmd=$_tutr_cmd_line
  fi
  _tutr_ran=
  _tutr_cmd_line=
  __tutr_cmd=${__tutr_cmd//$'\a'/}
  printf '\033]7770;%d;%s\007' "$__tutr_e" "$__tutr_cmd"
}
if typeset -f add-zsh-hook >/dev/null 2>&1; then
  add-zsh-hook preexec _tutr_mark_ran
  add-zsh-hook precmd _tutr_emit_marker
else
  preexec_functions+=(_tutr_mark_ran)
  precmd_functions+=(_tutr_emit_marker)
fi
"#;

pub const POWERSHELL_HOOK: &str = r#"$global:tutr_old_prompt = $function:prompt
$global:tutr_last_id = $null
$global:tutr_primed = $false
function global:prompt {
  $exitCode = if ($?) { 0 } elseif ($LASTEXITCODE -ne $null) { [int]$LASTEXITCODE } else { 1 }
  if ($exitCode -lt 0) { $exitCode = 1 }
  $last = Get-History -Count 1 -ErrorAction SilentlyContinue
  $cmd = ''
  if ($last -and $global:tutr_primed -and $last.Id -ne $global:tutr_last_id) {
    $cmd = $last.CommandLine -replace "$([char]7)", ''
  }
  if ($last) { $global:tutr_last_id = $last.Id }
  $global:tutr_primed = $true
  [Console]::Out.Write("$([char]27)]7770;$exitCode;$cmd$([char]7)")
  if ($global:tutr_old_prompt) {
    & $global:tutr_old_prompt
  } else {
    "PS $($executionContext.SessionState.Path.CurrentLocation)> "
  }
}
"#;

fn write_temp_file(suffix: &str, content: &str) -> anyhow::Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("tutr_")
        .suffix(suffix)
        .tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    let (_, path) = file.keep()?;
    tracing::debug!("wrote hook {}", path.display());
    Ok(path)
}

/// Temporary bashrc installing a `PROMPT_COMMAND` hook.
pub fn write_bash_rcfile() -> anyhow::Result<PathBuf> {
    write_temp_file(".bashrc", BASH_HOOK)
}

/// Temporary `ZDOTDIR` whose `.zshrc` registers a precmd hook.
pub fn write_zsh_rcdir() -> anyhow::Result<PathBuf> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("tutr_zsh_");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o700));
    }
    let dir = builder.tempdir()?;
    let rcfile = dir.path().join(".zshrc");
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&rcfile)?;
    file.write_all(ZSH_HOOK.as_bytes())?;
    let path = dir.keep();
    tracing::debug!("wrote hook dir {}", path.display());
    Ok(path)
}

/// Temporary PowerShell profile wrapping the `prompt` function.
pub fn write_powershell_profile() -> anyhow::Result<PathBuf> {
    write_temp_file(".ps1", POWERSHELL_HOOK)
}
