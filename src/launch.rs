//! Launch configuration for the wrapped shell.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::detect::DetectedShell;
use crate::shell_hooks::ShellKind;

/// Set in the child environment: the shell runs inside a tutr PTY session.
pub const ACTIVE_ENV: &str = "TUTR_ACTIVE";
/// Set in the child environment so rc-file auto-start snippets do not launch
/// tutr again from inside the session.
pub const AUTOSTARTED_ENV: &str = "TUTR_AUTOSTARTED";

/// Everything needed to exec the wrapped shell. Built once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLaunchConfig {
    pub kind: ShellKind,
    pub executable: PathBuf,
    pub argv: Vec<OsString>,
    pub env: BTreeMap<OsString, OsString>,
    /// Hook artifacts created for this session.
    pub cleanup_paths: Vec<PathBuf>,
}

impl ShellLaunchConfig {
    /// Generate the hook artifact for `shell` and assemble the launch.
    pub fn build(shell: &DetectedShell) -> anyhow::Result<Self> {
        let env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        let hook = shell.kind.write_hook()?;
        Ok(Self::assemble(shell, env, hook))
    }

    /// Pure assembly from an existing environment and hook path.
    pub fn assemble(
        shell: &DetectedShell,
        mut env: BTreeMap<OsString, OsString>,
        hook: PathBuf,
    ) -> Self {
        env.insert(ACTIVE_ENV.into(), "1".into());
        env.insert(AUTOSTARTED_ENV.into(), "1".into());

        let exe: OsString = shell.executable.clone().into_os_string();
        let argv: Vec<OsString> = match shell.kind {
            ShellKind::Bash => vec![
                exe,
                "--rcfile".into(),
                hook.clone().into_os_string(),
                "-i".into(),
            ],
            ShellKind::Zsh => {
                env.insert("ZDOTDIR".into(), hook.clone().into_os_string());
                vec![exe, "-i".into()]
            }
            ShellKind::PowerShell => vec![
                exe,
                "-NoLogo".into(),
                "-NoExit".into(),
                "-File".into(),
                hook.clone().into_os_string(),
            ],
        };

        Self {
            kind: shell.kind,
            executable: shell.executable.clone(),
            argv,
            env,
            cleanup_paths: vec![hook],
        }
    }
}
