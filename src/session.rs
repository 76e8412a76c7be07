//! Session cleanup: terminal restore, hook removal, child exit status.

use std::path::{Path, PathBuf};

type RestoreFn = Box<dyn FnOnce()>;

/// Releases everything a session acquired. Runs at most once, either through
/// [`SessionCleanup::run`] or on drop, so every exit path (normal child exit,
/// I/O error, early `?` return, panic unwind) is covered.
pub struct SessionCleanup {
    paths: Vec<PathBuf>,
    restore: Option<RestoreFn>,
}

impl SessionCleanup {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            restore: None,
        }
    }

    /// Register the terminal restore step. It runs before any path removal.
    pub fn on_restore(&mut self, restore: impl FnOnce() + 'static) {
        self.restore = Some(Box::new(restore));
    }

    pub fn run(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
        for path in self.paths.drain(..) {
            remove_path(&path);
        }
    }
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        self.run();
    }
}

/// Best-effort removal of a file or directory tree.
pub fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    if let Err(e) = result {
        tracing::debug!("could not remove {}: {e}", path.display());
    }
}

/// Translate a raw `waitpid` status into a process exit code.
/// Death by signal N maps to 128 + N.
#[cfg(unix)]
pub fn exit_code_from_wait_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// Block until `pid` exits and return its translated exit code.
#[cfg(unix)]
pub fn wait_for_child(pid: libc::pid_t) -> i32 {
    let mut status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return exit_code_from_wait_status(status);
        }
        let err = std::io::Error::last_os_error();
        if rc == -1 && err.kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        tracing::debug!("waitpid({pid}) failed: {err}");
        return 1;
    }
}
