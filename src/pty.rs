use std::ffi::CString;
use std::io::IsTerminal;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use rustix::pty::{grantpt, openpt, ptsname, unlockpt};
use rustix::termios::{self, Termios};
use signal_hook::iterator::backend::Handle as SignalHandle;
use signal_hook::iterator::Signals;

use crate::advice::FailureAdvisor;
use crate::config::Config;
use crate::detect::detect_shell;
use crate::launch::{ShellLaunchConfig, ACTIVE_ENV};
use crate::pump::drive_session;
use crate::query::LlmAdvisor;
use crate::session::{wait_for_child, SessionCleanup};

pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

// Note: rustix::pty::ptsname() calls the non-thread-safe macOS ptsname(3).
// Safe here because the PTY is created before any helper thread starts.
pub fn create_pty() -> anyhow::Result<PtyPair> {
    let master = openpt(rustix::pty::OpenptFlags::RDWR | rustix::pty::OpenptFlags::NOCTTY)?;
    grantpt(&master)?;
    unlockpt(&master)?;

    let slave_name = ptsname(&master, Vec::new())?;
    let slave = rustix::fs::open(
        slave_name.as_c_str(),
        rustix::fs::OFlags::RDWR | rustix::fs::OFlags::NOCTTY,
        rustix::fs::Mode::empty(),
    )?;

    Ok(PtyPair { master, slave })
}

/// Set terminal to raw mode, return original settings for restoration.
pub fn make_raw(fd: BorrowedFd) -> anyhow::Result<Termios> {
    let original = termios::tcgetattr(fd)?;
    let mut raw = original.clone();
    raw.make_raw();
    termios::tcsetattr(fd, termios::OptionalActions::Now, &raw)?;
    Ok(original)
}

/// Put back saved terminal settings, discarding any input typed ahead
/// that the shell never consumed.
pub fn restore_terminal(fd: BorrowedFd, original: &Termios) -> rustix::io::Result<()> {
    termios::tcsetattr(fd, termios::OptionalActions::Flush, original)
}

/// Copy terminal size (rows, columns and pixel dimensions) from one fd to another.
pub fn copy_winsize(from: BorrowedFd, to: BorrowedFd) -> anyhow::Result<()> {
    let ws = termios::tcgetwinsize(from)?;
    termios::tcsetwinsize(to, ws)?;
    Ok(())
}

/// Executable, argv and environment converted for `execve`. Built before
/// `fork` so the child allocates nothing.
pub struct ExecImage {
    path: CString,
    _argv: Vec<CString>,
    _env: Vec<CString>,
    argv_ptrs: Vec<*const libc::c_char>,
    env_ptrs: Vec<*const libc::c_char>,
}

fn c_string(bytes: &[u8], what: &str) -> anyhow::Result<CString> {
    CString::new(bytes).map_err(|_| anyhow::anyhow!("{what} contains a NUL byte"))
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

impl ExecImage {
    pub fn from_launch(launch: &ShellLaunchConfig) -> anyhow::Result<Self> {
        let path = c_string(launch.executable.as_os_str().as_bytes(), "shell path")?;
        let argv = launch
            .argv
            .iter()
            .map(|a| c_string(a.as_bytes(), "shell argument"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let env = launch
            .env
            .iter()
            .filter(|(k, _)| !k.is_empty() && !k.as_bytes().contains(&b'='))
            .map(|(k, v)| {
                let mut entry = k.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(v.as_bytes());
                c_string(&entry, "environment entry")
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let argv_ptrs = null_terminated(&argv);
        let env_ptrs = null_terminated(&env);
        Ok(Self {
            path,
            _argv: argv,
            _env: env,
            argv_ptrs,
            env_ptrs,
        })
    }
}

/// Runs in the forked child: make the slave the controlling terminal on
/// fds 0-2 and exec. Never returns; any failure exits with 127.
fn exec_child(master: RawFd, slave: RawFd, image: &ExecImage) -> ! {
    unsafe {
        libc::close(master);
        if libc::setsid() == -1 {
            libc::_exit(127);
        }
        // Without a controlling tty job control degrades, but the shell still runs.
        libc::ioctl(slave, libc::TIOCSCTTY as _, 0);
        for fd in 0..=2 {
            if libc::dup2(slave, fd) == -1 {
                libc::_exit(127);
            }
        }
        if slave > 2 {
            libc::close(slave);
        }
        libc::execve(
            image.path.as_ptr(),
            image.argv_ptrs.as_ptr(),
            image.env_ptrs.as_ptr(),
        );
        libc::_exit(127)
    }
}

/// Fork a child running `image` on the slave side of `pty`. The parent's
/// copy of the slave is closed before returning.
pub fn spawn_on_pty(pty: PtyPair, image: &ExecImage) -> anyhow::Result<(OwnedFd, libc::pid_t)> {
    let master_raw = pty.master.as_raw_fd();
    let slave_raw = pty.slave.as_raw_fd();
    match unsafe { libc::fork() } {
        -1 => anyhow::bail!("fork() failed: {}", std::io::Error::last_os_error()),
        0 => exec_child(master_raw, slave_raw, image),
        child => {
            drop(pty.slave);
            tracing::debug!("spawned shell pid {child}");
            Ok((pty.master, child))
        }
    }
}

/// Forwards terminal resizes to the PTY and the shell's process group.
struct ResizeForwarder {
    handle: SignalHandle,
    join: std::thread::JoinHandle<()>,
}

impl ResizeForwarder {
    fn spawn(stdin_fd: RawFd, master_fd: RawFd, child: libc::pid_t) -> anyhow::Result<Self> {
        let mut signals = Signals::new([signal_hook::consts::SIGWINCH])?;
        let handle = signals.handle();
        let join = std::thread::spawn(move || {
            for _ in signals.forever() {
                unsafe {
                    let mut ws: libc::winsize = std::mem::zeroed();
                    if libc::ioctl(stdin_fd, libc::TIOCGWINSZ, &mut ws) == 0 {
                        libc::ioctl(master_fd, libc::TIOCSWINSZ, &ws);
                    }
                    libc::kill(-child, libc::SIGWINCH);
                }
            }
        });
        Ok(Self { handle, join })
    }

    fn close_and_join(self) {
        self.handle.close();
        let _ = self.join.join();
    }
}

/// Run the user's shell inside a PTY with failure advice. This is the
/// `tutr shell` entrypoint; returns the shell's exit code.
pub fn run_wrapped_shell(config: Config) -> anyhow::Result<i32> {
    if std::env::var_os(ACTIVE_ENV).is_some() {
        anyhow::bail!("already inside a tutr session ({ACTIVE_ENV} is set); refusing to nest");
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("tutr shell must be run from an interactive terminal (stdin is not a TTY)");
    }

    let shell = detect_shell()?;
    tracing::debug!("using {} at {}", shell.kind, shell.executable.display());
    let launch = ShellLaunchConfig::build(&shell)?;
    let mut cleanup = SessionCleanup::new(launch.cleanup_paths.clone());
    let image = ExecImage::from_launch(&launch)?;
    let mut advisor = FailureAdvisor::new(LlmAdvisor::unbounded()?, config);

    let real_stdin = rustix::stdio::stdin();
    let real_stdout = rustix::stdio::stdout();

    let pty = create_pty()?;
    if let Err(e) = copy_winsize(real_stdin, pty.slave.as_fd()) {
        tracing::debug!("could not copy window size: {e}");
    }

    let (master, child) = spawn_on_pty(pty, &image)?;

    let forwarder = match ResizeForwarder::spawn(real_stdin.as_raw_fd(), master.as_raw_fd(), child) {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!("resize forwarding unavailable: {e}");
            None
        }
    };

    let original = match make_raw(real_stdin) {
        Ok(t) => t,
        Err(e) => {
            if let Some(f) = forwarder {
                f.close_and_join();
            }
            drop(master);
            unsafe { libc::kill(child, libc::SIGHUP) };
            wait_for_child(child);
            return Err(e);
        }
    };
    let stdin_raw = real_stdin.as_raw_fd();
    cleanup.on_restore(move || {
        if let Some(f) = forwarder {
            f.close_and_join();
        }
        let fd = unsafe { BorrowedFd::borrow_raw(stdin_raw) };
        if let Err(e) = restore_terminal(fd, &original) {
            tracing::debug!("terminal restore failed: {e}");
        }
    });

    drive_session(
        real_stdin,
        real_stdout,
        master.as_fd(),
        &mut advisor,
        &mut cleanup,
    );

    // Closing the master hangs up the shell if it is still running.
    drop(master);
    Ok(wait_for_child(child))
}
