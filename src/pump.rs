//! The session I/O loop: keystrokes to the shell, shell output to the user
//! with markers filtered out and handed to the failure advisor.
//!
//! Markers are only recognised within a single read. One split across two
//! reads passes through undetected (and unstripped); shell hooks emit each
//! marker in a single short write, which makes this rare in practice.

use std::borrow::Cow;
use std::io;

use crate::advice::RECENT_OUTPUT_CHARS;
use crate::marker::{find_markers, strip_markers, Marker};

pub const OUTPUT_BUFFER_SIZE: usize = 4096;
pub const STDIN_CHUNK: usize = 1024;
pub const PTY_CHUNK: usize = 4096;

/// Bounded accumulator that keeps only the most recent `capacity` bytes.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if bytes.len() >= self.capacity {
            self.data.clear();
            self.data
                .extend_from_slice(&bytes[bytes.len() - self.capacity..]);
            return;
        }
        self.data.extend_from_slice(bytes);
        if self.data.len() > self.capacity {
            let excess = self.data.len() - self.capacity;
            self.data.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The last `max_chars` characters, decoded lossily.
    pub fn tail_text(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.data);
        let count = text.chars().count();
        if count <= max_chars {
            return text.into_owned();
        }
        text.chars().skip(count - max_chars).collect()
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(OUTPUT_BUFFER_SIZE)
    }
}

/// Marker handling for shell output, one chunk at a time.
#[derive(Debug, Default)]
pub struct OutputFilter {
    buffer: RollingBuffer,
}

impl OutputFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &RollingBuffer {
        &self.buffer
    }

    /// Call `on_marker` for each marker in `chunk`, in order, with the recent
    /// output seen since the previous marker; the buffer is reset after each.
    /// Returns the chunk with every marker removed.
    pub fn process_chunk<'c, F>(&mut self, chunk: &'c [u8], mut on_marker: F) -> io::Result<Cow<'c, [u8]>>
    where
        F: FnMut(&Marker, &str) -> io::Result<()>,
    {
        for marker in find_markers(chunk) {
            let recent = self.buffer.tail_text(RECENT_OUTPUT_CHARS);
            on_marker(&marker, &recent)?;
            self.buffer.clear();
        }
        Ok(strip_markers(chunk))
    }

    /// Remember output the user has already been shown.
    pub fn record(&mut self, cleaned: &[u8]) {
        self.buffer.append(cleaned);
    }
}

#[cfg(unix)]
pub use self::fd_loop::*;

#[cfg(unix)]
mod fd_loop {
    use std::io;
    use std::os::fd::BorrowedFd;

    use rustix::event::{poll, PollFd, PollFlags};
    use rustix::io::Errno;

    use super::{OutputFilter, PTY_CHUNK, STDIN_CHUNK};
    use crate::advice::{FailureAdvisor, PromptTerminal};
    use crate::query::Advisor;
    use crate::session::SessionCleanup;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LoopExit {
        /// End-of-stream on the real terminal.
        InputClosed,
        /// End-of-stream on the PTY master: the shell has gone away.
        ShellClosed,
        /// Read or write failure on either side.
        IoError,
    }

    pub(crate) fn write_all(fd: BorrowedFd<'_>, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match rustix::io::write(fd, data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => data = &data[n..],
                Err(e) if e == Errno::INTR || e == Errno::AGAIN => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// The real terminal plus the PTY master, as used by the auto-run prompt.
    pub struct FdTerminal<'a> {
        pub stdin: BorrowedFd<'a>,
        pub stdout: BorrowedFd<'a>,
        pub master: BorrowedFd<'a>,
    }

    impl PromptTerminal for FdTerminal<'_> {
        fn write_output(&mut self, bytes: &[u8]) -> io::Result<()> {
            write_all(self.stdout, bytes)
        }

        fn read_input_byte(&mut self) -> io::Result<Option<u8>> {
            let mut byte = [0u8; 1];
            loop {
                match rustix::io::read(self.stdin, &mut byte[..]) {
                    Ok(0) => return Ok(None),
                    Ok(_) => return Ok(Some(byte[0])),
                    Err(e) if e == Errno::INTR => continue,
                    Err(e) => return Err(e.into()),
                }
            }
        }

        fn inject(&mut self, bytes: &[u8]) -> io::Result<()> {
            write_all(self.master, bytes)
        }
    }

    fn readable(fd: &PollFd<'_>) -> bool {
        fd.revents()
            .intersects(PollFlags::IN | PollFlags::HUP | PollFlags::ERR | PollFlags::NVAL)
    }

    enum Step {
        Continue,
        Exit(LoopExit),
    }

    fn forward_input(term: &FdTerminal<'_>, buf: &mut [u8]) -> Step {
        match rustix::io::read(term.stdin, &mut *buf) {
            Ok(0) => Step::Exit(LoopExit::InputClosed),
            Ok(n) => match write_all(term.master, &buf[..n]) {
                Ok(()) => Step::Continue,
                Err(e) => {
                    tracing::debug!("write to pty failed: {e}");
                    Step::Exit(LoopExit::IoError)
                }
            },
            Err(e) if e == Errno::INTR || e == Errno::AGAIN => Step::Continue,
            Err(e) => {
                tracing::debug!("stdin read failed: {e}");
                Step::Exit(LoopExit::IoError)
            }
        }
    }

    fn forward_output<A: Advisor>(
        term: &mut FdTerminal<'_>,
        filter: &mut OutputFilter,
        advisor: &mut FailureAdvisor<A>,
        buf: &mut [u8],
    ) -> Step {
        let n = match rustix::io::read(term.master, &mut *buf) {
            Ok(0) => return Step::Exit(LoopExit::ShellClosed),
            Ok(n) => n,
            Err(e) if e == Errno::INTR || e == Errno::AGAIN => return Step::Continue,
            // Linux reports EIO on the master once the slave side is gone.
            Err(e) if e == Errno::IO => return Step::Exit(LoopExit::ShellClosed),
            Err(e) => {
                tracing::debug!("pty read failed: {e}");
                return Step::Exit(LoopExit::IoError);
            }
        };

        let chunk = &buf[..n];
        let cleaned = match filter.process_chunk(chunk, |marker, recent| {
            advisor.handle_marker(marker, recent, &mut *term).map(|outcome| {
                tracing::debug!("marker exit={} outcome={outcome:?}", marker.exit_code);
            })
        }) {
            Ok(cleaned) => cleaned,
            Err(e) => {
                tracing::debug!("advice interaction failed: {e}");
                return Step::Exit(LoopExit::IoError);
            }
        };

        if let Err(e) = write_all(term.stdout, &cleaned) {
            tracing::debug!("stdout write failed: {e}");
            return Step::Exit(LoopExit::IoError);
        }
        filter.record(&cleaned);
        Step::Continue
    }

    /// Shuttle bytes until either side closes or fails. Blocks in `poll`
    /// with no timeout; advice runs inline and stalls the loop meanwhile.
    pub fn pump_loop<A: Advisor>(
        stdin: BorrowedFd<'_>,
        stdout: BorrowedFd<'_>,
        master: BorrowedFd<'_>,
        advisor: &mut FailureAdvisor<A>,
    ) -> LoopExit {
        let mut term = FdTerminal {
            stdin,
            stdout,
            master,
        };
        let mut filter = OutputFilter::new();
        let mut in_buf = [0u8; STDIN_CHUNK];
        let mut out_buf = [0u8; PTY_CHUNK];

        loop {
            let mut fds = [
                PollFd::from_borrowed_fd(stdin, PollFlags::IN),
                PollFd::from_borrowed_fd(master, PollFlags::IN),
            ];
            match poll(&mut fds, None) {
                Ok(_) => {}
                Err(e) if e == Errno::INTR || e == Errno::AGAIN => continue,
                Err(e) => {
                    tracing::debug!("poll failed: {e}");
                    return LoopExit::IoError;
                }
            }
            let (stdin_ready, master_ready) = (readable(&fds[0]), readable(&fds[1]));

            if stdin_ready {
                if let Step::Exit(exit) = forward_input(&term, &mut in_buf) {
                    return exit;
                }
            }
            if master_ready {
                if let Step::Exit(exit) =
                    forward_output(&mut term, &mut filter, advisor, &mut out_buf)
                {
                    return exit;
                }
            }
        }
    }

    /// Run the loop to completion, then release the session's resources.
    pub fn drive_session<A: Advisor>(
        stdin: BorrowedFd<'_>,
        stdout: BorrowedFd<'_>,
        master: BorrowedFd<'_>,
        advisor: &mut FailureAdvisor<A>,
        cleanup: &mut SessionCleanup,
    ) -> LoopExit {
        let exit = pump_loop(stdin, stdout, master, advisor);
        tracing::debug!("session loop ended: {exit:?}");
        cleanup.run();
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_buffer_keeps_suffix() {
        let mut buf = RollingBuffer::new(8);
        let mut all = Vec::new();
        for piece in [&b"abc"[..], b"", b"defgh", b"ij", b"0123456789abcdef", b"x"] {
            buf.append(piece);
            all.extend_from_slice(piece);
            assert!(buf.len() <= 8);
            let keep = all.len().min(8);
            assert_eq!(buf.as_bytes(), &all[all.len() - keep..]);
        }
    }

    #[test]
    fn test_rolling_buffer_default_capacity() {
        let mut buf = RollingBuffer::default();
        buf.append(&vec![b'a'; 5000]);
        buf.append(b"tail");
        assert_eq!(buf.len(), OUTPUT_BUFFER_SIZE);
        assert!(buf.as_bytes().ends_with(b"aaaatail"));
    }

    #[test]
    fn test_tail_text_counts_characters() {
        let mut buf = RollingBuffer::new(64);
        buf.append("héllo wörld".as_bytes());
        assert_eq!(buf.tail_text(5), "wörld");
        assert_eq!(buf.tail_text(100), "héllo wörld");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.tail_text(5), "");
    }

    #[test]
    fn test_chunk_with_marker_end_to_end() {
        let mut filter = OutputFilter::new();
        filter.record(b"$ git status\r\nfatal: not a git repository\r\n");

        let mut chunk = b"<shell output>".to_vec();
        chunk.extend(Marker::encode(1, "git status"));
        chunk.extend_from_slice(b"<more output>");

        let mut seen = Vec::new();
        let cleaned = filter
            .process_chunk(&chunk, |marker, recent| {
                seen.push((marker.clone(), recent.to_string()));
                Ok(())
            })
            .unwrap()
            .into_owned();

        assert_eq!(cleaned, b"<shell output><more output>");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.command, "git status");
        assert_eq!(seen[0].0.exit_code, 1);
        assert!(seen[0].1.contains("fatal: not a git repository"));
        assert!(filter.buffer().is_empty());

        filter.record(&cleaned);
        assert_eq!(filter.buffer().as_bytes(), b"<shell output><more output>");
    }

    #[test]
    fn test_buffer_resets_between_markers_in_one_chunk() {
        let mut filter = OutputFilter::new();
        filter.record(b"first failure output");
        let mut chunk = Marker::encode(2, "a");
        chunk.extend(Marker::encode(0, "b"));
        chunk.extend(Marker::encode(3, "c"));

        let mut contexts = Vec::new();
        filter
            .process_chunk(&chunk, |m, recent| {
                contexts.push((m.command.clone(), recent.to_string()));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            contexts,
            vec![
                ("a".to_string(), "first failure output".to_string()),
                ("b".to_string(), String::new()),
                ("c".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_chunk_without_marker_is_untouched() {
        let mut filter = OutputFilter::new();
        filter.record(b"keep");
        let out = filter
            .process_chunk(b"\x1b[1mplain\x1b[0m", |_, _| panic!("no markers here"))
            .unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(filter.buffer().as_bytes(), b"keep");
    }

    #[test]
    fn test_callback_error_propagates() {
        let mut filter = OutputFilter::new();
        let chunk = Marker::encode(1, "x");
        let err = filter
            .process_chunk(&chunk, |_, _| Err(io::ErrorKind::BrokenPipe.into()))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[cfg(unix)]
    mod fd {
        use super::super::*;
        use crate::advice::testing::ScriptedAdvisor;
        use crate::advice::FailureAdvisor;
        use crate::config::Config;
        use crate::session::SessionCleanup;
        use std::cell::Cell;
        use std::io::{Read, Write};
        use std::os::fd::AsFd;
        use std::os::unix::net::UnixStream;
        use std::rc::Rc;
        use std::time::Duration;

        fn failure_advisor(command: &str) -> FailureAdvisor<ScriptedAdvisor> {
            FailureAdvisor::new(ScriptedAdvisor::suggesting(command), Config::default())
                .without_spinner()
        }

        fn read_until(stream: &mut UnixStream, needle: &[u8]) -> Vec<u8> {
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 512];
            while !seen.windows(needle.len()).any(|w| w == needle) {
                let n = stream.read(&mut buf).unwrap();
                assert!(n > 0, "stream closed before {needle:?}");
                seen.extend_from_slice(&buf[..n]);
            }
            seen
        }

        #[test]
        fn test_loop_forwards_both_directions_until_shell_closes() {
            let (stdin, mut user) = UnixStream::pair().unwrap();
            let (stdout, mut screen) = UnixStream::pair().unwrap();
            let (master, mut shell) = UnixStream::pair().unwrap();

            user.write_all(b"ls\r").unwrap();
            shell.write_all(b"file-a  file-b\r\n").unwrap();

            let handle = std::thread::spawn(move || {
                let mut advisor = failure_advisor("unused");
                let exit = pump_loop(stdin.as_fd(), stdout.as_fd(), master.as_fd(), &mut advisor);
                (exit, advisor.advisor().calls.len())
            });

            let mut typed = [0u8; 3];
            shell.read_exact(&mut typed).unwrap();
            assert_eq!(&typed, b"ls\r");
            read_until(&mut screen, b"file-b\r\n");
            drop(shell);

            let (exit, calls) = handle.join().unwrap();
            assert_eq!(exit, LoopExit::ShellClosed);
            assert_eq!(calls, 0);
        }

        #[test]
        fn test_loop_advises_and_injects_on_accept() {
            let (stdin, mut user) = UnixStream::pair().unwrap();
            let (stdout, mut screen) = UnixStream::pair().unwrap();
            let (master, mut shell) = UnixStream::pair().unwrap();

            let handle = std::thread::spawn(move || {
                let mut advisor = failure_advisor("git switch main");
                let exit = pump_loop(stdin.as_fd(), stdout.as_fd(), master.as_fd(), &mut advisor);
                (exit, advisor.advisor().calls.clone())
            });

            shell
                .write_all(b"error: pathspec 'mian' did not match\r\n")
                .unwrap();
            read_until(&mut screen, b"did not match\r\n");

            let mut out = Marker::encode(1, "git checkout mian");
            out.extend_from_slice(b"$ ");
            shell.write_all(&out).unwrap();

            let shown = read_until(&mut screen, crate::advice::AUTO_RUN_PROMPT.as_bytes());
            assert!(shown.starts_with(b"\r\n\x1b[1mtutr suggests:"));
            assert!(shown.windows(15).any(|w| w == b"git switch main"));

            user.write_all(b"y").unwrap();
            let mut injected = [0u8; 16];
            shell.read_exact(&mut injected).unwrap();
            assert_eq!(&injected, b"git switch main\n");

            let rest = read_until(&mut screen, b"y\r\n$ ");
            assert!(!rest.windows(6).any(|w| w == b"\x1b]7770"));
            drop(shell);

            let (exit, calls) = handle.join().unwrap();
            assert_eq!(exit, LoopExit::ShellClosed);
            assert_eq!(calls.len(), 1);
            assert!(calls[0].contains(&"mian".to_string()));
            assert!(calls[0].contains(&"pathspec".to_string()));
        }

        #[test]
        fn test_loop_ends_on_input_eof() {
            let (stdin, user) = UnixStream::pair().unwrap();
            let (stdout, _screen) = UnixStream::pair().unwrap();
            let (master, _shell) = UnixStream::pair().unwrap();
            drop(user);
            let mut advisor = failure_advisor("x");
            let exit = pump_loop(stdin.as_fd(), stdout.as_fd(), master.as_fd(), &mut advisor);
            assert_eq!(exit, LoopExit::InputClosed);
        }

        #[test]
        fn test_loop_ends_on_read_error() {
            let dir = tempfile::tempdir().unwrap();
            let not_readable = std::fs::File::open(dir.path()).unwrap();
            let (stdout, _screen) = UnixStream::pair().unwrap();
            let (master, _shell) = UnixStream::pair().unwrap();
            let mut advisor = failure_advisor("x");
            let exit = pump_loop(
                not_readable.as_fd(),
                stdout.as_fd(),
                master.as_fd(),
                &mut advisor,
            );
            assert_eq!(exit, LoopExit::IoError);
        }

        #[test]
        fn test_every_exit_path_cleans_up_once() {
            for path in ["eof", "error", "shell-exit"] {
                let tmp = tempfile::tempdir().unwrap();
                let hook = tmp.path().join("tutr_hook.bashrc");
                let zdot = tmp.path().join("tutr_zsh_dir");
                std::fs::write(&hook, "x").unwrap();
                std::fs::create_dir(&zdot).unwrap();

                let restored = Rc::new(Cell::new(0));
                let counter = restored.clone();
                let mut cleanup = SessionCleanup::new(vec![hook.clone(), zdot.clone()]);
                cleanup.on_restore(move || counter.set(counter.get() + 1));

                let (stdout, _screen) = UnixStream::pair().unwrap();
                let (master, shell) = UnixStream::pair().unwrap();
                let (stdin_sock, user) = UnixStream::pair().unwrap();
                let dir_fd = std::fs::File::open(tmp.path()).unwrap();
                let mut advisor = failure_advisor("x");

                let exit = match path {
                    "eof" => {
                        drop(user);
                        drive_session(stdin_sock.as_fd(), stdout.as_fd(), master.as_fd(), &mut advisor, &mut cleanup)
                    }
                    "error" => drive_session(dir_fd.as_fd(), stdout.as_fd(), master.as_fd(), &mut advisor, &mut cleanup),
                    _ => {
                        drop(shell);
                        drive_session(stdin_sock.as_fd(), stdout.as_fd(), master.as_fd(), &mut advisor, &mut cleanup)
                    }
                };
                let expected = match path {
                    "eof" => LoopExit::InputClosed,
                    "error" => LoopExit::IoError,
                    _ => LoopExit::ShellClosed,
                };
                assert_eq!(exit, expected, "{path}");

                // A later drop must not repeat anything.
                std::fs::write(&hook, "recreated").unwrap();
                drop(cleanup);
                assert_eq!(restored.get(), 1, "{path}");
                assert!(hook.exists(), "{path}");
                assert!(!zdot.exists(), "{path}");
            }
        }
    }
}
