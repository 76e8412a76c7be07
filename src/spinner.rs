use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const FRAMES: &[&str] = &["|", "/", "-", "\\"];
const INTERVAL: Duration = Duration::from_millis(100);
pub const MESSAGE: &str = "Asking tutr...";

/// Animates a wait indicator on stderr until dropped. Inert when stderr is
/// not a terminal.
pub struct SpinnerGuard {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SpinnerGuard {
    pub fn new() -> Self {
        Self::start(std::io::stderr().is_terminal())
    }

    fn start(enabled: bool) -> Self {
        let running = Arc::new(AtomicBool::new(enabled));
        let handle = enabled.then(|| {
            let running = Arc::clone(&running);
            std::thread::spawn(move || {
                let mut i = 0;
                while running.load(Ordering::SeqCst) {
                    let mut err = std::io::stderr();
                    let _ = write!(err, "\r{} {MESSAGE}", FRAMES[i % FRAMES.len()]);
                    let _ = err.flush();
                    i += 1;
                    std::thread::sleep(INTERVAL);
                }
            })
        });
        Self { running, handle }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }
}

impl Default for SpinnerGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SpinnerGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            let mut err = std::io::stderr();
            let _ = err.write_all(b"\r\x1b[K");
            let _ = err.flush();
        }
    }
}
