//! Scoped spinner shown while waiting for the first generated token.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use unicode_width::UnicodeWidthStr;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK: Duration = Duration::from_millis(80);

/// Running spinner. Stopping (explicitly or on drop) joins the thread and
/// erases the spinner line, so nothing it writes can interleave with output
/// printed afterwards.
pub struct ProgressGuard {
    stop_flag: Arc<AtomicBool>,
    frames_drawn: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressGuard {
    /// Starts drawing `message` to `out` until stopped.
    #[must_use]
    pub fn start<W>(message: impl Into<String>, mut out: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let message = message.into();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let frames_drawn = Arc::new(AtomicUsize::new(0));

        let thread = {
            let stop_flag = Arc::clone(&stop_flag);
            let frames_drawn = Arc::clone(&frames_drawn);
            thread::spawn(move || {
                let mut widest = 0;
                while !stop_flag.load(Ordering::SeqCst) {
                    let drawn = frames_drawn.load(Ordering::SeqCst);
                    let frame = SPINNER_FRAMES[drawn % SPINNER_FRAMES.len()];
                    let line = format!("{frame} {message}");
                    widest = widest.max(line.width());
                    let _ = write!(out, "\r{line}");
                    let _ = out.flush();
                    frames_drawn.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(TICK);
                }
                if widest > 0 {
                    let _ = write!(out, "\r{}\r", " ".repeat(widest));
                    let _ = out.flush();
                }
            })
        };

        Self {
            stop_flag,
            frames_drawn,
            thread: Some(thread),
        }
    }

    /// A guard that draws nothing, for non-interactive output.
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(true)),
            frames_drawn: Arc::new(AtomicUsize::new(0)),
            thread: None,
        }
    }

    #[must_use]
    pub fn frames_drawn(&self) -> usize {
        self.frames_drawn.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::ProgressGuard;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            let bytes = self.0.lock().expect("buffer lock").clone();
            String::from_utf8(bytes).expect("utf8 output")
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stop_joins_and_clears_the_line() {
        let buffer = SharedBuffer::default();
        let mut guard = ProgressGuard::start("Thinking...", buffer.clone());
        thread::sleep(Duration::from_millis(120));
        guard.stop();

        assert!(!guard.is_running());
        assert!(guard.frames_drawn() >= 1);
        let written = buffer.contents();
        assert!(written.contains("Thinking..."));
        assert!(written.ends_with('\r'));

        // Nothing is written after stop returns.
        let len = written.len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(buffer.contents().len(), len);
    }

    #[test]
    fn drop_stops_the_spinner() {
        let buffer = SharedBuffer::default();
        {
            let _guard = ProgressGuard::start("Waiting", buffer.clone());
            thread::sleep(Duration::from_millis(20));
        }
        let len = buffer.contents().len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(buffer.contents().len(), len);
    }

    #[test]
    fn hidden_guard_is_inert() {
        let mut guard = ProgressGuard::hidden();
        assert!(!guard.is_running());
        guard.stop();
        assert_eq!(guard.frames_drawn(), 0);
    }
}
