//! Host output sink abstraction.
//!
//! The console opcodes accumulate text in an in-VM buffer;
//! `console.log.newline` flushes one completed line to an [`OutputSink`].
//! The sink is the engine's only external collaborator, so embedders swap
//! it to capture or redirect program output.

use std::cell::RefCell;
use std::rc::Rc;

/// Receiver for completed console output lines.
pub trait OutputSink {
    /// Delivers one completed line, without a trailing newline.
    fn line(&mut self, text: &str);
}

/// Default sink: prints each line to stdout.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn line(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Sink that collects lines into a shared buffer.
///
/// Cloning shares the underlying buffer, so a test can keep one handle and
/// hand the other to the VM.
#[derive(Clone, Default)]
pub struct CaptureSink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl CaptureSink {
    /// Creates an empty capture sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the captured lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl OutputSink for CaptureSink {
    fn line(&mut self, text: &str) {
        self.lines.borrow_mut().push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sink_collects_lines() {
        let mut sink = CaptureSink::new();
        sink.line("first");
        sink.line("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
    }

    #[test]
    fn capture_sink_clones_share_the_buffer() {
        let sink = CaptureSink::new();
        let mut handle = sink.clone();
        handle.line("shared");
        assert_eq!(sink.lines(), vec!["shared"]);
    }
}
