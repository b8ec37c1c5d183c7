//! Destinations for diagnostic output produced by scripts.
//!
//! Every `print(...)` call inside a script becomes one line delivered to the
//! [`OutputSink`] injected into the run.

use std::sync::Mutex;

/// Receives lines printed by a script.
pub trait OutputSink: Send + Sync {
    fn line(&self, script: &str, text: &str);
}

/// Emits each line as a `tracing` event on the `script` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn line(&self, script: &str, text: &str) {
        tracing::info!(target: "script", script, "{text}");
    }
}

/// Buffers lines in memory; used by tests and by callers that want the
/// output alongside the result.
#[derive(Debug, Default)]
pub struct BufferSink {
    lines: Mutex<Vec<String>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines().join("\n")
    }
}

impl OutputSink for BufferSink {
    fn line(&self, _script: &str, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_owned());
    }
}
