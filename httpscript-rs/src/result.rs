//! Script run outcomes and the sinks that capture them.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

// ── ExecutionResult ───────────────────────────────────────────────────────────

/// The single outcome of running one script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResult {
    /// The script's entry function resolved with `value`.
    Success { value: Value },
    /// The run failed.
    Failure { kind: ErrorKind, message: String },
}

impl ExecutionResult {
    pub fn success(value: Value) -> Self {
        ExecutionResult::Success { value }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// The success payload, if any.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ExecutionResult::Success { value } => Some(value),
            ExecutionResult::Failure { .. } => None,
        }
    }

    /// The failure kind, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { kind, .. } => Some(*kind),
        }
    }

    /// The failure message, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure { message, .. } => Some(message),
        }
    }
}

// ── ResultSink ────────────────────────────────────────────────────────────────

/// Receives each [`ExecutionResult`] once its run has completed.
///
/// Called synchronously by the harness right after evaluation; the result is
/// passed through untouched.
pub trait ResultSink: Send + Sync {
    fn capture(&self, script: &str, result: &ExecutionResult);
}

impl<F> ResultSink for F
where
    F: Fn(&str, &ExecutionResult) + Send + Sync,
{
    fn capture(&self, script: &str, result: &ExecutionResult) {
        self(script, result)
    }
}

/// Drops every result.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardResults;

impl ResultSink for DiscardResults {
    fn capture(&self, _script: &str, _result: &ExecutionResult) {}
}

/// Keeps results in memory, in completion order.
#[derive(Debug, Default)]
pub struct ResultCollector {
    entries: Mutex<Vec<(String, ExecutionResult)>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of everything captured so far.
    pub fn results(&self) -> Vec<(String, ExecutionResult)> {
        self.lock().clone()
    }

    /// Most recent result captured for `script`.
    pub fn last_for(&self, script: &str) -> Option<ExecutionResult> {
        self.lock()
            .iter()
            .rev()
            .find(|(name, _)| name == script)
            .map(|(_, r)| r.clone())
    }

    /// Drain all captured results.
    pub fn take(&self) -> Vec<(String, ExecutionResult)> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, ExecutionResult)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ResultSink for ResultCollector {
    fn capture(&self, script: &str, result: &ExecutionResult) {
        self.lock().push((script.to_owned(), result.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_status_tag() {
        let ok = ExecutionResult::success(json!({"a": 1}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "success", "value": {"a": 1}})
        );

        let err = ExecutionResult::failure(ErrorKind::Timeout, "too slow");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"status": "failure", "kind": "Timeout", "message": "too slow"})
        );
    }

    #[test]
    fn accessors() {
        let ok = ExecutionResult::success(json!(3));
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&json!(3)));
        assert_eq!(ok.kind(), None);

        let err = ExecutionResult::failure(ErrorKind::NotFound, "gone");
        assert!(!err.is_success());
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        assert_eq!(err.message(), Some("gone"));
    }

    #[test]
    fn collector_keeps_order_and_drains() {
        let c = ResultCollector::new();
        c.capture("a", &ExecutionResult::success(json!(1)));
        c.capture("b", &ExecutionResult::success(json!(2)));
        c.capture("a", &ExecutionResult::success(json!(3)));

        assert_eq!(c.len(), 3);
        assert_eq!(c.last_for("a"), Some(ExecutionResult::success(json!(3))));
        assert_eq!(c.last_for("zzz"), None);

        let drained = c.take();
        assert_eq!(drained[0].0, "a");
        assert_eq!(drained[1].0, "b");
        assert!(c.is_empty());
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |name: &str, r: &ExecutionResult| {
            seen.lock().unwrap().push((name.to_owned(), r.is_success()));
        };
        sink.capture("x", &ExecutionResult::success(json!(null)));
        assert_eq!(seen.lock().unwrap().as_slice(), &[("x".to_owned(), true)]);
    }
}
