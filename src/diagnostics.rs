//! # Diagnostics Sink
//!
//! Append-only, thread-safe log of compiler errors and warnings.
//!
//! Parallel context compilations share one sink. Every entry carries the
//! function and node it originated from so tooling can map it back to the
//! source graph.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{CompileError, ErrorKind};
use crate::graph::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub function: Option<String>,
    pub node: Option<NodeId>,
    pub node_guid: Option<Uuid>,
    pub kind: Option<ErrorKind>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            function: None,
            node: None,
            node_guid: None,
            kind: None,
        }
    }

    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn at_node(mut self, node: NodeId, guid: Option<Uuid>) -> Self {
        self.node = Some(node);
        self.node_guid = guid;
        self
    }
}

/// Cloneable handle; clones append to the same log
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => tracing::error!("[PBBC] {}", diagnostic.message),
            Severity::Warning => tracing::warn!("[PBBC] {}", diagnostic.message),
            Severity::Note => tracing::debug!("[PBBC] {}", diagnostic.message),
        }
        self.entries.lock().push(diagnostic);
    }

    /// Record a compile error raised while compiling `function`
    pub fn error(&self, function: Option<&str>, guid: Option<Uuid>, error: &CompileError) {
        let mut diagnostic = Diagnostic::new(Severity::Error, error.to_string());
        diagnostic.kind = Some(error.kind());
        if let Some(function) = function {
            diagnostic = diagnostic.in_function(function);
        }
        if let Some(node) = error.node() {
            diagnostic = diagnostic.at_node(node, guid);
        }
        self.report(diagnostic);
    }

    pub fn warning(&self, function: Option<&str>, node: Option<(NodeId, Uuid)>, message: impl Into<String>) {
        let mut diagnostic = Diagnostic::new(Severity::Warning, message);
        if let Some(function) = function {
            diagnostic = diagnostic.in_function(function);
        }
        if let Some((node, guid)) = node {
            diagnostic = diagnostic.at_node(node, Some(guid));
        }
        self.report(diagnostic);
    }

    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    pub fn errors_for(&self, function: &str) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .iter()
            .filter(|d| d.severity == Severity::Error && d.function.as_deref() == Some(function))
            .cloned()
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.lock().iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_appends() {
        let sink = DiagnosticSink::new();
        crossbeam::thread::scope(|scope| {
            for worker in 0..4 {
                let sink = sink.clone();
                scope.spawn(move |_| {
                    for i in 0..25 {
                        sink.warning(Some(&format!("fn_{}", worker)), None, format!("warning {}", i));
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(sink.len(), 100);
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_error_carries_identity() {
        let sink = DiagnosticSink::new();
        let guid = Uuid::new_v4();
        let error = CompileError::MissingRequiredPin {
            node: NodeId(4),
            pin: "condition".into(),
        };
        sink.error(Some("Tick"), Some(guid), &error);

        let errors = sink.errors_for("Tick");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node, Some(NodeId(4)));
        assert_eq!(errors[0].node_guid, Some(guid));
        assert_eq!(errors[0].kind, Some(ErrorKind::Reference));
        assert!(sink.errors_for("BeginPlay").is_empty());
    }
}
