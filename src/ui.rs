//! # UI Collaborator
//!
//! The editor layer receives everything through [`UiSink`]; the core never
//! returns evaluation results to its callers. Rendering, annotation, and
//! jump behavior live on the other side of this trait.

use async_trait::async_trait;

use crate::sexp::Sexp;

/// A normalized jump target. The column is 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub path: String,
    pub line: u64,
    pub column: u64,
}

#[async_trait]
pub trait UiSink: Send + Sync {
    /// A result, documentation text, or test report for a connection.
    async fn out(&self, tag: &str, text: &str);

    /// A user-visible failure for a connection.
    async fn err(&self, tag: &str, text: &str);

    /// A definition jump target.
    async fn location(&self, tag: &str, location: &SourceLocation);

    /// Completion candidates, as the raw data the runtime answered with.
    async fn completions(&self, tag: &str, candidates: &Sexp);
}
