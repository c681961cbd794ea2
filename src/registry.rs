//! # Connection Registry
//!
//! The orchestrator consults, never owns, the set of live connections.
//! [`ConnectionRegistry`] is the collaborator seam; [`Connections`] is the
//! default shared-map implementation used by embedders and tests, keyed by
//! tag with the explicit enabled toggle.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::connection::Connection;

/// The editor context an action runs in: the current buffer path, its
/// namespace, and the cursor line.
#[derive(Debug, Clone, Default)]
pub struct ActionCtx {
    pub path: Option<String>,
    pub ns: Option<String>,
    pub line: Option<usize>,
}

/// Supplies the connections an action fans out over.
///
/// `passive` marks opportunistic callers (quick-doc, completions) for whom
/// an empty result is silence, not an error; implementations may use it to
/// skip expensive matching but must apply the same filter either way.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn current_connections(&self, ctx: &ActionCtx, passive: bool) -> Vec<Arc<Connection>>;
}

/// Default registry: a concurrent map of tag to connection.
#[derive(Debug, Default)]
pub struct Connections {
    inner: DashMap<String, Arc<Connection>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.inner.insert(connection.tag.clone(), connection);
    }

    pub fn remove(&self, tag: &str) -> Option<Arc<Connection>> {
        self.inner.remove(tag).map(|(_, connection)| connection)
    }

    pub fn get(&self, tag: &str) -> Option<Arc<Connection>> {
        self.inner.get(tag).map(|entry| entry.value().clone())
    }

    /// Flips the enabled flag for a tag. UI-synchronous; never called from
    /// evaluation actions.
    pub fn set_enabled(&self, tag: &str, enabled: bool) -> bool {
        match self.inner.get(tag) {
            Some(entry) => {
                entry.value().set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.inner.iter().map(|entry| entry.key().clone()).collect();
        tags.sort();
        tags
    }
}

#[async_trait]
impl ConnectionRegistry for Connections {
    async fn current_connections(&self, ctx: &ActionCtx, _passive: bool) -> Vec<Arc<Connection>> {
        let mut matched: Vec<Arc<Connection>> = self
            .inner
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|connection| {
                connection.is_enabled() && connection.matches_path(ctx.path.as_deref())
            })
            .collect();
        matched.sort_by(|a, b| a.tag.cmp(&b.tag));
        matched
    }
}
