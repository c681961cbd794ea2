//! # Configuration Surface
//!
//! Configuration discovery and merging happen outside this crate; what
//! arrives here is already-merged data. [`ClientConfig`] carries the global
//! hook defaults and the pretty-print flag, and one [`ConnectionConfig`]
//! per configured runtime. The core itself only reads `dialect`, `tag`,
//! `hooks`, and `dirs`; the remaining fields are passed through to the
//! transport collaborator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreResult;

/// Evaluation-target dialect of a connection.
///
/// `Clj` accepts multi-form submissions and conditional reader branches.
/// `Cljs` accepts exactly one top-level form per submission, answers with a
/// namespace-switch acknowledgment before every result, and has no
/// reflection-based namespace introspection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Clj,
    Cljs,
}

/// Named interception points of the hook pipeline.
///
/// Connect runs at bring-up before dependency injection, Eval transforms
/// code before submission, Result runs after a successful evaluation, and
/// the refresh stage has paired before/after entries around a reload.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum HookName {
    Connect,
    Eval,
    Result,
    RefreshBefore,
    RefreshAfter,
}

/// Fully qualified symbol naming a callable inside the target runtime.
///
/// Resolved lazily at invocation time, not at configuration load; a hook
/// can therefore be configured before the runtime has defined it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookSpec(pub String);

impl HookSpec {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn symbol(&self) -> &str {
        &self.0
    }

    /// The namespace part of the symbol, when qualified.
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }
}

/// Reload operation selector for the refresh action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Drop all reload state without reloading.
    Clear,
    /// Reload namespaces whose files changed.
    Changed,
    /// Reload everything.
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub tag: String,

    pub dialect: Dialect,

    #[serde(default = "default_host")]
    pub host: String,

    pub port: u16,

    /// File extensions this connection claims; empty claims everything.
    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub hooks: HashMap<HookName, HookSpec>,

    /// Reload root directories for the refresh action.
    #[serde(default)]
    pub dirs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Global hook defaults, overridden per connection tag.
    #[serde(default)]
    pub hooks: HashMap<HookName, HookSpec>,

    /// Render multi-line, indented code text instead of compact one-liners.
    #[serde(default)]
    pub pretty: bool,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl ClientConfig {
    pub fn from_json(source: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_true() -> bool {
    true
}
