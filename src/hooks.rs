//! # Hook Pipeline
//!
//! User-configured interception points. A hook is a callable living inside
//! the target runtime; invoking one wraps a value in a single rendered
//! form, submits it through the normal eval path under a distinguished
//! synthetic source path, and interprets the tagged response.
//!
//! Lookup precedence is connection tag over global: a hook configured on
//! the connection wins over the orchestrator-wide default for the same
//! name. With no hook configured at either level, the value passes through
//! untouched with zero round trips.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{HookName, HookSpec};
use crate::connection::{Connection, Outcome};
use crate::error::CoreResult;
use crate::render::{EvalParams, RenderRequest, Renderer};
use crate::sexp::Sexp;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook {name} on {tag} failed: {raw}")]
    Failed {
        name: HookName,
        tag: String,
        raw: String,
    },
}

/// What a hook invocation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    /// No hook configured; the value untouched, no round trip happened.
    Unchanged(Sexp),
    /// The hook ran; its returned value.
    Applied(Sexp),
}

impl HookOutcome {
    pub fn into_value(self) -> Sexp {
        match self {
            HookOutcome::Unchanged(value) | HookOutcome::Applied(value) => value,
        }
    }
}

pub struct HookPipeline {
    global: HashMap<HookName, HookSpec>,
}

impl HookPipeline {
    pub fn new(global: HashMap<HookName, HookSpec>) -> Self {
        Self { global }
    }

    /// Resolves the hook spec for a connection, tag-specific first.
    pub fn spec<'a>(&'a self, connection: &'a Connection, name: HookName) -> Option<&'a HookSpec> {
        connection.hooks.get(&name).or_else(|| self.global.get(&name))
    }

    /// Invokes the named hook over a value, or returns the value unchanged
    /// when no hook is configured.
    ///
    /// # Errors
    ///
    /// An exceptional hook response becomes [`HookError::Failed`], carrying
    /// the hook name and raw response; callers abandon the triggering
    /// action and decide whether to surface the raw result.
    #[tracing::instrument(level = "debug", skip(self, renderer, value), fields(tag = %connection.tag))]
    pub async fn invoke(
        &self,
        connection: &Connection,
        renderer: &Renderer,
        name: HookName,
        value: Sexp,
        pretty: bool,
    ) -> CoreResult<HookOutcome> {
        let Some(spec) = self.spec(connection, name).cloned() else {
            return Ok(HookOutcome::Unchanged(value));
        };
        debug!(hook = %spec.symbol(), "invoking hook");
        let code = renderer.render(
            connection.dialect,
            &RenderRequest::Hook { hook: spec, value },
            pretty,
        );
        let params = EvalParams {
            code,
            ns: None,
            path: Some(format!("(replink hook {name})")),
            line: None,
        };
        let submission = renderer.render(connection.dialect, &RenderRequest::Eval(params), pretty);
        let response = connection.round_trip(submission).await?;
        match response.outcome {
            Outcome::Ok(result) => Ok(HookOutcome::Applied(result)),
            Outcome::Exception(_) => {
                warn!(hook = %name, raw = %response.raw, "hook failed");
                Err(HookError::Failed {
                    name,
                    tag: connection.tag.clone(),
                    raw: response.raw,
                }
                .into())
            }
        }
    }
}
