//! # Dependency Injector
//!
//! Brings a connection's runtime up to the manifest: probes which support
//! namespaces are already live, then renders the minimal ordered load
//! sequence for the rest. The runtime's own namespace set is the source of
//! truth, so no client-side per-connection bookkeeping exists and repeated
//! calls are idempotent: a second consecutive call renders nothing.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::{Connection, Outcome};
use crate::error::CoreResult;
use crate::manifest::ManifestCache;
use crate::render::{EvalParams, RenderRequest, Renderer};
use crate::sexp::Sexp;

pub struct DepsInjector {
    manifest: Arc<ManifestCache>,
    renderer: Arc<Renderer>,
}

impl DepsInjector {
    pub fn new(manifest: Arc<ManifestCache>, renderer: Arc<Renderer>) -> Self {
        Self { manifest, renderer }
    }

    /// Returns the load code a connection still needs, or `None` when the
    /// manifest is already satisfied. The caller submits the returned code.
    #[tracing::instrument(level = "debug", skip(self, connection), fields(tag = %connection.tag))]
    pub async fn ensure_loaded(
        &self,
        connection: &Connection,
        pretty: bool,
    ) -> CoreResult<Option<String>> {
        if self
            .manifest
            .get()
            .entries(connection.dialect)
            .is_empty()
        {
            debug!("no manifest entries for this dialect");
            return Ok(None);
        }
        let probe = self
            .renderer
            .render(connection.dialect, &RenderRequest::LoadedDeps, pretty);
        let params = EvalParams {
            code: probe,
            ns: None,
            path: Some("(replink deps probe)".to_string()),
            line: None,
        };
        let submission = self
            .renderer
            .render(connection.dialect, &RenderRequest::Eval(params), pretty);
        let response = connection.round_trip(submission).await?;
        let loaded = match response.outcome {
            Outcome::Ok(value) => loaded_names(&value),
            Outcome::Exception(_) => {
                warn!(raw = %response.raw, "loaded-deps probe raised; injecting everything");
                Vec::new()
            }
        };
        let code = self.renderer.render(
            connection.dialect,
            &RenderRequest::InjectDeps { loaded },
            pretty,
        );
        Ok(if code.is_empty() { None } else { Some(code) })
    }
}

fn loaded_names(value: &Sexp) -> Vec<String> {
    let items = match value {
        Sexp::Vector(items) | Sexp::List(items) => items,
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            Sexp::Str(name) | Sexp::Sym(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}
