//! # Evaluation Orchestrator
//!
//! One operation per logical action. Every public operation spawns its own
//! task and returns immediately; results flow to the [`UiSink`] rather
//! than back to the caller, so one slow or blocked runtime never stalls
//! the submission of another action. Within a single action, matching
//! connections are visited sequentially in tag order; concurrency exists
//! across actions, not inside one action's fan-out.
//!
//! Receives block indefinitely; an action whose runtime never answers
//! hangs its own task permanently. That is accepted at this layer, and a
//! caller-level timeout is the candidate extension for it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ClientConfig, Dialect, HookName, RefreshMode};
use crate::connection::{Connection, EvalResponse, Outcome};
use crate::error::CoreResult;
use crate::hooks::HookPipeline;
use crate::inject::DepsInjector;
use crate::manifest::ManifestCache;
use crate::registry::{ActionCtx, ConnectionRegistry};
use crate::render::{self, EvalParams, RefreshParams, RenderRequest, Renderer};
use crate::sexp::Sexp;
use crate::ui::{SourceLocation, UiSink};

/// Tag used for failures that belong to no single connection.
const CLIENT_TAG: &str = "replink";

/// File path sentinel some runtimes report for sourceless definitions.
const NO_SOURCE_SENTINEL: &str = "NO_SOURCE_PATH";

/// Fans logical actions out over the current connection set.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<dyn ConnectionRegistry>,
    ui: Arc<dyn UiSink>,
    renderer: Arc<Renderer>,
    hooks: Arc<HookPipeline>,
    injector: Arc<DepsInjector>,
    pretty: bool,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        ui: Arc<dyn UiSink>,
        manifest: Arc<ManifestCache>,
        config: &ClientConfig,
    ) -> Self {
        let renderer = Arc::new(Renderer::new(manifest.clone()));
        Self {
            registry,
            ui,
            renderer: renderer.clone(),
            hooks: Arc::new(HookPipeline::new(config.hooks.clone())),
            injector: Arc::new(DepsInjector::new(manifest, renderer)),
            pretty: config.pretty,
        }
    }

    /// Evaluates a code fragment on every matching connection, applying
    /// the eval hook first and the result hook after a success.
    pub fn evaluate(&self, ctx: ActionCtx, code: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.evaluate_task(ctx, code).await })
    }

    /// Loads a whole file by path on every matching connection.
    pub fn load_file(&self, ctx: ActionCtx, path: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.load_file_task(ctx, path).await })
    }

    /// Looks up documentation; `passive` marks the opportunistic quick-doc
    /// variant for which silence is acceptable.
    pub fn doc(&self, ctx: ActionCtx, name: String, passive: bool) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.doc_task(ctx, name, passive).await })
    }

    /// Looks up the source text of a definition.
    pub fn source(&self, ctx: ActionCtx, name: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.source_task(ctx, name).await })
    }

    /// Resolves a name to a jump target.
    pub fn definition(&self, ctx: ActionCtx, name: String) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.definition_task(ctx, name).await })
    }

    /// Completion candidates for a prefix; always passive.
    pub fn completions(
        &self,
        ctx: ActionCtx,
        prefix: String,
        context: Option<String>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.completions_task(ctx, prefix, context).await })
    }

    /// Runs the tests of the given namespaces; an empty set defaults to
    /// the context namespace and its derived test pair on clj.
    pub fn run_tests(&self, ctx: ActionCtx, namespaces: Vec<String>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run_tests_task(ctx, namespaces).await })
    }

    /// Runs every test namespace matching an optional pattern.
    pub fn run_all_tests(&self, ctx: ActionCtx, pattern: Option<String>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run_all_tests_task(ctx, pattern).await })
    }

    /// Reloads changed namespaces (clj only; a no-op elsewhere).
    pub fn refresh(&self, ctx: ActionCtx, mode: RefreshMode) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.refresh_task(ctx, mode).await })
    }

    /// Runs the connect hook and dependency injection over freshly
    /// connected endpoints.
    pub fn bring_up(&self, connections: Vec<Arc<Connection>>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.bring_up_task(connections).await })
    }

    async fn resolve(&self, ctx: &ActionCtx, passive: bool) -> Vec<Arc<Connection>> {
        let connections = self.registry.current_connections(ctx, passive).await;
        if connections.is_empty() && !passive {
            warn!("no matching connections");
            self.ui.err(CLIENT_TAG, "no matching connections").await;
        }
        connections
    }

    async fn submit(&self, connection: &Connection, params: EvalParams) -> CoreResult<EvalResponse> {
        let submission =
            self.renderer
                .render(connection.dialect, &RenderRequest::Eval(params), self.pretty);
        Ok(connection.round_trip(submission).await?)
    }

    #[tracing::instrument(skip(self, code), fields(action = "evaluate", id = %Uuid::new_v4()))]
    async fn evaluate_task(self, ctx: ActionCtx, code: String) {
        for connection in self.resolve(&ctx, false).await {
            if let Err(action_error) = self.eval_on(&connection, &ctx, &code).await {
                warn!(tag = %connection.tag, %action_error, "evaluate failed");
                self.ui.err(&connection.tag, &action_error.to_string()).await;
            }
        }
    }

    async fn eval_on(&self, connection: &Connection, ctx: &ActionCtx, code: &str) -> CoreResult<()> {
        let hooked = self
            .hooks
            .invoke(
                connection,
                &self.renderer,
                HookName::Eval,
                Sexp::Str(code.to_string()),
                self.pretty,
            )
            .await?;
        // The hook's return value is reparsed as code, never concatenated
        // as text: a returned string is the new code body, anything else
        // is serialized from its form.
        let code_text = match hooked.into_value() {
            Sexp::Str(text) => text,
            other => other.to_code(false),
        };
        let params = EvalParams {
            code: code_text.clone(),
            ns: ctx.ns.clone(),
            path: ctx.path.clone(),
            line: ctx.line,
        };
        let response = self.submit(connection, params).await?;
        match response.outcome {
            Outcome::Exception(value) => {
                warn!(tag = %connection.tag, raw = %response.raw, "evaluation raised");
                self.ui.err(&connection.tag, &value.to_code(false)).await;
            }
            Outcome::Ok(value) => {
                self.ui.out(&connection.tag, &value.to_code(false)).await;
                self.send_result_hook(connection, &code_text, value).await;
            }
        }
        Ok(())
    }

    /// Fire-and-forget style second submission embedding the evaluated
    /// code and its value. The response is awaited for protocol
    /// correctness, its own value discarded; a failure here is logged,
    /// not surfaced.
    async fn send_result_hook(&self, connection: &Connection, code: &str, value: Sexp) {
        if self.hooks.spec(connection, HookName::Result).is_none() {
            return;
        }
        let payload = Sexp::Map(vec![
            (Sexp::keyword("code"), Sexp::string(code)),
            (Sexp::keyword("value"), value),
        ]);
        if let Err(hook_error) = self
            .hooks
            .invoke(
                connection,
                &self.renderer,
                HookName::Result,
                payload,
                self.pretty,
            )
            .await
        {
            warn!(tag = %connection.tag, %hook_error, "result hook response discarded");
        }
    }

    #[tracing::instrument(skip(self), fields(action = "load-file", id = %Uuid::new_v4()))]
    async fn load_file_task(self, ctx: ActionCtx, path: String) {
        for connection in self.resolve(&ctx, false).await {
            let request = RenderRequest::LoadFile { path: path.clone() };
            self.commanded(&connection, &ctx, request, &path).await;
        }
    }

    #[tracing::instrument(skip(self), fields(action = "doc", id = %Uuid::new_v4()))]
    async fn doc_task(self, ctx: ActionCtx, name: String, passive: bool) {
        for connection in self.resolve(&ctx, passive).await {
            let request = RenderRequest::Doc { name: name.clone() };
            self.best_effort(&connection, &ctx, request, "(replink doc)").await;
        }
    }

    #[tracing::instrument(skip(self), fields(action = "source", id = %Uuid::new_v4()))]
    async fn source_task(self, ctx: ActionCtx, name: String) {
        for connection in self.resolve(&ctx, false).await {
            let request = RenderRequest::Source { name: name.clone() };
            self.best_effort(&connection, &ctx, request, "(replink source)")
                .await;
        }
    }

    #[tracing::instrument(skip(self), fields(action = "definition", id = %Uuid::new_v4()))]
    async fn definition_task(self, ctx: ActionCtx, name: String) {
        for connection in self.resolve(&ctx, false).await {
            let request = RenderRequest::Definition { name: name.clone() };
            let params = EvalParams {
                code: self.renderer.render(connection.dialect, &request, self.pretty),
                ns: ctx.ns.clone(),
                path: Some("(replink definition)".to_string()),
                line: None,
            };
            match self.submit(&connection, params).await {
                Err(action_error) => {
                    warn!(tag = %connection.tag, %action_error, "definition lookup failed");
                    self.ui.err(&connection.tag, &action_error.to_string()).await;
                }
                Ok(response) => match response.outcome {
                    Outcome::Exception(value) => {
                        warn!(tag = %connection.tag, raw = %response.raw, "definition lookup raised");
                        self.ui.err(&connection.tag, &value.to_code(false)).await;
                    }
                    Outcome::Ok(value) => {
                        let resolved = location_triple(&value).and_then(|(file, line, column)| {
                            normalize_location(&file, line, column)
                        });
                        match resolved {
                            Some(location) => {
                                self.ui.location(&connection.tag, &location).await;
                            }
                            None => {
                                self.ui
                                    .err(&connection.tag, &format!("no definition for {name}"))
                                    .await;
                            }
                        }
                    }
                },
            }
        }
    }

    #[tracing::instrument(skip(self, context), fields(action = "completions", id = %Uuid::new_v4()))]
    async fn completions_task(self, ctx: ActionCtx, prefix: String, context: Option<String>) {
        for connection in self.resolve(&ctx, true).await {
            let request = RenderRequest::Completions {
                prefix: prefix.clone(),
                ns: ctx.ns.clone(),
                context: context.clone(),
            };
            let params = EvalParams {
                code: self.renderer.render(connection.dialect, &request, self.pretty),
                ns: ctx.ns.clone(),
                path: Some("(replink completions)".to_string()),
                line: None,
            };
            match self.submit(&connection, params).await {
                Ok(response) => match response.outcome {
                    Outcome::Ok(candidates) => {
                        self.ui.completions(&connection.tag, &candidates).await;
                    }
                    Outcome::Exception(_) => {
                        debug!(tag = %connection.tag, raw = %response.raw, "completion lookup raised; nothing to show");
                    }
                },
                Err(action_error) => {
                    debug!(tag = %connection.tag, %action_error, "completion lookup failed");
                }
            }
        }
    }

    #[tracing::instrument(skip(self), fields(action = "run-tests", id = %Uuid::new_v4()))]
    async fn run_tests_task(self, ctx: ActionCtx, namespaces: Vec<String>) {
        for connection in self.resolve(&ctx, false).await {
            let targets = if namespaces.is_empty() && connection.dialect == Dialect::Clj {
                ctx.ns
                    .as_deref()
                    .map(render::default_test_targets)
                    .unwrap_or_default()
            } else {
                namespaces.clone()
            };
            let request = RenderRequest::RunTests { namespaces: targets };
            self.commanded(&connection, &ctx, request, "(replink run-tests)")
                .await;
        }
    }

    #[tracing::instrument(skip(self), fields(action = "run-all-tests", id = %Uuid::new_v4()))]
    async fn run_all_tests_task(self, ctx: ActionCtx, pattern: Option<String>) {
        for connection in self.resolve(&ctx, false).await {
            let request = RenderRequest::RunAllTests {
                pattern: pattern.clone(),
            };
            self.commanded(&connection, &ctx, request, "(replink run-all-tests)")
                .await;
        }
    }

    #[tracing::instrument(skip(self), fields(action = "refresh", id = %Uuid::new_v4()))]
    async fn refresh_task(self, ctx: ActionCtx, mode: RefreshMode) {
        for connection in self.resolve(&ctx, false).await {
            let params = RefreshParams {
                mode,
                dirs: connection.dirs.clone(),
                before: self.hooks.spec(&connection, HookName::RefreshBefore).cloned(),
                after: self.hooks.spec(&connection, HookName::RefreshAfter).cloned(),
            };
            let code =
                self.renderer
                    .render(connection.dialect, &RenderRequest::Refresh(params), self.pretty);
            if code.is_empty() {
                debug!(tag = %connection.tag, "refresh is a no-op for this dialect");
                continue;
            }
            let params = EvalParams {
                code,
                ns: None,
                path: Some("(replink refresh)".to_string()),
                line: None,
            };
            match self.submit(&connection, params).await {
                Err(action_error) => {
                    warn!(tag = %connection.tag, %action_error, "refresh failed");
                    self.ui.err(&connection.tag, &action_error.to_string()).await;
                }
                Ok(response) => match response.outcome {
                    Outcome::Exception(value) => {
                        warn!(tag = %connection.tag, raw = %response.raw, "refresh raised");
                        self.ui.err(&connection.tag, &value.to_code(false)).await;
                    }
                    Outcome::Ok(value) => {
                        self.ui.out(&connection.tag, &display_text(&value)).await;
                    }
                },
            }
        }
    }

    #[tracing::instrument(skip(self, connections), fields(action = "bring-up", id = %Uuid::new_v4()))]
    async fn bring_up_task(self, connections: Vec<Arc<Connection>>) {
        for connection in connections {
            let summary = Sexp::Map(vec![
                (Sexp::keyword("tag"), Sexp::string(connection.tag.clone())),
                (Sexp::keyword("host"), Sexp::string(connection.host.clone())),
                (Sexp::keyword("port"), Sexp::Int(i64::from(connection.port))),
            ]);
            if let Err(hook_error) = self
                .hooks
                .invoke(
                    &connection,
                    &self.renderer,
                    HookName::Connect,
                    summary,
                    self.pretty,
                )
                .await
            {
                warn!(tag = %connection.tag, %hook_error, "connect hook failed; abandoning bring-up");
                self.ui.err(&connection.tag, &hook_error.to_string()).await;
                continue;
            }
            match self.injector.ensure_loaded(&connection, self.pretty).await {
                Ok(None) => debug!(tag = %connection.tag, "runtime support already loaded"),
                Ok(Some(code)) => {
                    let params = EvalParams {
                        code,
                        ns: None,
                        path: Some("(replink deps inject)".to_string()),
                        line: None,
                    };
                    match self.submit(&connection, params).await {
                        Ok(response) => {
                            if let Outcome::Exception(value) = response.outcome {
                                warn!(tag = %connection.tag, raw = %response.raw, "dependency injection raised");
                                self.ui.err(&connection.tag, &value.to_code(false)).await;
                            } else {
                                debug!(tag = %connection.tag, "runtime support injected");
                            }
                        }
                        Err(action_error) => {
                            warn!(tag = %connection.tag, %action_error, "dependency injection failed");
                            self.ui.err(&connection.tag, &action_error.to_string()).await;
                        }
                    }
                }
                Err(action_error) => {
                    warn!(tag = %connection.tag, %action_error, "dependency probe failed");
                    self.ui.err(&connection.tag, &action_error.to_string()).await;
                }
            }
        }
    }

    /// Submission for an explicitly commanded action: exceptional
    /// responses become user-visible errors.
    async fn commanded(
        &self,
        connection: &Connection,
        ctx: &ActionCtx,
        request: RenderRequest,
        synthetic_path: &str,
    ) {
        let params = EvalParams {
            code: self.renderer.render(connection.dialect, &request, self.pretty),
            ns: ctx.ns.clone(),
            path: Some(synthetic_path.to_string()),
            line: None,
        };
        match self.submit(connection, params).await {
            Err(action_error) => {
                warn!(tag = %connection.tag, %action_error, "action failed");
                self.ui.err(&connection.tag, &action_error.to_string()).await;
            }
            Ok(response) => match response.outcome {
                Outcome::Exception(value) => {
                    warn!(tag = %connection.tag, raw = %response.raw, "action raised");
                    self.ui.err(&connection.tag, &value.to_code(false)).await;
                }
                Outcome::Ok(value) => {
                    self.ui.out(&connection.tag, &display_text(&value)).await;
                }
            },
        }
    }

    /// Submission for a best-effort lookup: exceptional or empty responses
    /// mean "nothing to show" and stay off the UI.
    async fn best_effort(
        &self,
        connection: &Connection,
        ctx: &ActionCtx,
        request: RenderRequest,
        synthetic_path: &str,
    ) {
        let params = EvalParams {
            code: self.renderer.render(connection.dialect, &request, self.pretty),
            ns: ctx.ns.clone(),
            path: Some(synthetic_path.to_string()),
            line: None,
        };
        match self.submit(connection, params).await {
            Ok(response) => match response.outcome {
                Outcome::Ok(value) => {
                    let text = display_text(&value);
                    if !text.trim().is_empty() {
                        self.ui.out(&connection.tag, text.trim_end()).await;
                    }
                }
                Outcome::Exception(_) => {
                    debug!(tag = %connection.tag, raw = %response.raw, "lookup raised; nothing to show");
                }
            },
            Err(action_error) => {
                debug!(tag = %connection.tag, %action_error, "lookup failed; nothing to show");
            }
        }
    }
}

fn display_text(value: &Sexp) -> String {
    match value {
        Sexp::Str(text) => text.clone(),
        other => other.to_code(false),
    }
}

fn location_triple(value: &Sexp) -> Option<(String, i64, i64)> {
    let items = match value {
        Sexp::Vector(items) | Sexp::List(items) => items,
        _ => return None,
    };
    match items.as_slice() {
        [Sexp::Str(file), Sexp::Int(line), Sexp::Int(column)] => {
            Some((file.clone(), *line, *column))
        }
        _ => None,
    }
}

/// Normalizes a runtime-reported definition location.
///
/// Blank files and the runtime's "no source" sentinel mean no result.
/// Resource-locator paths lose their scheme prefixes, and an archive URL
/// becomes a `path::member` pair. The runtime's 1-based column arrives
/// 0-based at the UI.
pub fn normalize_location(file: &str, line: i64, column: i64) -> Option<SourceLocation> {
    let file = file.trim();
    if file.is_empty() || file == NO_SOURCE_SENTINEL {
        return None;
    }
    let stripped = ["zip:file:", "jar:file:", "file:"]
        .iter()
        .find_map(|scheme| file.strip_prefix(scheme))
        .unwrap_or(file);
    let path = stripped.replace("!/", "::");
    Some(SourceLocation {
        path,
        line: line.max(1) as u64,
        column: (column - 1).max(0) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sentinel_and_blank_files_mean_no_result() {
        assert_eq!(normalize_location("NO_SOURCE_PATH", 3, 2), None);
        assert_eq!(normalize_location("", 3, 2), None);
        assert_eq!(normalize_location("   ", 3, 2), None);
    }

    #[test]
    fn archive_urls_become_path_member_pairs() {
        let location = normalize_location("zip:file:/repo.jar!/ns/core.clj", 10, 5).unwrap();
        assert_eq!(location.path, "/repo.jar::ns/core.clj");
        assert_eq!(location.line, 10);
        assert_eq!(location.column, 4);
    }

    #[test]
    fn jar_and_file_schemes_are_stripped() {
        let location = normalize_location("jar:file:/lib.jar!/clojure/core.clj", 1, 1).unwrap();
        assert_eq!(location.path, "/lib.jar::clojure/core.clj");

        let location = normalize_location("file:/src/app/core.clj", 7, 1).unwrap();
        assert_eq!(location.path, "/src/app/core.clj");
        assert_eq!(location.column, 0);
    }

    #[test]
    fn plain_paths_pass_through_with_column_shift() {
        let location = normalize_location("/src/app/core.clj", 42, 5).unwrap();
        assert_eq!(location.path, "/src/app/core.clj");
        assert_eq!(location.line, 42);
        assert_eq!(location.column, 4);
    }

    #[test]
    fn missing_line_defaults_stay_in_bounds() {
        let location = normalize_location("/src/app/core.clj", 0, 0).unwrap();
        assert_eq!(location.line, 1);
        assert_eq!(location.column, 0);
    }

    #[test]
    fn location_triples_require_the_exact_shape() {
        let value = Sexp::Vector(vec![
            Sexp::string("/src/core.clj"),
            Sexp::Int(3),
            Sexp::Int(1),
        ]);
        assert_eq!(
            location_triple(&value),
            Some(("/src/core.clj".to_string(), 3, 1))
        );
        assert_eq!(location_triple(&Sexp::Nil), None);
        assert_eq!(
            location_triple(&Sexp::Vector(vec![Sexp::string("f"), Sexp::Int(1)])),
            None
        );
    }

    #[test]
    fn display_text_unwraps_strings_only() {
        assert_eq!(display_text(&Sexp::string("report")), "report");
        assert_eq!(display_text(&Sexp::Int(3)), "3");
    }
}
