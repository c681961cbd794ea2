//! # Code Renderer
//!
//! Pure translation from a [`RenderRequest`] to dialect-correct code text.
//! Dispatch is a closed match over the request kind; every kind branches
//! again by the target [`Dialect`]. Templates are assembled as [`Sexp`]
//! trees and stringified at the end, so injection safety falls out of the
//! serializer's escaping rather than ad-hoc string concatenation.
//!
//! The renderer performs no I/O and never fails; malformed parameters are
//! a caller contract violation, not a recoverable error.

use std::sync::Arc;

use crate::config::{Dialect, HookSpec, RefreshMode};
use crate::manifest::{ManifestCache, load_path};
use crate::reader;
use crate::sexp::Sexp;

/// Namespace used when the editor context does not provide one.
pub const DEFAULT_NS: &str = "user";

/// Support libraries required by every injection, ahead of manifest loads.
const ALWAYS_REQUIRED: [&str; 3] = ["clojure.repl", "clojure.test", "clojure.string"];

/// Parameters for an eval submission.
#[derive(Debug, Clone, Default)]
pub struct EvalParams {
    pub code: String,
    pub ns: Option<String>,
    /// Display path for diagnostics: the full path is bound as the file,
    /// its basename as the short source path.
    pub path: Option<String>,
    pub line: Option<usize>,
}

/// Parameters for a refresh submission.
#[derive(Debug, Clone)]
pub struct RefreshParams {
    pub mode: RefreshMode,
    /// Explicit reload root directories; empty leaves the runtime default.
    pub dirs: Vec<String>,
    /// Invoked before the reload, spliced as a serialized hook form.
    pub before: Option<HookSpec>,
    /// Passed as the reload's `:after` callback unless the mode is clear.
    pub after: Option<HookSpec>,
}

/// The closed set of renderable submissions.
#[derive(Debug, Clone)]
pub enum RenderRequest {
    Eval(EvalParams),
    Hook { hook: HookSpec, value: Sexp },
    HookAsString { hook: HookSpec, value: Sexp },
    LoadedDeps,
    InjectDeps { loaded: Vec<String> },
    LoadFile { path: String },
    Completions {
        prefix: String,
        ns: Option<String>,
        context: Option<String>,
    },
    Doc { name: String },
    Source { name: String },
    Definition { name: String },
    RunTests { namespaces: Vec<String> },
    RunAllTests { pattern: Option<String> },
    Refresh(RefreshParams),
}

/// Renders requests against the shared dependency manifest.
#[derive(Debug, Clone)]
pub struct Renderer {
    manifest: Arc<ManifestCache>,
}

impl Renderer {
    pub fn new(manifest: Arc<ManifestCache>) -> Self {
        Self { manifest }
    }

    pub fn render(&self, dialect: Dialect, request: &RenderRequest, pretty: bool) -> String {
        match request {
            RenderRequest::Eval(params) => match dialect {
                Dialect::Clj => eval_clj(params).to_code(pretty),
                Dialect::Cljs => eval_cljs(params, pretty),
            },
            RenderRequest::Hook { hook, value } => hook_form(hook, value).to_code(pretty),
            RenderRequest::HookAsString { hook, value } => hook_as_string(hook, value),
            RenderRequest::LoadedDeps => self.loaded_deps(dialect).to_code(pretty),
            RenderRequest::InjectDeps { loaded } => self.inject_deps(dialect, loaded, pretty),
            RenderRequest::LoadFile { path } => {
                Sexp::call("load-file", vec![Sexp::string(path.clone())]).to_code(pretty)
            }
            RenderRequest::Completions {
                prefix,
                ns,
                context,
            } => completions(dialect, prefix, ns.as_deref(), context.as_deref()).to_code(pretty),
            RenderRequest::Doc { name } => lookup_text(dialect, "doc", name).to_code(pretty),
            RenderRequest::Source { name } => lookup_text(dialect, "source", name).to_code(pretty),
            RenderRequest::Definition { name } => definition(dialect, name).to_code(pretty),
            RenderRequest::RunTests { namespaces } => run_tests(dialect, namespaces).to_code(pretty),
            RenderRequest::RunAllTests { pattern } => {
                run_all_tests(dialect, pattern.as_deref()).to_code(pretty)
            }
            RenderRequest::Refresh(params) => match dialect {
                Dialect::Clj => refresh_clj(params, pretty),
                // The cljs runtime has no reloading facility; the action
                // is a no-op there.
                Dialect::Cljs => String::new(),
            },
        }
    }

    /// Code that, evaluated in the runtime, answers with the manifest
    /// subset already present as live namespaces. The runtime itself is
    /// the source of truth for what has been injected.
    fn loaded_deps(&self, dialect: Dialect) -> Sexp {
        let entries = self.manifest.get().entries(dialect);
        if entries.is_empty() {
            return Sexp::Vector(Vec::new());
        }
        let names = entries
            .iter()
            .map(|entry| Sexp::string(entry.clone()))
            .collect();
        Sexp::call(
            "let",
            vec![
                Sexp::Vector(vec![
                    Sexp::sym("loaded"),
                    Sexp::call(
                        "set",
                        vec![Sexp::call(
                            "map",
                            vec![
                                Sexp::call("comp", vec![Sexp::sym("str"), Sexp::sym("ns-name")]),
                                Sexp::call("all-ns", vec![]),
                            ],
                        )],
                    ),
                ]),
                Sexp::call("filterv", vec![Sexp::sym("loaded"), Sexp::Vector(names)]),
            ],
        )
    }

    /// Minimal ordered load sequence for manifest entries not yet live,
    /// with the fixed support-library preamble. Empty when nothing is
    /// missing, so repeated injection renders nothing.
    fn inject_deps(&self, dialect: Dialect, loaded: &[String], pretty: bool) -> String {
        let missing: Vec<&String> = self
            .manifest
            .get()
            .entries(dialect)
            .iter()
            .filter(|entry| !loaded.contains(entry))
            .collect();
        if missing.is_empty() {
            return String::new();
        }
        let preamble = Sexp::call(
            "require",
            ALWAYS_REQUIRED
                .iter()
                .map(|ns| Sexp::quoted(Sexp::sym(*ns)))
                .collect(),
        );
        let loads = Sexp::call(
            "load",
            missing
                .iter()
                .map(|ns| Sexp::string(load_path(ns.as_str())))
                .collect(),
        );
        Sexp::call("do", vec![preamble, loads]).to_code(pretty)
    }
}

/// Derived test targets for an empty target set: the namespace itself and
/// its `-test` pair, suffix added or stripped.
pub fn default_test_targets(current_ns: &str) -> Vec<String> {
    let pair = match current_ns.strip_suffix("-test") {
        Some(base) => base.to_string(),
        None => format!("{current_ns}-test"),
    };
    vec![current_ns.to_string(), pair]
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn hook_form(hook: &HookSpec, value: &Sexp) -> Sexp {
    Sexp::List(vec![
        Sexp::sym(hook.symbol()),
        Sexp::quoted(value.clone()),
    ])
}

/// The hook invocation as a literal two-line text block, for embedding as
/// serialized text inside another code fragment.
fn hook_as_string(hook: &HookSpec, value: &Sexp) -> String {
    format!("({}\n  (quote {}))", hook.symbol(), value.to_code(false))
}

fn eval_clj(params: &EvalParams) -> Sexp {
    let ns = params.ns.as_deref().unwrap_or(DEFAULT_NS);
    let read_opts = Sexp::Map(vec![
        (Sexp::keyword("read-cond"), Sexp::keyword("allow")),
        (Sexp::keyword("eof"), Sexp::sym("eof")),
    ]);
    // Each evaluated value is forced before the next read so lazy errors
    // surface at eval time, inside the try.
    let forced = Sexp::call(
        "let",
        vec![
            Sexp::Vector(vec![
                Sexp::sym("value"),
                Sexp::call("eval", vec![Sexp::sym("form")]),
            ]),
            Sexp::call(
                "if",
                vec![
                    Sexp::call("seq?", vec![Sexp::sym("value")]),
                    Sexp::call("doall", vec![Sexp::sym("value")]),
                    Sexp::sym("value"),
                ],
            ),
        ],
    );
    let read_loop = Sexp::call(
        "loop",
        vec![
            Sexp::Vector(vec![Sexp::sym("last-value"), Sexp::Nil]),
            Sexp::call(
                "let",
                vec![
                    Sexp::Vector(vec![
                        Sexp::sym("form"),
                        Sexp::call("read", vec![read_opts, Sexp::sym("reader")]),
                    ]),
                    Sexp::call(
                        "if",
                        vec![
                            Sexp::call(
                                "identical?",
                                vec![Sexp::sym("form"), Sexp::sym("eof")],
                            ),
                            Sexp::Vector(vec![Sexp::keyword("ok"), Sexp::sym("last-value")]),
                            Sexp::call("recur", vec![forced]),
                        ],
                    ),
                ],
            ),
        ],
    );
    let body = match params.path.as_deref() {
        Some(path) => Sexp::call(
            "binding",
            vec![
                Sexp::Vector(vec![
                    Sexp::sym("*file*"),
                    Sexp::string(path),
                    Sexp::sym("*source-path*"),
                    Sexp::string(basename(path)),
                ]),
                read_loop,
            ],
        ),
        None => read_loop,
    };
    let reader_init = Sexp::call(
        "clojure.lang.LineNumberingPushbackReader.",
        vec![Sexp::call(
            "java.io.StringReader.",
            vec![Sexp::Str(format!("{}\n", params.code))],
        )],
    );
    Sexp::call(
        "try",
        vec![
            Sexp::call("ns", vec![Sexp::sym(ns)]),
            Sexp::call(
                "let",
                vec![
                    Sexp::Vector(vec![
                        Sexp::sym("reader"),
                        reader_init,
                        Sexp::sym("eof"),
                        Sexp::call("Object.", vec![]),
                    ]),
                    Sexp::call(
                        ".setLineNumber",
                        vec![
                            Sexp::sym("reader"),
                            Sexp::Int(params.line.unwrap_or(1) as i64),
                        ],
                    ),
                    body,
                ],
            ),
            Sexp::call(
                "catch",
                vec![
                    Sexp::sym("Throwable"),
                    Sexp::sym("error"),
                    Sexp::Vector(vec![
                        Sexp::keyword("exception"),
                        Sexp::call("Throwable->map", vec![Sexp::sym("error")]),
                    ]),
                ],
            ),
        ],
    )
}

/// The cljs transport accepts one top-level form per submission, so a body
/// with zero or more than one form must arrive wrapped in exactly one
/// compound form. The submission itself carries two forms, the namespace
/// switch and the guarded body, each answered separately by the runtime.
fn eval_cljs(params: &EvalParams, pretty: bool) -> String {
    let ns = params.ns.as_deref().unwrap_or(DEFAULT_NS);
    let trimmed = params.code.trim();
    let body = if trimmed.is_empty() {
        Sexp::call("do", Vec::new())
    } else {
        match reader::top_level_form_count(trimmed) {
            Some(1) => Sexp::raw(trimmed),
            _ => Sexp::call("do", vec![Sexp::raw(trimmed)]),
        }
    };
    let switch = Sexp::call("in-ns", vec![Sexp::quoted(Sexp::sym(ns))]);
    let guarded = Sexp::call(
        "try",
        vec![
            Sexp::Vector(vec![Sexp::keyword("ok"), body]),
            Sexp::call(
                "catch",
                vec![
                    Sexp::keyword("default"),
                    Sexp::sym("error"),
                    Sexp::Vector(vec![Sexp::keyword("exception"), Sexp::sym("error")]),
                ],
            ),
        ],
    );
    format!("{}\n{}", switch.to_code(pretty), guarded.to_code(pretty))
}

fn completions(
    dialect: Dialect,
    prefix: &str,
    ns: Option<&str>,
    context: Option<&str>,
) -> Sexp {
    match dialect {
        Dialect::Clj => {
            let ns_value = match ns {
                Some(ns) => Sexp::call("find-ns", vec![Sexp::quoted(Sexp::sym(ns))]),
                None => Sexp::sym("*ns*"),
            };
            let mut options = vec![(Sexp::keyword("ns"), ns_value)];
            if let Some(context) = context {
                options.push((Sexp::keyword("context"), Sexp::string(context)));
            }
            Sexp::call(
                "replink.internal.compliment.core/completions",
                vec![Sexp::string(prefix), Sexp::Map(options)],
            )
        }
        // No completion facility in the cljs runtime.
        Dialect::Cljs => Sexp::List(Vec::new()),
    }
}

fn lookup_text(dialect: Dialect, operation: &str, name: &str) -> Sexp {
    let facility = match dialect {
        Dialect::Clj => "clojure.repl",
        Dialect::Cljs => "cljs.repl",
    };
    Sexp::call(
        "with-out-str",
        vec![Sexp::call(
            &format!("{facility}/{operation}"),
            vec![Sexp::sym(name)],
        )],
    )
}

/// Resolve-else-namespace-fallback lookup yielding a raw
/// `[file line column]` triple or nil. Path and column normalization is
/// the caller's concern, on the returned data.
fn definition(dialect: Dialect, name: &str) -> Sexp {
    if dialect == Dialect::Cljs {
        return Sexp::Nil;
    }
    let meta_triple = Sexp::Vector(vec![
        Sexp::call(
            "str",
            vec![Sexp::List(vec![Sexp::keyword("file"), Sexp::sym("m")])],
        ),
        Sexp::List(vec![Sexp::keyword("line"), Sexp::sym("m"), Sexp::Int(1)]),
        Sexp::List(vec![Sexp::keyword("column"), Sexp::sym("m"), Sexp::Int(1)]),
    ]);
    let ns_fallback = Sexp::call(
        "when-let",
        vec![
            Sexp::Vector(vec![
                Sexp::sym("target"),
                Sexp::call("find-ns", vec![Sexp::sym("s")]),
            ]),
            Sexp::call(
                "when-let",
                vec![
                    Sexp::Vector(vec![
                        Sexp::sym("interned"),
                        Sexp::call(
                            "first",
                            vec![Sexp::call(
                                "sort-by",
                                vec![
                                    Sexp::sym("str"),
                                    Sexp::call(
                                        "vals",
                                        vec![Sexp::call("ns-interns", vec![Sexp::sym("target")])],
                                    ),
                                ],
                            )],
                        ),
                    ]),
                    Sexp::Vector(vec![
                        Sexp::call(
                            "str",
                            vec![Sexp::List(vec![
                                Sexp::keyword("file"),
                                Sexp::call("meta", vec![Sexp::sym("interned")]),
                            ])],
                        ),
                        Sexp::Int(1),
                        Sexp::Int(1),
                    ]),
                ],
            ),
        ],
    );
    Sexp::call(
        "let",
        vec![
            Sexp::Vector(vec![
                Sexp::sym("s"),
                Sexp::call("symbol", vec![Sexp::string(name)]),
                Sexp::sym("v"),
                Sexp::call("resolve", vec![Sexp::sym("s")]),
                Sexp::sym("m"),
                Sexp::call(
                    "when",
                    vec![Sexp::sym("v"), Sexp::call("meta", vec![Sexp::sym("v")])],
                ),
            ]),
            Sexp::call("if", vec![Sexp::sym("m"), meta_triple, ns_fallback]),
        ],
    )
}

fn run_tests(dialect: Dialect, namespaces: &[String]) -> Sexp {
    let runner = match dialect {
        Dialect::Clj => "clojure.test/run-tests",
        Dialect::Cljs => "cljs.test/run-tests",
    };
    let targets = namespaces
        .iter()
        .map(|ns| Sexp::quoted(Sexp::sym(ns)))
        .collect();
    Sexp::call("with-out-str", vec![Sexp::call(runner, targets)])
}

fn run_all_tests(dialect: Dialect, pattern: Option<&str>) -> Sexp {
    let runner = match dialect {
        Dialect::Clj => "clojure.test/run-all-tests",
        Dialect::Cljs => "cljs.test/run-all-tests",
    };
    let args = match pattern {
        Some(pattern) => vec![Sexp::raw(format!("#\"{pattern}\""))],
        None => Vec::new(),
    };
    Sexp::call("with-out-str", vec![Sexp::call(runner, args)])
}

fn refresh_clj(params: &RefreshParams, pretty: bool) -> String {
    let mut body = vec![Sexp::call(
        "require",
        vec![Sexp::quoted(Sexp::sym("clojure.tools.namespace.repl"))],
    )];
    if let Some(before) = &params.before {
        if let Some(ns) = before.namespace() {
            body.push(Sexp::call("require", vec![Sexp::quoted(Sexp::sym(ns))]));
        }
        body.push(Sexp::raw(hook_as_string(before, &Sexp::Nil)));
    }
    if !params.dirs.is_empty() {
        body.push(Sexp::call(
            "clojure.tools.namespace.repl/set-refresh-dirs",
            params.dirs.iter().map(|dir| Sexp::string(dir.as_str())).collect(),
        ));
    }
    body.push(match params.mode {
        RefreshMode::Clear => Sexp::call("clojure.tools.namespace.repl/clear", vec![]),
        RefreshMode::Changed => reload_operation("clojure.tools.namespace.repl/refresh", &params.after),
        RefreshMode::All => {
            reload_operation("clojure.tools.namespace.repl/refresh-all", &params.after)
        }
    });
    Sexp::call("do", body).to_code(pretty)
}

fn reload_operation(operation: &str, after: &Option<HookSpec>) -> Sexp {
    let mut args = Vec::new();
    if let Some(after) = after {
        args.push(Sexp::keyword("after"));
        args.push(Sexp::quoted(Sexp::sym(after.symbol())));
    }
    Sexp::call(operation, args)
}
