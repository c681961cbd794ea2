//! # Dependency Manifest
//!
//! The ordered list of runtime-support namespaces that must be live inside
//! a connection before higher-level features (completion lookup, context
//! parsing) work. The manifest ships embedded in the crate at a fixed,
//! versioned location and is parsed once through [`ManifestCache`], an
//! explicit init-once/read-many cell shared by reference between the
//! renderer and the injector.

use std::sync::OnceLock;

use thiserror::Error;
use tracing::error;

use crate::config::Dialect;
use crate::reader::{self, ReadError};
use crate::sexp::Sexp;

const MANIFEST_SOURCE: &str = include_str!("../resources/manifest.edn");

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not readable: {0}")]
    Unreadable(#[from] ReadError),
    #[error("manifest has unexpected shape: {0}")]
    Shape(String),
}

/// Per-dialect ordered namespace lists; order is load order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyManifest {
    clj: Vec<String>,
    cljs: Vec<String>,
}

impl DependencyManifest {
    /// Parses the manifest resource: a map of dialect keyword to a
    /// sequence of namespace symbols.
    pub fn parse(source: &str) -> Result<Self, ManifestError> {
        let form = reader::read_one(source)?;
        let Sexp::Map(pairs) = form else {
            return Err(ManifestError::Shape("expected a top-level map".to_string()));
        };
        let mut manifest = Self::default();
        for (key, value) in pairs {
            let Sexp::Keyword(dialect) = key else {
                return Err(ManifestError::Shape("expected keyword keys".to_string()));
            };
            let entries = entry_names(&value)?;
            match dialect.as_str() {
                "clj" => manifest.clj = entries,
                "cljs" => manifest.cljs = entries,
                other => {
                    return Err(ManifestError::Shape(format!("unknown dialect: {other}")));
                }
            }
        }
        Ok(manifest)
    }

    pub fn entries(&self, dialect: Dialect) -> &[String] {
        match dialect {
            Dialect::Clj => &self.clj,
            Dialect::Cljs => &self.cljs,
        }
    }
}

fn entry_names(value: &Sexp) -> Result<Vec<String>, ManifestError> {
    let items = match value {
        Sexp::Vector(items) | Sexp::List(items) => items,
        _ => {
            return Err(ManifestError::Shape(
                "expected a sequence of namespaces".to_string(),
            ));
        }
    };
    items
        .iter()
        .map(|item| match item {
            Sexp::Sym(name) | Sexp::Str(name) => Ok(name.clone()),
            other => Err(ManifestError::Shape(format!(
                "expected a namespace name, got {other}"
            ))),
        })
        .collect()
}

/// Classpath-rooted load path for a manifest namespace.
pub fn load_path(namespace: &str) -> String {
    format!("/{}", namespace.replace('.', "/").replace('-', "_"))
}

/// Init-once, read-many holder for the embedded manifest.
///
/// Constructed empty and populated on first access; concurrent unguarded
/// reads are safe once populated. An unreadable embedded manifest logs an
/// error and degrades to an empty manifest rather than failing the caller.
#[derive(Debug, Default)]
pub struct ManifestCache {
    cell: OnceLock<DependencyManifest>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> &DependencyManifest {
        self.cell
            .get_or_init(|| match DependencyManifest::parse(MANIFEST_SOURCE) {
                Ok(manifest) => manifest,
                Err(parse_error) => {
                    error!(%parse_error, "embedded manifest failed to parse");
                    DependencyManifest::default()
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn embedded_manifest_parses_in_order() {
        let cache = ManifestCache::new();
        let manifest = cache.get();
        let clj = manifest.entries(Dialect::Clj);
        assert!(!clj.is_empty());
        assert_eq!(clj[0], "replink.internal.compliment.utils");
        assert_eq!(clj[clj.len() - 1], "replink.internal.compliment.core");
        assert!(manifest.entries(Dialect::Cljs).is_empty());
    }

    #[test]
    fn repeated_reads_share_the_parse() {
        let cache = ManifestCache::new();
        let first = cache.get() as *const DependencyManifest;
        let second = cache.get() as *const DependencyManifest;
        assert_eq!(first, second);
    }

    #[test]
    fn load_paths_follow_munging_rules() {
        assert_eq!(
            load_path("replink.internal.compliment.class-members"),
            "/replink/internal/compliment/class_members"
        );
    }

    #[test]
    fn malformed_manifest_is_a_shape_error() {
        assert!(DependencyManifest::parse("[:not-a-map]").is_err());
        assert!(DependencyManifest::parse("{:clj 1}").is_err());
        assert!(DependencyManifest::parse("{:other []}").is_err());
    }

    #[test]
    fn string_entries_are_accepted() {
        let manifest = DependencyManifest::parse(r#"{:clj ["a.b" c.d] :cljs []}"#).unwrap();
        assert_eq!(manifest.entries(Dialect::Clj), ["a.b", "c.d"]);
    }
}
