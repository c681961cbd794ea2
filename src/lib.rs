//! # replink: Interactive Evaluation Core
//!
//! replink lets an interactive client submit source fragments to one or
//! more live language-evaluation runtimes and receive structured results,
//! with per-runtime interception points that transform code before
//! submission and results after evaluation.
//!
//! ## Architecture
//!
//! Data flows strictly downward through three layers:
//!
//! ```text
//! Orchestrator → Hook Pipeline → Renderer → (code text) → transport
//!             ← tagged response ← transport
//! ```
//!
//! ### Rendering
//! Submissions are built as data first and stringified at the boundary:
//! - S-expression value model ([`sexp`])
//! - Reader for responses, hook values, and form counting ([`reader`])
//! - Dialect-aware code renderer ([`render`])
//! - Runtime-support manifest and injection ([`manifest`], [`inject`])
//!
//! ### Orchestration
//! One independently scheduled task per logical action, sequential
//! fan-out over connections within an action:
//! - Evaluation orchestrator ([`orchestrator`])
//! - Connection and round-trip discipline ([`connection`])
//! - Hook pipeline ([`hooks`])
//!
//! ### Collaborator seams
//! The editor UI, the physical transport, and configuration discovery
//! live outside this crate:
//! - Connection registry ([`registry`])
//! - UI sink ([`ui`])
//! - Configuration surface ([`config`])
//!
//! ## Dialects
//!
//! Two evaluation-target dialects are supported. `clj` accepts multi-form
//! submissions with conditional reader branches and supports namespace
//! reflection; `cljs` accepts exactly one top-level form per submission,
//! answers every submission twice, and lacks reflection-based lookup
//! facilities, so several renderings degrade to empty forms there.

pub mod config;
pub mod connection;
pub mod error;
pub mod hooks;
pub mod inject;
pub mod manifest;
pub mod orchestrator;
pub mod reader;
pub mod registry;
pub mod render;
pub mod sexp;
pub mod ui;

// Re-exports
pub use config::*;
pub use connection::*;
pub use error::*;
pub use orchestrator::*;
pub use registry::*;
pub use sexp::*;
pub use ui::*;
