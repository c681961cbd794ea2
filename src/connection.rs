//! # Connection
//!
//! A configured, addressable evaluation runtime endpoint. The transport
//! collaborator opens the socket and hands over a pair of text channels;
//! this module owns the strict send/receive discipline on top of them.
//!
//! Every round trip is synchronous within its task: the send blocks only
//! on channel capacity, the receive blocks indefinitely until the runtime
//! answers. The cljs dialect answers every submission twice, a namespace
//! switch acknowledgment followed by the result, so its round trip
//! performs two sequential receives and discards the first. There is no
//! timeout and no cancellation at this layer; a runtime that never answers
//! hangs its task permanently, which callers accept and a caller-level
//! timeout could later address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::config::{ConnectionConfig, Dialect, HookName, HookSpec};
use crate::reader;
use crate::sexp::Sexp;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("channel closed for connection {tag}")]
    ChannelClosed { tag: String },
    #[error("malformed response from {tag}: {raw}")]
    MalformedResponse { tag: String, raw: String },
}

pub type ConnResult<T> = Result<T, ConnError>;

/// The transport-provided channel pair for one connection.
#[derive(Debug)]
pub struct ChannelPair {
    outbound: mpsc::Sender<String>,
    inbound: Mutex<mpsc::Receiver<String>>,
}

impl ChannelPair {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(inbound),
        }
    }
}

/// One tagged response per expected round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok(Sexp),
    Exception(Sexp),
}

/// A parsed wire response plus the raw display text it arrived as.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalResponse {
    pub outcome: Outcome,
    pub raw: String,
}

impl EvalResponse {
    /// Parses the two-element tagged wire shape, `[:ok <value>]` or
    /// `[:exception <value>]`. Any other shape is a protocol violation.
    pub fn parse(raw: String, tag: &str) -> ConnResult<Self> {
        let parsed = reader::read_one(&raw).ok().and_then(|form| {
            let items = match form {
                Sexp::Vector(items) | Sexp::List(items) => items,
                _ => return None,
            };
            if items.len() != 2 {
                return None;
            }
            let mut items = items.into_iter();
            let marker = items.next()?;
            let value = items.next()?;
            match marker {
                Sexp::Keyword(k) if k == "ok" => Some(Outcome::Ok(value)),
                Sexp::Keyword(k) if k == "exception" => Some(Outcome::Exception(value)),
                _ => None,
            }
        });
        match parsed {
            Some(outcome) => Ok(Self { outcome, raw }),
            None => Err(ConnError::MalformedResponse {
                tag: tag.to_string(),
                raw,
            }),
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.outcome, Outcome::Exception(_))
    }
}

/// A live runtime endpoint with its dialect and channel pair.
///
/// Connections live for the process session. Nothing here is mutated by
/// evaluation actions; only the enabled flag changes, through the explicit
/// toggle command.
#[derive(Debug)]
pub struct Connection {
    pub tag: String,
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub extensions: Vec<String>,
    pub hooks: HashMap<HookName, HookSpec>,
    pub dirs: Vec<String>,
    enabled: AtomicBool,
    channels: ChannelPair,
}

impl Connection {
    pub fn new(config: ConnectionConfig, channels: ChannelPair) -> Self {
        Self {
            tag: config.tag,
            dialect: config.dialect,
            host: config.host,
            port: config.port,
            extensions: config.extensions,
            hooks: config.hooks,
            dirs: config.dirs,
            enabled: AtomicBool::new(config.enabled),
            channels,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether this connection claims the given buffer path, by file
    /// extension. No path or no configured extensions claims everything.
    pub fn matches_path(&self, path: Option<&str>) -> bool {
        let Some(path) = path else {
            return true;
        };
        if self.extensions.is_empty() {
            return true;
        }
        std::path::Path::new(path)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| self.extensions.iter().any(|claimed| claimed == extension))
            .unwrap_or(false)
    }

    /// Submits rendered code and blocks for its tagged response, reading
    /// the extra namespace-switch acknowledgment first on cljs.
    #[tracing::instrument(level = "debug", skip(self, code), fields(tag = %self.tag))]
    pub async fn round_trip(&self, code: String) -> ConnResult<EvalResponse> {
        self.channels
            .outbound
            .send(code)
            .await
            .map_err(|_| ConnError::ChannelClosed {
                tag: self.tag.clone(),
            })?;
        if self.dialect == Dialect::Cljs {
            let ack = self.recv_raw().await?;
            debug!(ack = %ack, "discarded namespace switch acknowledgment");
        }
        let raw = self.recv_raw().await?;
        EvalResponse::parse(raw, &self.tag)
    }

    async fn recv_raw(&self) -> ConnResult<String> {
        self.channels
            .inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| ConnError::ChannelClosed {
                tag: self.tag.clone(),
            })
    }
}
