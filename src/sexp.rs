//! # S-expression Value Model
//!
//! Rendered submissions are assembled as [`Sexp`] trees and serialized to
//! code text only at the transport boundary. Keeping the tree form around
//! lets templates stay inspectable as plain data in tests instead of being
//! compared as opaque strings.
//!
//! ## Serialization
//!
//! [`Sexp::to_code`] takes an explicit `pretty` flag. Compact output is a
//! single line; pretty output breaks wide collections across lines with a
//! two-space indent. The flag is threaded through every render call rather
//! than held in ambient state.

use std::fmt;

/// Width above which pretty output breaks a collection across lines.
const PRETTY_WIDTH: usize = 72;

/// Generic code-as-data tree for the rendered dialects.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexp {
    /// Bare symbol, possibly namespace-qualified (`user/start`).
    Sym(String),
    /// Keyword without its leading colon: `Keyword("ok")` prints `:ok`.
    Keyword(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    List(Vec<Sexp>),
    Vector(Vec<Sexp>),
    /// Entry order is preserved; printed as a map literal.
    Map(Vec<(Sexp, Sexp)>),
    Set(Vec<Sexp>),
    /// Tagged literal such as `#inst "..."` or `#error {...}`.
    Tagged(String, Box<Sexp>),
    /// Verbatim code text spliced into the output unchanged.
    Raw(String),
}

impl Sexp {
    pub fn sym(name: impl Into<String>) -> Self {
        Sexp::Sym(name.into())
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Sexp::Keyword(name.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Sexp::Str(value.into())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Sexp::Raw(text.into())
    }

    /// A list form with a symbol in call position.
    pub fn call(head: &str, args: Vec<Sexp>) -> Self {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(Sexp::sym(head));
        items.extend(args);
        Sexp::List(items)
    }

    /// Wraps a value in `(quote ...)`.
    pub fn quoted(value: Sexp) -> Self {
        Sexp::call("quote", vec![value])
    }

    /// Serializes the tree to code text.
    pub fn to_code(&self, pretty: bool) -> String {
        let mut out = String::new();
        self.write(&mut out, 0, pretty);
        out
    }

    fn compact(&self) -> String {
        self.to_code(false)
    }

    fn write(&self, out: &mut String, indent: usize, pretty: bool) {
        match self {
            Sexp::Sym(name) => out.push_str(name),
            Sexp::Keyword(name) => {
                out.push(':');
                out.push_str(name);
            }
            Sexp::Str(value) => {
                out.push('"');
                out.push_str(&escape_str(value));
                out.push('"');
            }
            Sexp::Int(n) => out.push_str(&n.to_string()),
            Sexp::Float(f) => out.push_str(&format!("{:?}", f)),
            Sexp::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Sexp::Nil => out.push_str("nil"),
            Sexp::List(items) => Self::write_seq(out, items, "(", ")", indent, pretty),
            Sexp::Vector(items) => Self::write_seq(out, items, "[", "]", indent, pretty),
            Sexp::Set(items) => Self::write_seq(out, items, "#{", "}", indent, pretty),
            Sexp::Map(pairs) => Self::write_map(out, pairs, indent, pretty),
            Sexp::Tagged(tag, value) => {
                out.push('#');
                out.push_str(tag);
                out.push(' ');
                value.write(out, indent, pretty);
            }
            Sexp::Raw(text) => out.push_str(text),
        }
    }

    fn write_seq(
        out: &mut String,
        items: &[Sexp],
        open: &str,
        close: &str,
        indent: usize,
        pretty: bool,
    ) {
        out.push_str(open);
        let compact_width: usize = items.iter().map(|item| item.compact().len() + 1).sum();
        let broken = pretty && items.len() > 1 && compact_width > PRETTY_WIDTH;
        for (position, item) in items.iter().enumerate() {
            if position > 0 {
                if broken {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent + 2));
                } else {
                    out.push(' ');
                }
            }
            item.write(out, indent + 2, pretty);
        }
        out.push_str(close);
    }

    fn write_map(out: &mut String, pairs: &[(Sexp, Sexp)], indent: usize, pretty: bool) {
        out.push('{');
        let compact_width: usize = pairs
            .iter()
            .map(|(k, v)| k.compact().len() + v.compact().len() + 3)
            .sum();
        let broken = pretty && pairs.len() > 1 && compact_width > PRETTY_WIDTH;
        for (position, (key, value)) in pairs.iter().enumerate() {
            if position > 0 {
                if broken {
                    out.push('\n');
                    out.push_str(&" ".repeat(indent + 2));
                } else {
                    out.push_str(", ");
                }
            }
            key.write(out, indent + 2, pretty);
            out.push(' ');
            value.write(out, indent + 2, pretty);
        }
        out.push('}');
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_code(false))
    }
}

fn escape_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}
