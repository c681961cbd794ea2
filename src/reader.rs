//! # Reader
//!
//! A small reader for the surface syntax the core actually receives: tagged
//! wire responses, hook-returned values, the dependency manifest resource,
//! and user code bodies that need their top-level forms counted before a
//! single-form-only runtime will accept them.
//!
//! ## Coverage
//!
//! Collection literals, strings with escapes, character literals, line
//! comments, `#_` discard forms, quoting sugar, sets, and tagged literals
//! are read structurally. Dispatch forms with no data representation
//! (anonymous functions, regexes, var quotes, metadata) are preserved
//! verbatim as [`Sexp::Raw`] so they survive a render round trip.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, none_of, not_line_ending},
    combinator::{map, map_res, recognize, value},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded, terminated},
};
use thiserror::Error;

use crate::sexp::Sexp;

#[derive(Debug, Error, PartialEq)]
pub enum ReadError {
    #[error("syntax error near: {near}")]
    Syntax { near: String },
    #[error("expected a single form, found {count}")]
    NotOneForm { count: usize },
}

pub type ReadResult<T> = Result<T, ReadError>;

type ParseResult<'a, T> = IResult<&'a str, T>;

/// Reads every top-level form in the input.
#[tracing::instrument(level = "trace", skip(input))]
pub fn read_forms(input: &str) -> ReadResult<Vec<Sexp>> {
    match terminated(many0(form), ws0)(input) {
        Ok(("", forms)) => Ok(forms),
        Ok((rest, _)) => Err(ReadError::Syntax {
            near: snippet(rest),
        }),
        Err(_) => Err(ReadError::Syntax {
            near: snippet(input),
        }),
    }
}

/// Reads input that must contain exactly one form (wire responses).
pub fn read_one(input: &str) -> ReadResult<Sexp> {
    let mut forms = read_forms(input)?;
    if forms.len() == 1 {
        Ok(forms.swap_remove(0))
    } else {
        Err(ReadError::NotOneForm { count: forms.len() })
    }
}

/// Counts top-level forms, or `None` when the input is not readable.
pub fn top_level_form_count(input: &str) -> Option<usize> {
    read_forms(input).ok().map(|forms| forms.len())
}

fn snippet(input: &str) -> String {
    input.chars().take(32).collect()
}

fn is_ws(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn is_atom_char(c: char) -> bool {
    !is_ws(c)
        && !matches!(
            c,
            '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';' | '\'' | '`' | '~' | '@' | '^' | '\\'
        )
}

fn line_comment(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(char(';'), not_line_ending))(input)
}

fn discard_form(input: &str) -> ParseResult<'_, &str> {
    recognize(preceded(tag("#_"), form))(input)
}

fn ws0(input: &str) -> ParseResult<'_, &str> {
    recognize(many0(alt((take_while1(is_ws), line_comment, discard_form))))(input)
}

fn escape_char(input: &str) -> ParseResult<'_, char> {
    alt((
        value('\n', char('n')),
        value('\t', char('t')),
        value('\r', char('r')),
        value('"', char('"')),
        value('\\', char('\\')),
        anychar,
    ))(input)
}

fn string_body(input: &str) -> ParseResult<'_, String> {
    fold_many0(
        alt((preceded(char('\\'), escape_char), none_of("\"\\"))),
        String::new,
        |mut acc, c| {
            acc.push(c);
            acc
        },
    )(input)
}

fn string_lit(input: &str) -> ParseResult<'_, Sexp> {
    map(delimited(char('"'), string_body, char('"')), Sexp::Str)(input)
}

fn char_lit(input: &str) -> ParseResult<'_, Sexp> {
    map(
        recognize(preceded(
            char('\\'),
            alt((
                tag("newline"),
                tag("space"),
                tag("tab"),
                tag("return"),
                tag("backspace"),
                tag("formfeed"),
                recognize(anychar),
            )),
        )),
        raw_text,
    )(input)
}

fn list(input: &str) -> ParseResult<'_, Sexp> {
    map(
        delimited(char('('), many0(form), preceded(ws0, char(')'))),
        Sexp::List,
    )(input)
}

fn vector(input: &str) -> ParseResult<'_, Sexp> {
    map(
        delimited(char('['), many0(form), preceded(ws0, char(']'))),
        Sexp::Vector,
    )(input)
}

fn map_lit(input: &str) -> ParseResult<'_, Sexp> {
    map_res(
        delimited(char('{'), many0(form), preceded(ws0, char('}'))),
        |items: Vec<Sexp>| {
            if items.len() % 2 != 0 {
                return Err("odd number of map entries");
            }
            let mut pairs = Vec::with_capacity(items.len() / 2);
            let mut entries = items.into_iter();
            while let (Some(k), Some(v)) = (entries.next(), entries.next()) {
                pairs.push((k, v));
            }
            Ok(Sexp::Map(pairs))
        },
    )(input)
}

fn dispatch(input: &str) -> ParseResult<'_, Sexp> {
    alt((
        map(
            delimited(tag("#{"), many0(form), preceded(ws0, char('}'))),
            Sexp::Set,
        ),
        map(recognize(preceded(char('#'), string_lit)), raw_text),
        map(recognize(preceded(tag("#'"), form)), raw_text),
        map(recognize(preceded(char('#'), list)), raw_text),
        map(
            pair(preceded(char('#'), take_while1(is_atom_char)), form),
            |(name, tagged): (&str, Sexp)| Sexp::Tagged(name.to_string(), Box::new(tagged)),
        ),
    ))(input)
}

fn quote_like(input: &str) -> ParseResult<'_, Sexp> {
    alt((
        map(preceded(char('\''), form), |quoted| Sexp::quoted(quoted)),
        map(recognize(preceded(char('`'), form)), raw_text),
        map(recognize(preceded(tag("~@"), form)), raw_text),
        map(recognize(preceded(char('~'), form)), raw_text),
        map(recognize(preceded(char('@'), form)), raw_text),
        map(recognize(preceded(char('^'), pair(form, form))), raw_text),
    ))(input)
}

fn atom(input: &str) -> ParseResult<'_, Sexp> {
    map(take_while1(is_atom_char), classify)(input)
}

fn classify(token: &str) -> Sexp {
    match token {
        "nil" => return Sexp::Nil,
        "true" => return Sexp::Bool(true),
        "false" => return Sexp::Bool(false),
        _ => {}
    }
    if let Some(body) = token.strip_prefix(':') {
        return Sexp::Keyword(body.to_string());
    }
    let mut chars = token.chars();
    let first = chars.next();
    let second = chars.next();
    let numeric_start = matches!(first, Some(c) if c.is_ascii_digit())
        || (matches!(first, Some('+' | '-')) && matches!(second, Some(c) if c.is_ascii_digit()));
    if numeric_start {
        if let Ok(n) = token.parse::<i64>() {
            return Sexp::Int(n);
        }
        if let Ok(f) = token.parse::<f64>() {
            return Sexp::Float(f);
        }
    }
    Sexp::Sym(token.to_string())
}

fn raw_text(text: &str) -> Sexp {
    Sexp::Raw(text.to_string())
}

fn form(input: &str) -> ParseResult<'_, Sexp> {
    preceded(
        ws0,
        alt((
            list, vector, map_lit, string_lit, char_lit, dispatch, quote_like, atom,
        )),
    )(input)
}
