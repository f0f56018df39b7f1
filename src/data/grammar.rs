//! Mini-language for boost, functor and hint strings
//!
//! Everything in a record that is not a plain field is written as a list of
//! calls: `Name(arg, arg);Name;Phase:Name(arg)`. This module only splits
//! text into calls; `record` gives the calls meaning.

use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{char, multispace0};
use nom::combinator::{all_consuming, map, opt};
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::{delimited, terminated};
use nom::{IResult, Parser};

/// One `Name(args)` term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call<'a> {
    pub name: &'a str,
    pub args: Vec<&'a str>,
}

impl<'a> Call<'a> {
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied()
    }

    /// Argument `index` as a number, with the call name in the error
    pub fn number(&self, index: usize) -> Result<f64, String> {
        let raw = self
            .arg(index)
            .ok_or_else(|| format!("{} expects an argument at position {}", self.name, index))?;
        raw.parse::<f64>()
            .map_err(|_| format!("{}: '{}' is not a number", self.name, raw))
    }

    /// Argument `index` as an integer, if present
    pub fn int_opt(&self, index: usize) -> Result<Option<i32>, String> {
        match self.arg(index) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i32>()
                .map(Some)
                .map_err(|_| format!("{}: '{}' is not an integer", self.name, raw)),
        }
    }

    pub fn required(&self, index: usize) -> Result<&'a str, String> {
        self.arg(index)
            .ok_or_else(|| format!("{} expects an argument at position {}", self.name, index))
    }

    /// Case-insensitive name match ignoring underscores
    pub fn is(&self, name: &str) -> bool {
        normalize(self.name) == normalize(name)
    }
}

/// A call with an optional `Phase:` prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Functor<'a> {
    pub phase: Option<&'a str>,
    pub call: Call<'a>,
}

pub fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('_', "")
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
        .parse(input)
}

fn arg(input: &str) -> IResult<&str, &str> {
    map(
        take_while1(|c: char| !matches!(c, '(' | ')' | ',' | ';')),
        str::trim,
    )
    .parse(input)
}

fn arg_list(input: &str) -> IResult<&str, Vec<&str>> {
    map(
        delimited(char('('), separated_list0(char(','), arg), char(')')),
        |args| args.into_iter().filter(|a| !a.is_empty()).collect(),
    )
    .parse(input)
}

fn call(input: &str) -> IResult<&str, Call<'_>> {
    map(
        (
            delimited(multispace0, ident, multispace0),
            opt(terminated(arg_list, multispace0)),
        ),
        |(name, args)| Call {
            name,
            args: args.unwrap_or_default(),
        },
    )
    .parse(input)
}

fn functor(input: &str) -> IResult<&str, Functor<'_>> {
    map(
        (
            opt(terminated(
                delimited(multispace0, ident, multispace0),
                char(':'),
            )),
            call,
        ),
        |(phase, call)| Functor { phase, call },
    )
    .parse(input)
}

fn separator(input: &str) -> IResult<&str, char> {
    delimited(multispace0, alt((char(';'), char(','))), multispace0).parse(input)
}

fn semicolon(input: &str) -> IResult<&str, char> {
    delimited(multispace0, char(';'), multispace0).parse(input)
}

fn render_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> String {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len() - e.input.len();
            format!("cannot parse '{}' at offset {}", input, offset)
        }
        nom::Err::Incomplete(_) => format!("cannot parse '{}': incomplete", input),
    }
}

/// `AC(2);Advantage(AttackRoll)`; empty input is an empty list
pub fn parse_calls(input: &str) -> Result<Vec<Call<'_>>, String> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    all_consuming(terminated(
        separated_list1(semicolon, call),
        (opt(semicolon), multispace0),
    ))
    .parse(input)
    .map(|(_, calls)| calls)
    .map_err(|e| render_error(input, e))
}

/// One functor string; may hold several `;`-separated functors
pub fn parse_functors(input: &str) -> Result<Vec<Functor<'_>>, String> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    all_consuming(terminated(
        separated_list1(semicolon, functor),
        (opt(semicolon), multispace0),
    ))
    .parse(input)
    .map(|(_, functors)| functors)
    .map_err(|e| render_error(input, e))
}

/// Tag strings: words separated by `;` or `,`
pub fn parse_words(input: &str) -> Result<Vec<&str>, String> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    all_consuming(terminated(
        separated_list1(separator, delimited(multispace0, ident, multispace0)),
        (opt(separator), multispace0),
    ))
    .parse(input)
    .map(|(_, words)| words)
    .map_err(|e| render_error(input, e))
}
