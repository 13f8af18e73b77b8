// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! ISO-10303-21 record tokenizer built on nom.
//!
//! Tokens borrow from the input; nothing is copied until the scene builder
//! asks for a value.

use nom::{
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{map, map_res, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};

/// A single attribute value of a STEP record
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// `#123`
    EntityRef(u32),
    /// `'text'`, quotes still doubled
    String(&'a str),
    Integer(i64),
    /// `3.14`, `0.`, `1.5E-10`
    Float(f64),
    /// `.ELEMENT.`
    Enum(&'a str),
    /// `(1, 2, 3)`
    List(Vec<Token<'a>>),
    /// `IFCLENGTHMEASURE(0.3048)`
    Typed(&'a str, Vec<Token<'a>>),
    /// `$`
    Null,
    /// `*`
    Derived,
}

impl<'a> Token<'a> {
    #[inline]
    pub fn as_ref_id(&self) -> Option<u32> {
        match self {
            Token::EntityRef(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric value; integers widen and single-argument typed values unwrap
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Token::Float(v) => Some(*v),
            Token::Integer(v) => Some(*v as f64),
            Token::Typed(_, args) if args.len() == 1 => args[0].as_f64(),
            _ => None,
        }
    }

    /// Raw string content (STEP escapes untouched)
    #[inline]
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Token::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_enum(&self) -> Option<&'a str> {
        match self {
            Token::Enum(e) => Some(e),
            _ => None,
        }
    }

    #[inline]
    pub fn as_list(&self) -> Option<&[Token<'a>]> {
        match self {
            Token::List(items) => Some(items),
            _ => None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Token::Null)
    }
}

/// Undo the doubled-quote escape of a STEP string
pub fn unescape(raw: &str) -> String {
    raw.replace("''", "'")
}

fn ws(input: &str) -> IResult<&str, ()> {
    value((), take_while(|c: char| c.is_whitespace()))(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn entity_ref(input: &str) -> IResult<&str, Token<'_>> {
    map(
        preceded(char('#'), map_res(digit1, |s: &str| s.parse::<u32>())),
        Token::EntityRef,
    )(input)
}

/// String body up to the closing quote, skipping doubled quotes
fn quoted_body(input: &str) -> IResult<&str, &str> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return Ok((&input[i..], &input[..i]));
        }
        i += 1;
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn string_literal(input: &str) -> IResult<&str, Token<'_>> {
    map(delimited(char('\''), quoted_body, char('\'')), Token::String)(input)
}

fn integer(input: &str) -> IResult<&str, Token<'_>> {
    map_res(
        recognize(pair(opt(one_of("+-")), digit1)),
        |s: &str| s.parse::<i64>().map(Token::Integer),
    )(input)
}

/// STEP reals always carry a '.', possibly without fraction digits ("0.")
fn float(input: &str) -> IResult<&str, Token<'_>> {
    map_res(
        recognize(tuple((
            opt(one_of("+-")),
            digit1,
            char('.'),
            opt(digit1),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| {
            fast_float::parse::<f64, _>(s)
                .ok()
                .or_else(|| s.parse::<f64>().ok())
                .map(Token::Float)
                .ok_or(())
        },
    )(input)
}

fn enumeration(input: &str) -> IResult<&str, Token<'_>> {
    map(delimited(char('.'), identifier, char('.')), Token::Enum)(input)
}

fn arguments(input: &str) -> IResult<&str, Vec<Token<'_>>> {
    delimited(
        terminated(char('('), ws),
        separated_list0(delimited(ws, char(','), ws), token),
        preceded(ws, char(')')),
    )(input)
}

fn typed(input: &str) -> IResult<&str, Token<'_>> {
    map(pair(identifier, arguments), |(name, args)| {
        Token::Typed(name, args)
    })(input)
}

fn token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        float,
        integer,
        entity_ref,
        string_literal,
        enumeration,
        map(arguments, Token::List),
        typed,
        value(Token::Null, char('$')),
        value(Token::Derived, char('*')),
    ))(input)
}

/// Parse a data section record: `#12=IFCCOLUMN('guid',$,...);`
pub fn parse_entity(input: &str) -> Result<(u32, &str, Vec<Token<'_>>)> {
    let result: IResult<&str, (u32, &str, Vec<Token>)> = tuple((
        delimited(
            ws,
            preceded(char('#'), map_res(digit1, |s: &str| s.parse::<u32>())),
            ws,
        ),
        preceded(char('='), delimited(ws, identifier, ws)),
        terminated(arguments, tuple((ws, char(';')))),
    ))(input);

    match result {
        Ok((_, parsed)) => Ok(parsed),
        Err(e) => Err(Error::parse(0, format!("malformed entity record: {}", e))),
    }
}

/// Parse a header record: `FILE_SCHEMA(('IFC4'));`
pub fn parse_record(input: &str) -> Result<(&str, Vec<Token<'_>>)> {
    let result: IResult<&str, (&str, Vec<Token>)> = pair(
        delimited(ws, identifier, ws),
        terminated(arguments, tuple((ws, char(';')))),
    )(input);

    result
        .map(|(_, parsed)| parsed)
        .map_err(|e| Error::parse(0, format!("malformed header record: {}", e)))
}

/// Byte offset just past the `;` terminating the record that starts at
/// `start`. Semicolons inside quoted strings are skipped.
pub fn record_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    loop {
        let offset = memchr::memchr2(b';', b'\'', &bytes[pos..])?;
        pos += offset;
        if bytes[pos] == b';' {
            return Some(pos + 1);
        }

        // Inside a string: find the closing quote, stepping over ''
        pos += 1;
        loop {
            let close = memchr::memchr(b'\'', &bytes[pos..])?;
            pos += close + 1;
            if bytes.get(pos) == Some(&b'\'') {
                pos += 1;
            } else {
                break;
            }
        }
    }
}
