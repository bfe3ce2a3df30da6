use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take,
    character::complete::{char, digit1},
    combinator::{opt, recognize},
    multi::many_till,
    sequence::{pair, preceded, terminated},
};
use std::collections::HashMap;

use crate::bencode_parser::errors::{BencodeError, Reason, RawError};

type BenResult<'a, O = Value<'a>> = IResult<&'a [u8], O, RawError<'a>>;

/// A decoded bencode value borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value<'a> {
    Bytes(&'a [u8]),
    Integer(i64),
    List(Vec<Self>),
    /// `raw` is the exact encoded span of the dictionary, `d` to `e` inclusive.
    Dictionary {
        entries: HashMap<&'a [u8], Self>,
        raw: &'a [u8],
    },
}

impl<'a> Value<'a> {
    pub fn get(&self, key: &[u8]) -> Option<&Value<'a>> {
        match self {
            Value::Dictionary { entries, .. } => entries.get(key),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Value::Bytes(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    fn parse_any(inp: &'a [u8]) -> BenResult<'a> {
        alt((
            Self::parse_bytes,
            Self::parse_integer,
            Self::parse_list,
            Self::parse_dict,
        ))
        .parse(inp)
    }

    fn parse_integer(start_inp: &'a [u8]) -> BenResult<'a> {
        let digits: BenResult<'a, &'a [u8]> = preceded(
            char('i'),
            terminated(recognize(pair(opt(char('-')), digit1)), char('e')),
        )
        .parse(start_inp);
        let (inp, digits) = digits?;

        let invalid = || nom::Err::Failure(RawError::new(start_inp, Reason::InvalidInteger));

        // Digits are ASCII by construction.
        let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
        if text.starts_with("-0") || (text.starts_with('0') && text.len() > 1) {
            return Err(invalid());
        }

        let value = text.parse::<i64>().map_err(|_| invalid())?;
        Ok((inp, Value::Integer(value)))
    }

    fn parse_raw_bytes(start_inp: &'a [u8]) -> BenResult<'a, &'a [u8]> {
        let digits: BenResult<'a, &'a [u8]> = terminated(digit1, char(':')).parse(start_inp);
        let (inp, digits) = digits?;

        let length = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| nom::Err::Failure(RawError::new(start_inp, Reason::InvalidLength)))?;

        if length > inp.len() {
            return Err(nom::Err::Failure(RawError::new(
                start_inp,
                Reason::InvalidLength,
            )));
        }

        take(length).parse(inp)
    }

    fn parse_bytes(inp: &'a [u8]) -> BenResult<'a> {
        Self::parse_raw_bytes(inp).map(|(rest, bytes)| (rest, Value::Bytes(bytes)))
    }

    fn parse_list(start_inp: &'a [u8]) -> BenResult<'a> {
        let (inp, (items, _)) =
            preceded(char('l'), many_till(Self::parse_any, char('e'))).parse(start_inp)?;

        Ok((inp, Value::List(items)))
    }

    fn parse_dict(start_inp: &'a [u8]) -> BenResult<'a> {
        let (inp, (pairs, _)) = preceded(
            char('d'),
            many_till(pair(Self::parse_raw_bytes, Self::parse_any), char('e')),
        )
        .parse(start_inp)?;

        let raw = &start_inp[..start_inp.len() - inp.len()];
        let entries = pairs.into_iter().collect();

        Ok((inp, Value::Dictionary { entries, raw }))
    }
}

/// Parses a single bencoded value spanning all of `source`.
///
/// # Errors
/// Returns `Err` if `source` is not valid bencode or has bytes left over
/// after the first value.
pub fn parse(source: &[u8]) -> Result<Value<'_>, BencodeError> {
    let (rest, value) =
        Value::parse_any(source).map_err(|err| BencodeError::from_nom(source, err))?;

    if !rest.is_empty() {
        return Err(BencodeError::TrailingData(source.len() - rest.len()));
    }

    Ok(value)
}
