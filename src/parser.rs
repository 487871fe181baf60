//! Reader: source text to [`Expr`] trees.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace1, not_line_ending, one_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::many0,
    sequence::{pair, preceded, terminated, tuple},
};

use crate::ParseError;
use crate::ast::Expr;

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(input: &str, error: nom::Err<Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            if e.input.is_empty() {
                format!("unexpected end of input at position {}", position)
            } else if e.code == ErrorKind::Float {
                let near: String = e.input.chars().take(10).collect();
                format!("malformed number at position {} near '{}'", position, near)
            } else if e.input.starts_with(')') {
                format!("unexpected closing parenthesis at position {}", position)
            } else if e.code == ErrorKind::Verify {
                format!("dotted tail without a head at position {}", position)
            } else {
                let near: String = e.input.chars().take(10).collect();
                format!("invalid syntax at position {} near '{}'", position, near)
            }
        }
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || "+-*/<>=!?_%&$^~:".contains(c)
}

/// Whitespace and `;` comments, possibly none
fn ws(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(char(';'), not_line_ending)),
        ))),
    )(input)
}

fn skip_ws(input: &str) -> &str {
    match ws(input) {
        Ok((rest, ())) => rest,
        Err(_) => input,
    }
}

/// Numeric token: sign, digits, optional fraction and exponent. A token that
/// runs straight into symbol characters (`1+`, `12abc`) is not a number, and
/// one that runs into a `.` (`1.`, `1.5.2`) is malformed.
fn number_literal(input: &str) -> IResult<&str, f64> {
    let (rest, text) = recognize(tuple((
        opt(one_of("+-")),
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;
    if rest.starts_with('.') {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::Float)));
    }
    let (rest, _) = not(satisfy(is_symbol_char))(rest)?;

    match text.parse::<f64>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => Err(nom::Err::Error(Error::new(input, ErrorKind::Float))),
    }
}

/// Parse a symbol (identifier). `T` and `nil` read as the canonical values.
/// A `.` may not follow a symbol without whitespace.
fn parse_symbol(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = take_while1(is_symbol_char)(input)?;
    if rest.starts_with('.') {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TakeWhile1)));
    }
    let expr = match name {
        "T" => Expr::T,
        "nil" => Expr::Nil,
        name => Expr::symbol(name),
    };
    Ok((rest, expr))
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('"')(input)?;
    let mut text = String::new();
    let mut remaining = input;

    while let Some(ch) = remaining.chars().next() {
        if ch == '"' {
            return Ok((&remaining[1..], Expr::string(text)));
        } else if ch == '\\' {
            let Some(escaped) = remaining[1..].chars().next() else {
                break;
            };
            text.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                // `\\`, `\"` and unknown escapes keep the character
                c => c,
            });
            remaining = &remaining[1 + escaped.len_utf8()..];
        } else {
            text.push(ch);
            remaining = &remaining[ch.len_utf8()..];
        }
    }

    // Unterminated: past the opening quote, so no other alternative applies
    Err(nom::Err::Failure(Error::new(
        &remaining[remaining.len()..],
        ErrorKind::Char,
    )))
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str) -> IResult<&str, Expr> {
    let (input, _) = char('\'')(input)?;
    let (input, expr) = cut(preceded(ws, parse_sexpr))(input)?;
    Ok((input, Expr::list(vec![Expr::symbol("quote"), expr])))
}

/// Parse a list, possibly dotted. `()` is `Nil`.
fn parse_list(input: &str) -> IResult<&str, Expr> {
    let (after_open, _) = char('(')(input)?;
    let (rest, items) = many0(preceded(ws, parse_sexpr))(after_open)?;
    let (rest, tail) = opt(preceded(
        pair(ws, char('.')),
        cut(preceded(ws, parse_sexpr)),
    ))(rest)?;
    let (rest, _) = cut(preceded(ws, char(')')))(rest)?;

    match tail {
        Some(_) if items.is_empty() => Err(nom::Err::Failure(Error::new(
            after_open,
            ErrorKind::Verify,
        ))),
        Some(tail) => Ok((rest, Expr::list_with_tail(items, tail))),
        None => Ok((rest, Expr::list(items))),
    }
}

/// Parse an S-expression
fn parse_sexpr(input: &str) -> IResult<&str, Expr> {
    alt((
        parse_quote,
        parse_list,
        map(number_literal, Expr::Number),
        parse_string,
        parse_symbol,
    ))(input)
}

/// Parse exactly one S-expression, surrounded by optional whitespace and
/// comments.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let start = skip_ws(input);
    match terminated(parse_sexpr, ws)(start) {
        Ok(("", expr)) => Ok(expr),
        Ok((remaining, _)) => Err(ParseError(format!(
            "unexpected remaining input at position {}: '{}'",
            input.len() - remaining.len(),
            remaining
        ))),
        Err(e) => Err(ParseError(parse_error_to_message(input, e))),
    }
}

/// Parse every top-level form in `input`. Empty input yields no forms.
pub fn parse_program(input: &str) -> Result<Vec<Expr>, ParseError> {
    let mut forms = Vec::new();
    let mut rest = skip_ws(input);
    while !rest.is_empty() {
        match terminated(parse_sexpr, ws)(rest) {
            Ok((remaining, expr)) => {
                forms.push(expr);
                rest = remaining;
            }
            Err(e) => return Err(ParseError(parse_error_to_message(input, e))),
        }
    }
    Ok(forms)
}

/// Read `text` as a single numeric token, ignoring surrounding whitespace.
pub fn parse_number(text: &str) -> Result<f64, ParseError> {
    match all_consuming(number_literal)(text.trim()) {
        Ok((_, n)) => Ok(n),
        Err(_) => Err(ParseError(format!("malformed number {:?}", text))),
    }
}
