// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A hand-written lexer and precedence-climbing parser for the query
//! expression subset in [`crate::ast`].

use std::fmt;
use std::time::Duration;

use crate::ast::{
    unit_millis, BinaryExpr, BinaryOp, Call, Expr, LabelMatcher, MatchOp, MatrixSelector,
    UnaryExpr, UnaryOp, VectorSelector,
};

/// An error lexing or parsing a query expression.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("parse error at position {pos}: {message}")]
pub struct ParseError {
    pub pos: usize,
    pub message: String,
}

impl ParseError {
    fn new(pos: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            pos,
            message: message.into(),
        }
    }
}

/// Parses a query expression from its textual form.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let tokens = lex(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let expr = parser.parse_binary(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some((pos, token)) => Err(ParseError::new(
            *pos,
            format!("unexpected {} after expression", token),
        )),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Duration(Duration),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Assign,
    EqEq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    EqRegex,
    NeRegex,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier {:?}", s),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Str(s) => write!(f, "string {:?}", s),
            Token::Duration(_) => write!(f, "duration"),
            Token::LParen => f.write_str("\"(\""),
            Token::RParen => f.write_str("\")\""),
            Token::LBrace => f.write_str("\"{\""),
            Token::RBrace => f.write_str("\"}\""),
            Token::LBracket => f.write_str("\"[\""),
            Token::RBracket => f.write_str("\"]\""),
            Token::Comma => f.write_str("\",\""),
            Token::Plus => f.write_str("\"+\""),
            Token::Minus => f.write_str("\"-\""),
            Token::Star => f.write_str("\"*\""),
            Token::Slash => f.write_str("\"/\""),
            Token::Percent => f.write_str("\"%\""),
            Token::Caret => f.write_str("\"^\""),
            Token::Assign => f.write_str("\"=\""),
            Token::EqEq => f.write_str("\"==\""),
            Token::Ne => f.write_str("\"!=\""),
            Token::Gt => f.write_str("\">\""),
            Token::Lt => f.write_str("\"<\""),
            Token::Ge => f.write_str("\">=\""),
            Token::Le => f.write_str("\"<=\""),
            Token::EqRegex => f.write_str("\"=~\""),
            Token::NeRegex => f.write_str("\"!~\""),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

fn lex(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let start = i;
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            '{' => {
                tokens.push((start, Token::LBrace));
                i += 1;
            }
            '}' => {
                tokens.push((start, Token::RBrace));
                i += 1;
            }
            '[' => {
                tokens.push((start, Token::LBracket));
                i += 1;
            }
            ']' => {
                tokens.push((start, Token::RBracket));
                i += 1;
            }
            ',' => {
                tokens.push((start, Token::Comma));
                i += 1;
            }
            '+' => {
                tokens.push((start, Token::Plus));
                i += 1;
            }
            '-' => {
                tokens.push((start, Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((start, Token::Star));
                i += 1;
            }
            '/' => {
                tokens.push((start, Token::Slash));
                i += 1;
            }
            '%' => {
                tokens.push((start, Token::Percent));
                i += 1;
            }
            '^' => {
                tokens.push((start, Token::Caret));
                i += 1;
            }
            '=' => {
                i += 1;
                match chars.get(i) {
                    Some('=') => {
                        tokens.push((start, Token::EqEq));
                        i += 1;
                    }
                    Some('~') => {
                        tokens.push((start, Token::EqRegex));
                        i += 1;
                    }
                    _ => tokens.push((start, Token::Assign)),
                }
            }
            '!' => {
                i += 1;
                match chars.get(i) {
                    Some('=') => {
                        tokens.push((start, Token::Ne));
                        i += 1;
                    }
                    Some('~') => {
                        tokens.push((start, Token::NeRegex));
                        i += 1;
                    }
                    _ => return Err(ParseError::new(start, "unexpected character '!'")),
                }
            }
            '>' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    tokens.push((start, Token::Ge));
                    i += 1;
                } else {
                    tokens.push((start, Token::Gt));
                }
            }
            '<' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    tokens.push((start, Token::Le));
                    i += 1;
                } else {
                    tokens.push((start, Token::Lt));
                }
            }
            '"' | '\'' => {
                let (token, next) = lex_string(&chars, i)?;
                tokens.push((start, token));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let (token, next) = lex_number(&chars, i)?;
                tokens.push((start, token));
                i = next;
            }
            c if is_ident_start(c) => {
                let mut ident = String::new();
                while i < chars.len() && is_ident_char(chars[i]) {
                    ident.push(chars[i]);
                    i += 1;
                }
                tokens.push((start, Token::Ident(ident)));
            }
            c => {
                return Err(ParseError::new(
                    start,
                    format!("unexpected character {:?}", c),
                ))
            }
        }
    }
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(Token, usize), ParseError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| ParseError::new(start, "unterminated string"))?;
                match escaped {
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    '\'' => out.push('\''),
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    c => {
                        return Err(ParseError::new(
                            i,
                            format!("unsupported escape sequence \\{}", c),
                        ))
                    }
                }
                i += 2;
            }
            c if c == quote => return Ok((Token::Str(out), i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ParseError::new(start, "unterminated string"))
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), ParseError> {
    let mut i = start;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }

    // A digit run directly followed by a duration unit is a duration, possibly
    // compound (`1m30s`).
    if matches!(chars.get(i), Some(c) if is_duration_unit_start(*c)) {
        let mut total = 0u64;
        let mut j = start;
        loop {
            let mut count = 0u64;
            if !matches!(chars.get(j), Some(c) if c.is_ascii_digit()) {
                return Err(ParseError::new(start, "invalid duration"));
            }
            while let Some(c) = chars.get(j) {
                let Some(digit) = c.to_digit(10) else { break };
                count = count
                    .saturating_mul(10)
                    .saturating_add(u64::from(digit));
                j += 1;
            }
            let mut unit = String::new();
            while let Some(c) = chars.get(j) {
                if c.is_ascii_alphabetic() && unit.len() < 2 && is_duration_unit_start(*c) {
                    // Only "ms" is longer than one character; stop after a
                    // standalone unit unless an "ms" is forming.
                    if !unit.is_empty() && unit != "m" {
                        break;
                    }
                    if !unit.is_empty() && *c != 's' {
                        break;
                    }
                    unit.push(*c);
                    j += 1;
                } else {
                    break;
                }
            }
            let millis = unit_millis(&unit)
                .ok_or_else(|| ParseError::new(start, format!("invalid duration unit {:?}", unit)))?;
            total = total.saturating_add(count.saturating_mul(millis));
            if !matches!(chars.get(j), Some(c) if c.is_ascii_digit()) {
                return Ok((Token::Duration(Duration::from_millis(total)), j));
            }
        }
    }

    // Otherwise a number; pick up any fractional part and exponent.
    if chars.get(i) == Some(&'.') {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        i += 1;
        if matches!(chars.get(i), Some('+') | Some('-')) {
            i += 1;
        }
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text: String = chars[start..i].iter().collect();
    let number = text
        .parse::<f64>()
        .map_err(|e| ParseError::new(start, format!("invalid number {:?}: {}", text, e)))?;
    Ok((Token::Number(number), i))
}

fn is_duration_unit_start(c: char) -> bool {
    matches!(c, 's' | 'm' | 'h' | 'd' | 'w' | 'y')
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error_pos(&self) -> usize {
        match self.peek() {
            Some((pos, _)) => *pos,
            None => self.input_len,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        match self.next() {
            Some((_, token)) if token == *expected => Ok(()),
            Some((pos, token)) => Err(ParseError::new(
                pos,
                format!("expected {}, found {}", expected, token),
            )),
            None => Err(ParseError::new(
                self.input_len,
                format!("expected {}, found end of input", expected),
            )),
        }
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            let precedence = binary_precedence(op);
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            // `^` is right-associative; everything else is left-associative.
            let next_min = if op == BinaryOp::Pow {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.parse_binary(next_min)?;
            lhs = Expr::Binary(BinaryExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let (_, token) = self.peek()?;
        let op = match token {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            Token::Caret => BinaryOp::Pow,
            Token::EqEq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::Gt => BinaryOp::Gt,
            Token::Lt => BinaryOp::Lt,
            Token::Ge => BinaryOp::Ge,
            Token::Le => BinaryOp::Le,
            Token::Ident(ident) => match ident.as_str() {
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "unless" => BinaryOp::Unless,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some((_, Token::Plus)) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryExpr {
                    op: UnaryOp::Plus,
                    expr: Box::new(self.parse_unary()?),
                }))
            }
            Some((_, Token::Minus)) => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryExpr {
                    op: UnaryOp::Minus,
                    expr: Box::new(self.parse_unary()?),
                }))
            }
            _ => {
                let atom = self.parse_atom()?;
                self.parse_modifiers(atom)
            }
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some((_, Token::Number(n))) => Ok(Expr::NumberLiteral(n)),
            Some((_, Token::Str(s))) => Ok(Expr::StringLiteral(s)),
            Some((_, Token::LParen)) => {
                let inner = self.parse_binary(0)?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Some((_, Token::LBrace)) => {
                let matchers = self.parse_matchers()?;
                Ok(Expr::VectorSelector(VectorSelector {
                    name: None,
                    matchers,
                    offset: Duration::ZERO,
                }))
            }
            Some((pos, Token::Ident(ident))) => {
                if matches!(ident.as_str(), "offset" | "and" | "or" | "unless") {
                    return Err(ParseError::new(
                        pos,
                        format!("unexpected keyword {:?}", ident),
                    ));
                }
                match self.peek() {
                    Some((_, Token::LParen)) => {
                        self.pos += 1;
                        let args = self.parse_call_args()?;
                        Ok(Expr::Call(Call { func: ident, args }))
                    }
                    Some((_, Token::LBrace)) => {
                        self.pos += 1;
                        let matchers = self.parse_matchers()?;
                        Ok(Expr::VectorSelector(VectorSelector {
                            name: Some(ident),
                            matchers,
                            offset: Duration::ZERO,
                        }))
                    }
                    _ => Ok(Expr::VectorSelector(VectorSelector {
                        name: Some(ident),
                        matchers: Vec::new(),
                        offset: Duration::ZERO,
                    })),
                }
            }
            Some((pos, token)) => Err(ParseError::new(pos, format!("unexpected {}", token))),
            None => Err(ParseError::new(self.input_len, "unexpected end of input")),
        }
    }

    /// Applies postfix range and offset modifiers to a parsed atom.
    fn parse_modifiers(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        let mut expr = expr;
        if matches!(self.peek(), Some((_, Token::LBracket))) {
            let pos = self.error_pos();
            let Expr::VectorSelector(selector) = expr else {
                return Err(ParseError::new(
                    pos,
                    "range modifier is only valid on a selector",
                ));
            };
            self.pos += 1;
            let range = self.parse_duration()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::MatrixSelector(MatrixSelector {
                name: selector.name,
                matchers: selector.matchers,
                range,
                offset: Duration::ZERO,
            });
        }
        if matches!(self.peek(), Some((_, Token::Ident(ident))) if ident == "offset") {
            let pos = self.error_pos();
            self.pos += 1;
            let offset = self.parse_duration()?;
            match &mut expr {
                Expr::VectorSelector(selector) => selector.offset = offset,
                Expr::MatrixSelector(selector) => selector.offset = offset,
                _ => {
                    return Err(ParseError::new(
                        pos,
                        "offset modifier is only valid on a selector",
                    ))
                }
            }
        }
        Ok(expr)
    }

    fn parse_duration(&mut self) -> Result<Duration, ParseError> {
        match self.next() {
            Some((_, Token::Duration(duration))) => Ok(duration),
            Some((pos, token)) => Err(ParseError::new(
                pos,
                format!("expected duration, found {}", token),
            )),
            None => Err(ParseError::new(
                self.input_len,
                "expected duration, found end of input",
            )),
        }
    }

    fn parse_matchers(&mut self) -> Result<Vec<LabelMatcher>, ParseError> {
        let mut matchers = Vec::new();
        loop {
            if matches!(self.peek(), Some((_, Token::RBrace))) {
                self.pos += 1;
                return Ok(matchers);
            }
            let name = match self.next() {
                Some((_, Token::Ident(name))) => name,
                Some((pos, token)) => {
                    return Err(ParseError::new(
                        pos,
                        format!("expected label name, found {}", token),
                    ))
                }
                None => {
                    return Err(ParseError::new(
                        self.input_len,
                        "expected label name, found end of input",
                    ))
                }
            };
            let op = match self.next() {
                Some((_, Token::Assign)) => MatchOp::Equal,
                Some((_, Token::Ne)) => MatchOp::NotEqual,
                Some((_, Token::EqRegex)) => MatchOp::Regex,
                Some((_, Token::NeRegex)) => MatchOp::NotRegex,
                Some((pos, token)) => {
                    return Err(ParseError::new(
                        pos,
                        format!("expected label match operator, found {}", token),
                    ))
                }
                None => {
                    return Err(ParseError::new(
                        self.input_len,
                        "expected label match operator, found end of input",
                    ))
                }
            };
            let value = match self.next() {
                Some((_, Token::Str(value))) => value,
                Some((pos, token)) => {
                    return Err(ParseError::new(
                        pos,
                        format!("expected label value string, found {}", token),
                    ))
                }
                None => {
                    return Err(ParseError::new(
                        self.input_len,
                        "expected label value string, found end of input",
                    ))
                }
            };
            matchers.push(LabelMatcher { name, op, value });
            if matches!(self.peek(), Some((_, Token::Comma))) {
                self.pos += 1;
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some((_, Token::RParen))) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_binary(0)?);
            match self.next() {
                Some((_, Token::Comma)) => (),
                Some((_, Token::RParen)) => return Ok(args),
                Some((pos, token)) => {
                    return Err(ParseError::new(
                        pos,
                        format!("expected \",\" or \")\", found {}", token),
                    ))
                }
                None => {
                    return Err(ParseError::new(
                        self.input_len,
                        "expected \",\" or \")\", found end of input",
                    ))
                }
            }
        }
    }
}

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And | BinaryOp::Unless => 2,
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Gt
        | BinaryOp::Lt
        | BinaryOp::Ge
        | BinaryOp::Le => 3,
        BinaryOp::Add | BinaryOp::Sub => 4,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        BinaryOp::Pow => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &str) {
        let expr = parse_expr(input).unwrap();
        let printed = expr.to_string();
        let reparsed = parse_expr(&printed).unwrap();
        assert_eq!(expr, reparsed, "round trip of {:?} via {:?}", input, printed);
    }

    #[test]
    fn parses_selectors() {
        let expr = parse_expr("up{job=\"prometheus\"}").unwrap();
        assert_eq!(
            expr,
            Expr::VectorSelector(VectorSelector {
                name: Some("up".into()),
                matchers: vec![LabelMatcher::new("job", MatchOp::Equal, "prometheus")],
                offset: Duration::ZERO,
            })
        );
        assert_eq!(expr.to_string(), "up{job=\"prometheus\"}");

        let expr = parse_expr("{__name__=~\"job:.*\"}").unwrap();
        assert_eq!(expr.to_string(), "{__name__=~\"job:.*\"}");
    }

    #[test]
    fn parses_matrix_selector_with_offset() {
        let expr = parse_expr("http_requests_total{job=\"api\"}[5m] offset 1h").unwrap();
        assert_eq!(
            expr,
            Expr::MatrixSelector(MatrixSelector {
                name: Some("http_requests_total".into()),
                matchers: vec![LabelMatcher::new("job", MatchOp::Equal, "api")],
                range: Duration::from_secs(300),
                offset: Duration::from_secs(3600),
            })
        );
        assert_eq!(
            expr.to_string(),
            "http_requests_total{job=\"api\"}[5m] offset 1h"
        );
    }

    #[test]
    fn parses_calls_and_operators() {
        let expr = parse_expr("rate(x[1m]) + sum(y) / 2").unwrap();
        let Expr::Binary(add) = expr else {
            panic!("expected binary expression")
        };
        assert_eq!(add.op, BinaryOp::Add);
        assert!(matches!(*add.lhs, Expr::Call(_)));
        let Expr::Binary(div) = *add.rhs else {
            panic!("expected division on the right")
        };
        assert_eq!(div.op, BinaryOp::Div);
    }

    #[test]
    fn precedence_and_associativity() {
        let expr = parse_expr("a or b and c").unwrap();
        let Expr::Binary(or) = expr else {
            panic!("expected or at the top")
        };
        assert_eq!(or.op, BinaryOp::Or);
        let Expr::Binary(and) = *or.rhs else {
            panic!("expected and on the right")
        };
        assert_eq!(and.op, BinaryOp::And);

        // `^` associates to the right.
        let expr = parse_expr("2 ^ 3 ^ 2").unwrap();
        let Expr::Binary(outer) = expr else {
            panic!("expected binary expression")
        };
        assert_eq!(outer.op, BinaryOp::Pow);
        assert_eq!(*outer.lhs, Expr::NumberLiteral(2.0));
        assert!(matches!(*outer.rhs, Expr::Binary(_)));
    }

    #[test]
    fn round_trips() {
        for input in [
            "up",
            "up{job=\"prometheus\"}",
            "{job=~\"api.*\",az!=\"east\"}",
            "rate(http_requests_total{job=\"api\"}[5m])",
            "up offset 5m + rate(x[1m] offset 10m)",
            "label_replace(up, \"cluster\", \"$1\", \"__server_group__\", \"(.*)\")",
            "sum(rate(errors_total[1m30s])) / sum(rate(requests_total[90s]))",
            "-(1 + 2) * 3",
            "scalar(up) == 1 or vector(0)",
            "\"a string\"",
            "x unless y",
            "time()",
        ] {
            round_trip(input);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for input in [
            "up{job=\"x\"",
            "up[",
            "up[5z]",
            "rate(x[1m]",
            "up{job}",
            "1 +",
            "(1 + 2",
            "up offset",
            "\"unterminated",
            "1 @ 2",
        ] {
            assert!(parse_expr(input).is_err(), "expected error for {:?}", input);
        }
    }

    #[test]
    fn range_on_non_selector_is_an_error() {
        assert!(parse_expr("(a + b)[5m]").is_err());
        assert!(parse_expr("1 offset 5m").is_err());
    }
}
