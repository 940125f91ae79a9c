// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The query expression tree and its canonical printer.
//!
//! `Display` is the canonical form: parsing the printed text of any
//! expression yields a structurally identical tree, which is what the
//! clone-by-reparse rewrite relies on.

use std::fmt;
use std::time::Duration;

/// A query expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    NumberLiteral(f64),
    StringLiteral(String),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Call(Call),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Paren(Box<Expr>),
}

impl Expr {
    pub fn kind(&self) -> ExprKind {
        match self {
            Expr::NumberLiteral(_) => ExprKind::NumberLiteral,
            Expr::StringLiteral(_) => ExprKind::StringLiteral,
            Expr::VectorSelector(_) => ExprKind::VectorSelector,
            Expr::MatrixSelector(_) => ExprKind::MatrixSelector,
            Expr::Call(_) => ExprKind::Call,
            Expr::Unary(_) => ExprKind::Unary,
            Expr::Binary(_) => ExprKind::Binary,
            Expr::Paren(_) => ExprKind::Paren,
        }
    }
}

/// The tag of an [`Expr`] variant, used to describe ancestor chains during
/// traversal without aliasing the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExprKind {
    NumberLiteral,
    StringLiteral,
    VectorSelector,
    MatrixSelector,
    Call,
    Unary,
    Binary,
    Paren,
}

/// Selects an instant vector: a set of series by label matchers, optionally
/// shifted backward in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VectorSelector {
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub offset: Duration,
}

/// Selects a range of samples per series, optionally shifted backward in
/// time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MatrixSelector {
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub range: Duration,
    pub offset: Duration,
}

/// A function application.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub func: String,
    pub args: Vec<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Unless,
}

/// A single label constraint within a selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> LabelMatcher {
        LabelMatcher {
            name: name.into(),
            op,
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::NumberLiteral(n) => write!(f, "{}", n),
            Expr::StringLiteral(s) => f.write_str(&quote_string(s)),
            Expr::VectorSelector(s) => write!(f, "{}", s),
            Expr::MatrixSelector(s) => write!(f, "{}", s),
            Expr::Call(call) => {
                write!(f, "{}(", call.func)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::Unary(unary) => write!(f, "{}{}", unary.op, unary.expr),
            Expr::Binary(binary) => write!(f, "{} {} {}", binary.lhs, binary.op, binary.rhs),
            Expr::Paren(inner) => write!(f, "({})", inner),
        }
    }
}

fn fmt_selector(
    f: &mut fmt::Formatter<'_>,
    name: Option<&str>,
    matchers: &[LabelMatcher],
) -> fmt::Result {
    if let Some(name) = name {
        f.write_str(name)?;
    }
    if name.is_none() || !matchers.is_empty() {
        write!(f, "{{")?;
        for (i, matcher) in matchers.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", matcher)?;
        }
        write!(f, "}}")?;
    }
    Ok(())
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_selector(f, self.name.as_deref(), &self.matchers)?;
        if !self.offset.is_zero() {
            write!(f, " offset {}", format_duration(self.offset))?;
        }
        Ok(())
    }
}

impl fmt::Display for MatrixSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_selector(f, self.name.as_deref(), &self.matchers)?;
        write!(f, "[{}]", format_duration(self.range))?;
        if !self.offset.is_zero() {
            write!(f, " offset {}", format_duration(self.offset))?;
        }
        Ok(())
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, quote_string(&self.value))
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::Regex => "=~",
            MatchOp::NotRegex => "!~",
        };
        f.write_str(s)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Plus => f.write_str("+"),
            UnaryOp::Minus => f.write_str("-"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Lt => "<",
            BinaryOp::Ge => ">=",
            BinaryOp::Le => "<=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Unless => "unless",
        };
        f.write_str(s)
    }
}

/// Quotes a string literal in the query language's double-quoted form.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

const MILLIS_PER_UNIT: &[(&str, u128)] = &[
    ("y", 1000 * 60 * 60 * 24 * 365),
    ("w", 1000 * 60 * 60 * 24 * 7),
    ("d", 1000 * 60 * 60 * 24),
    ("h", 1000 * 60 * 60),
    ("m", 1000 * 60),
    ("s", 1000),
    ("ms", 1),
];

/// Formats a duration in the query language's compound form, e.g. `1m30s`.
pub fn format_duration(duration: Duration) -> String {
    let mut millis = duration.as_millis();
    if millis == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, unit_millis) in MILLIS_PER_UNIT {
        let count = millis / unit_millis;
        if count > 0 {
            out.push_str(&count.to_string());
            out.push_str(unit);
            millis -= count * unit_millis;
        }
    }
    out
}

/// Returns the duration denoted by `unit`, if it is a duration unit.
pub(crate) fn unit_millis(unit: &str) -> Option<u64> {
    let millis = match unit {
        "ms" => 1,
        "s" => 1000,
        "m" => 1000 * 60,
        "h" => 1000 * 60 * 60,
        "d" => 1000 * 60 * 60 * 24,
        "w" => 1000 * 60 * 60 * 24 * 7,
        "y" => 1000 * 60 * 60 * 24 * 365,
        _ => return None,
    };
    Some(millis)
}
