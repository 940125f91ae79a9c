// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Federation rewrites over parsed query expressions.
//!
//! The query language bakes time offsets into individual selectors. To shift
//! a whole query's evaluation window uniformly, [`OffsetFinder`] discovers
//! the single offset shared by every selector (or reports the mismatch) and
//! [`OffsetRemover`] zeroes the selectors so the offset can be re-applied as
//! an explicit shift of the request's evaluation time.

use std::fmt;
use std::time::Duration;

use crate::ast::{format_duration, quote_string, Expr, ExprKind};
use crate::parser::{parse_expr, ParseError};
use crate::visit::{Descent, VisitError, Visitor};

/// The expression carries different offsets on different selectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MismatchedOffsets {
    /// The offset recorded from the first selector seen.
    pub expected: Duration,
    /// The differing offset that was found later.
    pub found: Duration,
}

impl fmt::Display for MismatchedOffsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mismatched offsets {} {}",
            format_duration(self.found),
            format_duration(self.expected),
        )
    }
}

impl std::error::Error for MismatchedOffsets {}

/// Discovers whether an expression carries a time offset and, if so, its
/// value.
///
/// The first selector seen fixes the offset; any later selector with a
/// different offset records a [`MismatchedOffsets`] error, after which the
/// finder retires from the traversal (continuing would change nothing).
#[derive(Debug, Default)]
pub struct OffsetFinder {
    pub found: bool,
    pub offset: Duration,
    pub error: Option<MismatchedOffsets>,
}

impl Visitor for OffsetFinder {
    fn visit(&mut self, expr: &mut Expr, _path: &[ExprKind]) -> Result<Descent, VisitError> {
        let offset = match expr {
            Expr::VectorSelector(selector) => Some(selector.offset),
            Expr::MatrixSelector(selector) => Some(selector.offset),
            _ => None,
        };
        if let Some(offset) = offset {
            if !self.found {
                self.offset = offset;
                self.found = true;
            } else if offset != self.offset {
                self.error = Some(MismatchedOffsets {
                    expected: self.offset,
                    found: offset,
                });
            }
        }
        if self.error.is_none() {
            Ok(Descent::Continue)
        } else {
            Ok(Descent::Prune)
        }
    }
}

/// Zeroes the offset of every selector in the expression. Idempotent.
///
/// Used after [`OffsetFinder`] confirmed a single consistent offset; the
/// removed offset becomes an explicit shift of the request's evaluation time.
#[derive(Debug, Default)]
pub struct OffsetRemover;

impl Visitor for OffsetRemover {
    fn visit(&mut self, expr: &mut Expr, _path: &[ExprKind]) -> Result<Descent, VisitError> {
        match expr {
            Expr::VectorSelector(selector) => selector.offset = Duration::ZERO,
            Expr::MatrixSelector(selector) => selector.offset = Duration::ZERO,
            _ => (),
        }
        Ok(Descent::Continue)
    }
}

/// Counts the nodes matching a predicate. Never prunes.
pub struct BooleanFinder<F> {
    pub func: F,
    pub found: usize,
}

impl<F> BooleanFinder<F>
where
    F: FnMut(&Expr) -> bool,
{
    pub fn new(func: F) -> BooleanFinder<F> {
        BooleanFinder { func, found: 0 }
    }
}

impl<F> Visitor for BooleanFinder<F>
where
    F: FnMut(&Expr) -> bool,
{
    fn visit(&mut self, expr: &mut Expr, _path: &[ExprKind]) -> Result<Descent, VisitError> {
        if (self.func)(expr) {
            self.found += 1;
        }
        Ok(Descent::Continue)
    }
}

/// Produces an independent copy of an expression by printing and re-parsing
/// it.
///
/// This is the ownership firewall applied before destructive rewrites: every
/// dispatched request mutates its own copy.
pub fn clone_expr(expr: &Expr) -> Result<Expr, ParseError> {
    parse_expr(&expr.to_string())
}

/// Wraps `expr` so that the value of label `src` is carried into label `dst`.
///
/// Binary operations in the query language drop labels that differ between
/// their operands. When federating across groups whose identity label values
/// differ, relocating the identity into a label both sides retain keeps it
/// observable in the result.
pub fn preserve_label(expr: &Expr, src: &str, dst: &str) -> Result<Expr, ParseError> {
    parse_expr(&format!(
        "label_replace({}, {}, \"$1\", {}, \"(.*)\")",
        expr,
        quote_string(dst),
        quote_string(src),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::visit::{walk, MultiVisitor};

    use super::*;

    fn find_offset(input: &str) -> OffsetFinder {
        let mut expr = parse_expr(input).unwrap();
        let mut finder = OffsetFinder::default();
        walk(&mut finder, &mut expr).unwrap();
        finder
    }

    #[test]
    fn offset_free_expression_reports_nothing() {
        let finder = find_offset("sum(rate(x[1m])) / sum(rate(y[1m]))");
        assert!(!finder.found);
        assert_eq!(finder.error, None);
    }

    #[test]
    fn zero_offset_selectors_report_found_zero() {
        let finder = find_offset("up + down");
        assert!(finder.found);
        assert_eq!(finder.offset, Duration::ZERO);
        assert_eq!(finder.error, None);
    }

    #[test]
    fn consistent_offset_is_discovered_once() {
        let finder = find_offset("up offset 5m + rate(x[1m] offset 5m)");
        assert!(finder.found);
        assert_eq!(finder.offset, Duration::from_secs(300));
        assert_eq!(finder.error, None);
    }

    #[test]
    fn mismatched_offsets_are_an_error() {
        let finder = find_offset("up offset 5m + rate(x[1m] offset 10m)");
        let error = finder.error.unwrap();
        assert_eq!(
            error,
            MismatchedOffsets {
                expected: Duration::from_secs(300),
                found: Duration::from_secs(600),
            }
        );
        assert_eq!(error.to_string(), "mismatched offsets 10m 5m");
    }

    #[test]
    fn offset_remover_zeroes_every_selector() {
        let mut expr = parse_expr("up offset 5m + rate(x[1m] offset 5m)").unwrap();
        walk(&mut OffsetRemover, &mut expr).unwrap();
        assert_eq!(expr.to_string(), "up + rate(x[1m])");

        let finder = {
            let mut finder = OffsetFinder::default();
            walk(&mut finder, &mut expr).unwrap();
            finder
        };
        assert!(finder.found);
        assert_eq!(finder.offset, Duration::ZERO);

        // Idempotent.
        let printed = expr.to_string();
        walk(&mut OffsetRemover, &mut expr).unwrap();
        assert_eq!(expr.to_string(), printed);
    }

    #[test]
    fn offset_remover_preserves_offset_free_expressions() {
        let input = "sum(rate(x[1m])) / sum(rate(y[1m]))";
        let mut expr = parse_expr(input).unwrap();
        let original = expr.clone();
        walk(&mut OffsetRemover, &mut expr).unwrap();
        assert_eq!(expr, original);
    }

    #[test]
    fn boolean_finder_counts_matches() {
        let mut expr = parse_expr("rate(x[1m]) + rate(y[1m]) + 1").unwrap();
        let mut finder = BooleanFinder::new(|expr: &Expr| matches!(expr, Expr::Call(_)));
        walk(&mut finder, &mut expr).unwrap();
        assert_eq!(finder.found, 2);
    }

    #[test]
    fn clone_expr_round_trips() {
        for input in [
            "up",
            "up offset 5m + rate(x[1m] offset 10m)",
            "label_replace(up, \"dst\", \"$1\", \"src\", \"(.*)\")",
            "sum(rate(errors_total{job=~\"api.*\"}[5m]))",
        ] {
            let expr = parse_expr(input).unwrap();
            let clone = clone_expr(&expr).unwrap();
            assert_eq!(clone, expr);
            assert_eq!(clone.to_string(), expr.to_string());
        }
    }

    #[test]
    fn clone_expr_is_independent() {
        let expr = parse_expr("up offset 5m").unwrap();
        let mut clone = clone_expr(&expr).unwrap();
        walk(&mut OffsetRemover, &mut clone).unwrap();
        assert_eq!(expr.to_string(), "up offset 5m");
        assert_eq!(clone.to_string(), "up");
    }

    #[test]
    fn preserve_label_wraps_with_label_replace() {
        let expr = parse_expr("up").unwrap();
        let wrapped = preserve_label(&expr, "__server_group__", "cluster").unwrap();
        assert_eq!(
            wrapped.to_string(),
            "label_replace(up, \"cluster\", \"$1\", \"__server_group__\", \"(.*)\")"
        );
    }

    #[test]
    fn offset_pass_composes_with_other_analyses() {
        let mut expr = parse_expr("up offset 5m + rate(x[1m] offset 5m)").unwrap();
        let finder = Arc::new(Mutex::new(OffsetFinder::default()));
        let binaries = Arc::new(Mutex::new(BooleanFinder::new(|expr: &Expr| {
            matches!(expr, Expr::Binary(_))
        })));
        let mut multi = MultiVisitor::new(vec![
            Box::new(Arc::clone(&finder)),
            Box::new(Arc::clone(&binaries)),
        ]);
        walk(&mut multi, &mut expr).unwrap();

        let finder = finder.lock().unwrap();
        assert!(finder.found);
        assert_eq!(finder.offset, Duration::from_secs(300));
        assert_eq!(binaries.lock().unwrap().found, 1);
    }
}
