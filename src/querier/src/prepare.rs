// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Rewriting of query expressions ahead of dispatch.
//!
//! Selectors bake their time offsets into the expression; to shift the whole
//! query uniformly the proxy discovers the single shared offset, zeroes it in
//! the tree, and re-applies it as an explicit shift of the request's
//! evaluation time. An expression whose selectors disagree on their offsets
//! aborts the query before anything is dispatched.

use std::sync::{Arc, Mutex};

use promfed_promql::{
    clone_expr, parse_expr, preserve_label, walk, BooleanFinder, Expr, MultiVisitor, OffsetFinder,
    OffsetRemover,
};
use promfed_repr::Timestamp;

use crate::querier::QuerierError;
use crate::server_group::ServerGroup;

/// A query expression rewritten for dispatch, plus its shifted evaluation
/// time.
#[derive(Debug)]
pub struct PreparedQuery {
    expr: Expr,
    /// The evaluation time to send downstream: the requested time minus any
    /// offset that was removed from the expression.
    pub time: Timestamp,
    has_binary: bool,
}

impl PreparedQuery {
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Renders the expression dispatched to targets of `group`.
    ///
    /// Every group works on its own clone of the tree. When the expression
    /// contains a binary operation and the group carries identity labels,
    /// the clone is wrapped so those labels survive the operation downstream.
    pub fn expr_for_group(&self, group: &ServerGroup) -> Result<String, QuerierError> {
        let mut expr = clone_expr(&self.expr)?;
        if self.has_binary {
            for name in group.labels.keys() {
                expr = preserve_label(&expr, name, name)?;
            }
        }
        Ok(expr.to_string())
    }
}

/// Parses `query` and neutralizes any uniform time offset, shifting `at`
/// accordingly.
///
/// One traversal discovers offsets and counts binary operations; a second
/// zeroes the selectors only when there is an offset to remove.
pub fn prepare_query(query: &str, at: Timestamp) -> Result<PreparedQuery, QuerierError> {
    let mut expr = parse_expr(query)?;

    let offsets = Arc::new(Mutex::new(OffsetFinder::default()));
    let binaries = Arc::new(Mutex::new(BooleanFinder::new(|expr: &Expr| {
        matches!(expr, Expr::Binary(_))
    })));
    let mut pass = MultiVisitor::new(vec![
        Box::new(Arc::clone(&offsets)),
        Box::new(Arc::clone(&binaries)),
    ]);
    walk(&mut pass, &mut expr)?;

    let (found, offset, error) = {
        let offsets = offsets.lock().expect("visitor lock poisoned");
        (offsets.found, offsets.offset, offsets.error)
    };
    if let Some(error) = error {
        return Err(error.into());
    }
    let has_binary = binaries.lock().expect("visitor lock poisoned").found > 0;

    let time = if found && !offset.is_zero() {
        walk(&mut OffsetRemover, &mut expr)?;
        at - offset
    } else {
        at
    };

    Ok(PreparedQuery {
        expr,
        time,
        has_binary,
    })
}
