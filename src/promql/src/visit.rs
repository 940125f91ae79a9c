// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Composable traversal of query expression trees.
//!
//! A [`Visitor`] is invoked once per node in pre-order and decides whether
//! descent continues below that node. [`MultiVisitor`] composes several
//! visitors into a single pass so that multiple analyses share one traversal
//! over potentially large trees; each composed visitor prunes independently
//! of the others.

use std::sync::{Arc, Mutex};

use crate::ast::{Expr, ExprKind};

/// An error produced by a visitor during a traversal pass.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("visit failed: {0}")]
pub struct VisitError(pub String);

/// Whether traversal descends below the just-visited node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descent {
    Continue,
    Prune,
}

/// A per-node callback for [`walk`].
///
/// `path` is the chain of ancestor node kinds, root first, excluding the
/// visited node itself.
pub trait Visitor {
    fn visit(&mut self, expr: &mut Expr, path: &[ExprKind]) -> Result<Descent, VisitError>;
}

/// Shared visitors serialize access to their state.
impl<V: Visitor> Visitor for Arc<Mutex<V>> {
    fn visit(&mut self, expr: &mut Expr, path: &[ExprKind]) -> Result<Descent, VisitError> {
        self.lock().expect("visitor lock poisoned").visit(expr, path)
    }
}

/// Walks `expr` in pre-order, invoking `visitor` on every node until the
/// visitor prunes or errors.
pub fn walk<V>(visitor: &mut V, expr: &mut Expr) -> Result<(), VisitError>
where
    V: Visitor + ?Sized,
{
    let mut path = Vec::new();
    walk_inner(visitor, expr, &mut path)
}

fn walk_inner<V>(
    visitor: &mut V,
    expr: &mut Expr,
    path: &mut Vec<ExprKind>,
) -> Result<(), VisitError>
where
    V: Visitor + ?Sized,
{
    match visitor.visit(expr, path)? {
        Descent::Prune => return Ok(()),
        Descent::Continue => (),
    }
    path.push(expr.kind());
    let result = match expr {
        Expr::Paren(inner) => walk_inner(visitor, inner, path),
        Expr::Unary(unary) => walk_inner(visitor, &mut unary.expr, path),
        Expr::Binary(binary) => walk_inner(visitor, &mut binary.lhs, path)
            .and_then(|()| walk_inner(visitor, &mut binary.rhs, path)),
        Expr::Call(call) => call
            .args
            .iter_mut()
            .try_for_each(|arg| walk_inner(visitor, arg, path)),
        Expr::NumberLiteral(_)
        | Expr::StringLiteral(_)
        | Expr::VectorSelector(_)
        | Expr::MatrixSelector(_) => Ok(()),
    };
    path.pop();
    result
}

/// Runs a set of visitors in one pass over the tree.
///
/// Each node is offered to every still-live visitor; a visitor that prunes is
/// retired for the remainder of the pass while the others continue. The last
/// error any visitor produced becomes the pass's error. Access to the visitor
/// slots is serialized, so a `MultiVisitor` may itself be shared.
pub struct MultiVisitor {
    visitors: Mutex<Vec<Option<Box<dyn Visitor + Send>>>>,
}

impl MultiVisitor {
    pub fn new(visitors: Vec<Box<dyn Visitor + Send>>) -> MultiVisitor {
        MultiVisitor {
            visitors: Mutex::new(visitors.into_iter().map(Some).collect()),
        }
    }

    /// The number of visitors that have not yet pruned.
    pub fn live(&self) -> usize {
        self.visitors
            .lock()
            .expect("visitor lock poisoned")
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

impl Visitor for MultiVisitor {
    fn visit(&mut self, expr: &mut Expr, path: &[ExprKind]) -> Result<Descent, VisitError> {
        let mut last_error = None;
        let mut slots = self.visitors.lock().expect("visitor lock poisoned");
        for slot in slots.iter_mut() {
            let Some(visitor) = slot else { continue };
            match visitor.visit(expr, path) {
                Ok(Descent::Continue) => (),
                Ok(Descent::Prune) => *slot = None,
                Err(err) => last_error = Some(err),
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(Descent::Continue),
        }
    }
}
