// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Query expression handling for the federation proxy.
//!
//! This crate implements the subset of the downstream query language the
//! proxy must understand in order to federate queries: enough of the grammar
//! to parse any expression it is asked to fan out, print it back in canonical
//! form, and rewrite it before dispatch.
//!
//! The pieces:
//!
//!   * [`ast`]: the expression tree and its canonical printer.
//!   * [`parser`]: text to [`ast::Expr`].
//!   * [`visit`]: a composable traversal framework. A [`visit::Visitor`] is a
//!     capability invoked once per node; [`visit::MultiVisitor`] runs several
//!     analyses in a single pass.
//!   * [`rewrite`]: the federation rewrites themselves: offset discovery and
//!     removal, predicate counting, clone-by-reparse, and the
//!     `label_replace` wrapping that carries group identity through binary
//!     operations.

pub mod ast;
pub mod parser;
pub mod rewrite;
pub mod visit;

pub use crate::ast::{
    BinaryExpr, BinaryOp, Call, Expr, ExprKind, LabelMatcher, MatchOp, MatrixSelector, UnaryExpr,
    UnaryOp, VectorSelector,
};
pub use crate::parser::{parse_expr, ParseError};
pub use crate::rewrite::{
    clone_expr, preserve_label, BooleanFinder, MismatchedOffsets, OffsetFinder, OffsetRemover,
};
pub use crate::visit::{walk, Descent, MultiVisitor, VisitError, Visitor};
