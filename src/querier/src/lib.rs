// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Fan-out query orchestration and the storage-facing querier.
//!
//! This crate glues the other pieces of the proxy together. An incoming
//! storage call is translated into a query expression or matcher string, the
//! expression tree is rewritten for federation (offsets neutralized, group
//! identity made durable across binary operations), one request is dispatched
//! per target of every configured [`ServerGroup`], and the partial responses
//! are folded into a single merged result that the facade projects into the
//! shape the embedded query engine expects.
//!
//! Availability over completeness: a fan-out succeeds as long as *any*
//! downstream answered. Only when every target fails does the caller see an
//! error.

pub mod fanout;
pub mod iter;
pub mod metrics;
pub mod prepare;
pub mod querier;
pub mod server_group;

pub use crate::fanout::{fanout, FanoutError};
pub use crate::iter::{iterators_for_value, SeriesIterator};
pub use crate::metrics::QuerierMetrics;
pub use crate::prepare::{prepare_query, PreparedQuery};
pub use crate::querier::{ProxyQuerier, Querier, QuerierError};
pub use crate::server_group::ServerGroup;
