// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Typed client for the downstream metrics HTTP API.
//!
//! The proxy speaks to every backend over the standard read-path endpoints:
//!
//!   * `GET <base>/api/v1/query?query=<expr>&time=<ts>`
//!   * `GET <base>/api/v1/series?match[]=<expr>&start=<ts>&end=<ts>`
//!   * `GET <base>/api/v1/label/<name>/values`
//!
//! Responses arrive in a `{status, data}` envelope whose `data` is
//! polymorphic over the query's result type; decoding dispatches on the
//! envelope's type tag. The [`SeriesList`] and [`LabelValueList`] results
//! double as the accumulators the fan-out folds partial responses into.

mod client;
mod response;

pub use crate::client::{Client, Error};
pub use crate::response::{LabelValueList, QueryData, SeriesList, Status};
