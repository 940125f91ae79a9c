// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The storage-facing querier.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use prometheus::Registry;
use tracing::debug;

use promfed_client::{Client, SeriesList};
use promfed_promql::{LabelMatcher, MismatchedOffsets, ParseError, VectorSelector, VisitError};
use promfed_repr::{merge_values, Metric, Timestamp, Value};

use crate::fanout::{fanout, FanoutError};
use crate::iter::{iterators_for_value, SeriesIterator};
use crate::metrics::{host_label, QuerierMetrics};
use crate::prepare::{prepare_query, PreparedQuery};
use crate::server_group::ServerGroup;

/// An error from a querier operation.
///
/// A partial downstream failure is not an error; see [`FanoutError`].
#[derive(Debug, thiserror::Error)]
pub enum QuerierError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    MismatchedOffsets(#[from] MismatchedOffsets),
    #[error(transparent)]
    Visit(#[from] VisitError),
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
}

/// The storage interface the embedded query engine evaluates against.
#[async_trait]
pub trait Querier {
    /// Returns one iterator per series matching `matchers` over the inclusive
    /// time range `[from, through]`.
    async fn query_range(
        &self,
        from: Timestamp,
        through: Timestamp,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<SeriesIterator>, QuerierError>;

    /// Returns one iterator per series matching `matchers` at instant `ts`.
    async fn query_instant(
        &self,
        ts: Timestamp,
        staleness_delta: Duration,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<SeriesIterator>, QuerierError>;

    /// Returns the metrics matching the given matcher sets between `from` and
    /// `through`.
    async fn metrics_for_label_matchers(
        &self,
        from: Timestamp,
        through: Timestamp,
        matcher_sets: &[Vec<LabelMatcher>],
    ) -> Result<Vec<Metric>, QuerierError>;

    /// Returns every value of the label `name` across all backends.
    async fn label_values_for_label_name(&self, name: &str) -> Result<Vec<String>, QuerierError>;

    /// Releases any per-querier resources. Idempotent.
    fn close(&self) -> Result<(), QuerierError> {
        Ok(())
    }
}

/// A querier that answers storage calls by fanning out to every member of
/// every configured server group and merging the partial results.
#[derive(Clone)]
pub struct ProxyQuerier {
    groups: Vec<ServerGroup>,
    client: Client,
    metrics: Arc<QuerierMetrics>,
}

impl ProxyQuerier {
    pub fn new(
        groups: Vec<ServerGroup>,
        client: Client,
        registry: &Registry,
    ) -> Result<ProxyQuerier, prometheus::Error> {
        Ok(ProxyQuerier {
            groups,
            client,
            metrics: Arc::new(QuerierMetrics::register_into(registry)?),
        })
    }

    /// Dispatches a prepared query to every target and merges the values.
    ///
    /// Returns `None` only when no target produced a value, which the
    /// fan-out's partial-failure policy already turns into an error.
    async fn fetch_value(
        &self,
        prepared: &PreparedQuery,
        cache_bust: Option<Timestamp>,
    ) -> Result<Option<Value>, QuerierError> {
        let mut queries = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            queries.push(prepared.expr_for_group(group)?);
        }

        let mut merged: Option<Value> = None;
        fanout(
            &self.groups,
            |index, group, target| {
                let client = self.client.clone();
                let metrics = Arc::clone(&self.metrics);
                let query = queries[index].clone();
                let labels = group.labels.clone();
                let target = target.clone();
                let time = prepared.time;
                async move {
                    let host = host_label(&target);
                    let start = Instant::now();
                    let result = client.query(&target, &query, time, cache_bust).await;
                    metrics.observe(&host, "query", result.is_ok(), start.elapsed());
                    result.map(|mut value| {
                        value.add_label_set(&labels);
                        value
                    })
                }
            },
            |_, value| {
                merged = Some(match merged.take() {
                    None => value,
                    Some(held) => merge_values(held, value)?,
                });
                Ok(())
            },
        )
        .await?;
        Ok(merged)
    }
}

fn selector_for_matchers(matchers: &[LabelMatcher]) -> String {
    VectorSelector {
        name: None,
        matchers: matchers.to_vec(),
        offset: Duration::ZERO,
    }
    .to_string()
}

#[async_trait]
impl Querier for ProxyQuerier {
    async fn query_range(
        &self,
        from: Timestamp,
        through: Timestamp,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<SeriesIterator>, QuerierError> {
        debug!(%from, %through, ?matchers, "query_range");
        // Fetch the raw datapoints through the query interface by asking for
        // a range at least as long as ours; the added second absorbs the
        // float-to-integer rounding of the duration.
        let range_secs = through.since(from).as_secs() + 1;
        let query = format!("{}[{}s]", selector_for_matchers(matchers), range_secs);
        let prepared = prepare_query(&query, through)?;
        let value = self.fetch_value(&prepared, None).await?;
        Ok(value.map(iterators_for_value).unwrap_or_default())
    }

    async fn query_instant(
        &self,
        ts: Timestamp,
        staleness_delta: Duration,
        matchers: &[LabelMatcher],
    ) -> Result<Vec<SeriesIterator>, QuerierError> {
        debug!(%ts, ?staleness_delta, ?matchers, "query_instant");
        let query = selector_for_matchers(matchers);
        let prepared = prepare_query(&query, ts)?;
        let value = self.fetch_value(&prepared, Some(ts - staleness_delta)).await?;
        Ok(value.map(iterators_for_value).unwrap_or_default())
    }

    async fn metrics_for_label_matchers(
        &self,
        from: Timestamp,
        through: Timestamp,
        matcher_sets: &[Vec<LabelMatcher>],
    ) -> Result<Vec<Metric>, QuerierError> {
        debug!(%from, %through, ?matcher_sets, "metrics_for_label_matchers");
        // Matcher sets are flattened into one selector; all backends can
        // answer the union in a single series call.
        let matchers: Vec<LabelMatcher> = matcher_sets.iter().flatten().cloned().collect();
        let match_expr = selector_for_matchers(&matchers);

        let mut result = SeriesList::default();
        fanout(
            &self.groups,
            |_, _, target| {
                let client = self.client.clone();
                let metrics = Arc::clone(&self.metrics);
                let match_expr = match_expr.clone();
                let target = target.clone();
                async move {
                    let host = host_label(&target);
                    let start = Instant::now();
                    let result = client.series(&target, &match_expr, from, through).await;
                    metrics.observe(&host, "series", result.is_ok(), start.elapsed());
                    result
                }
            },
            |_, list| {
                result.merge(list);
                Ok(())
            },
        )
        .await?;
        Ok(result.metrics)
    }

    async fn label_values_for_label_name(&self, name: &str) -> Result<Vec<String>, QuerierError> {
        debug!(name, "label_values_for_label_name");
        let mut result = promfed_client::LabelValueList::default();
        fanout(
            &self.groups,
            |_, _, target| {
                let client = self.client.clone();
                let metrics = Arc::clone(&self.metrics);
                let name = name.to_string();
                let target = target.clone();
                async move {
                    let host = host_label(&target);
                    let start = Instant::now();
                    let result = client.label_values(&target, &name).await;
                    metrics.observe(&host, "label_values", result.is_ok(), start.elapsed());
                    result
                }
            },
            |_, list| {
                result.merge(list);
                Ok(())
            },
        )
        .await?;
        Ok(result.values)
    }
}

impl ProxyQuerier {
    /// Dropped upstream in Prometheus 2; kept unimplemented for interface
    /// parity with older engines.
    pub async fn last_sample_for_label_matchers(
        &self,
        cutoff: Timestamp,
        _matcher_sets: &[Vec<LabelMatcher>],
    ) -> Result<Vec<promfed_repr::Sample>, QuerierError> {
        debug!(%cutoff, "last_sample_for_label_matchers");
        Err(QuerierError::Unimplemented(
            "last_sample_for_label_matchers",
        ))
    }
}

#[cfg(test)]
mod tests {
    use promfed_promql::MatchOp;

    use super::*;

    #[test]
    fn selector_rendering() {
        let matchers = vec![
            LabelMatcher::new("__name__", MatchOp::Equal, "up"),
            LabelMatcher::new("job", MatchOp::Regex, "api.*"),
        ];
        assert_eq!(
            selector_for_matchers(&matchers),
            "{__name__=\"up\",job=~\"api.*\"}"
        );
    }

    #[test]
    fn close_is_a_noop() {
        struct Stub;
        #[async_trait]
        impl Querier for Stub {
            async fn query_range(
                &self,
                _: Timestamp,
                _: Timestamp,
                _: &[LabelMatcher],
            ) -> Result<Vec<SeriesIterator>, QuerierError> {
                unimplemented!()
            }
            async fn query_instant(
                &self,
                _: Timestamp,
                _: Duration,
                _: &[LabelMatcher],
            ) -> Result<Vec<SeriesIterator>, QuerierError> {
                unimplemented!()
            }
            async fn metrics_for_label_matchers(
                &self,
                _: Timestamp,
                _: Timestamp,
                _: &[Vec<LabelMatcher>],
            ) -> Result<Vec<Metric>, QuerierError> {
                unimplemented!()
            }
            async fn label_values_for_label_name(
                &self,
                _: &str,
            ) -> Result<Vec<String>, QuerierError> {
                unimplemented!()
            }
        }
        let stub = Stub;
        assert!(stub.close().is_ok());
        assert!(stub.close().is_ok());
    }
}
