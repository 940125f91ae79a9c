// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Instrumentation for downstream calls.

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, Registry};
use url::Url;

/// Metrics kept by the querier, registered against an injected registry so
/// the process owns registration, not this crate.
#[derive(Clone)]
pub struct QuerierMetrics {
    /// Wall-clock duration of a single downstream call, from dispatch to
    /// response, labeled by `{host, call, status}`. Observed by the worker
    /// that issued the call.
    pub requests: HistogramVec,
}

impl QuerierMetrics {
    pub fn register_into(registry: &Registry) -> Result<QuerierMetrics, prometheus::Error> {
        let requests = HistogramVec::new(
            HistogramOpts::new(
                "proxy_querier_request",
                "Duration of proxy querier calls to downstream servers.",
            ),
            &["host", "call", "status"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        Ok(QuerierMetrics { requests })
    }

    pub(crate) fn observe(&self, host: &str, call: &str, success: bool, elapsed: Duration) {
        let status = if success { "success" } else { "error" };
        self.requests
            .with_label_values(&[host, call, status])
            .observe(elapsed.as_secs_f64());
    }
}

/// The `host` metric label for a target: `host:port` when a port is present.
pub(crate) fn host_label(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_observes() {
        let registry = Registry::new();
        let metrics = QuerierMetrics::register_into(&registry).unwrap();
        metrics.observe("prom-0:9090", "query", true, Duration::from_millis(25));
        metrics.observe("prom-0:9090", "query", false, Duration::from_millis(50));

        let families = registry.gather();
        let family = families
            .iter()
            .find(|family| family.get_name() == "proxy_querier_request")
            .unwrap();
        assert_eq!(family.get_metric().len(), 2);
    }

    #[test]
    fn host_labels() {
        let url: Url = "http://prom-0.east:9090/prom".parse().unwrap();
        assert_eq!(host_label(&url), "prom-0.east:9090");
        let url: Url = "http://prom-0.east".parse().unwrap();
        assert_eq!(host_label(&url), "prom-0.east");
    }
}
