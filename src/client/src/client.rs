// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use serde::de::DeserializeOwned;
use url::Url;

use promfed_repr::{Timestamp, Value};

use crate::response::{Envelope, LabelValueList, QueryData, SeriesList, Status};

/// An error issuing a downstream API call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("downstream error ({error_type}): {message}")]
    Api { error_type: String, message: String },
    #[error("malformed downstream response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("downstream response carried no data")]
    MissingData,
    #[error("target URL cannot be a base")]
    CannotBeABase,
}

/// A client for the downstream metrics HTTP API.
///
/// The client is cheap to clone and carries no per-target state; the target
/// base URL is supplied per call, since every fan-out request addresses a
/// different backend.
#[derive(Clone, Debug)]
pub struct Client {
    inner: reqwest::Client,
}

impl Client {
    pub fn new(inner: reqwest::Client) -> Client {
        Client { inner }
    }

    /// Evaluates `query` at `time` against the backend at `base` and returns
    /// the typed result value.
    ///
    /// `cache_bust` becomes the `_` parameter some upstreams send to defeat
    /// intermediary caches.
    pub async fn query(
        &self,
        base: &Url,
        query: &str,
        time: Timestamp,
        cache_bust: Option<Timestamp>,
    ) -> Result<Value, Error> {
        let url = endpoint(base, &["api", "v1", "query"])?;
        let time = time.to_string();
        let mut request = self
            .inner
            .get(url)
            .query(&[("query", query), ("time", time.as_str())]);
        if let Some(bust) = cache_bust {
            let bust = bust.to_string();
            request = request.query(&[("_", bust.as_str())]);
        }
        let body = request.send().await?.error_for_status()?.bytes().await?;
        let data: QueryData = decode(&body)?;
        Ok(data.result)
    }

    /// Lists the series matching `match_expr` between `start` and `end` on
    /// the backend at `base`.
    pub async fn series(
        &self,
        base: &Url,
        match_expr: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<SeriesList, Error> {
        let url = endpoint(base, &["api", "v1", "series"])?;
        let start = start.to_string();
        let end = end.to_string();
        let body = self
            .inner
            .get(url)
            .query(&[
                ("match[]", match_expr),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        decode(&body)
    }

    /// Lists the values of label `name` on the backend at `base`.
    pub async fn label_values(&self, base: &Url, name: &str) -> Result<LabelValueList, Error> {
        let url = endpoint(base, &["api", "v1", "label", name, "values"])?;
        let body = self
            .inner
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        decode(&body)
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::CannotBeABase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    match envelope.status {
        Status::Error => Err(Error::Api {
            error_type: envelope.error_type.unwrap_or_default(),
            message: envelope.error.unwrap_or_default(),
        }),
        Status::Success => {
            let data = envelope.data.ok_or(Error::MissingData)?;
            Ok(serde_json::from_value(data)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_paths() {
        let base: Url = "http://127.0.0.1:9090".parse().unwrap();
        assert_eq!(
            endpoint(&base, &["api", "v1", "query"]).unwrap().as_str(),
            "http://127.0.0.1:9090/api/v1/query"
        );

        // A base with a path prefix keeps it.
        let base: Url = "http://127.0.0.1:9090/prom/".parse().unwrap();
        assert_eq!(
            endpoint(&base, &["api", "v1", "series"]).unwrap().as_str(),
            "http://127.0.0.1:9090/prom/api/v1/series"
        );
    }

    #[test]
    fn decode_error_envelope() {
        let body = br#"{"status": "error", "errorType": "bad_data", "error": "parse error"}"#;
        match decode::<QueryData>(body) {
            Err(Error::Api {
                error_type,
                message,
            }) => {
                assert_eq!(error_type, "bad_data");
                assert_eq!(message, "parse error");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn decode_missing_data() {
        let body = br#"{"status": "success"}"#;
        assert!(matches!(
            decode::<QueryData>(body),
            Err(Error::MissingData)
        ));
    }
}
