// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Response envelopes of the downstream HTTP API and the accumulators for
//! list-shaped results.

use std::collections::BTreeSet;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use promfed_repr::{Fingerprint, Metric, Sample, SampleStream, Scalar, StringValue, Value, ValueType};

/// The status field of a response envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// The raw response envelope, before `data` is given a concrete type.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub status: Status,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default, rename = "errorType")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The data of a query response: a result value and its type tag.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryData {
    pub result_type: ValueType,
    pub result: Value,
}

impl Serialize for QueryData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut data = serializer.serialize_struct("QueryData", 2)?;
        data.serialize_field("resultType", &self.result_type)?;
        data.serialize_field("result", &self.result)?;
        data.end()
    }
}

impl<'de> Deserialize<'de> for QueryData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "resultType")]
            result_type: ValueType,
            result: serde_json::Value,
        }

        let raw = Raw::deserialize(deserializer)?;
        let result = match raw.result_type {
            ValueType::Scalar => Value::Scalar(
                serde_json::from_value::<Scalar>(raw.result).map_err(de::Error::custom)?,
            ),
            ValueType::String => Value::String(
                serde_json::from_value::<StringValue>(raw.result).map_err(de::Error::custom)?,
            ),
            ValueType::Vector => Value::Vector(
                serde_json::from_value::<Vec<Sample>>(raw.result).map_err(de::Error::custom)?,
            ),
            ValueType::Matrix => Value::Matrix(
                serde_json::from_value::<Vec<SampleStream>>(raw.result)
                    .map_err(de::Error::custom)?,
            ),
        };
        Ok(QueryData {
            result_type: raw.result_type,
            result,
        })
    }
}

/// The result of a `series` call: a set of metric identities without sample
/// data.
///
/// Semantic equality is by fingerprint; insertion order is preserved but
/// carries no meaning.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesList {
    pub metrics: Vec<Metric>,
}

impl SeriesList {
    /// Folds another partial series list into this one.
    ///
    /// Union by fingerprint, first seen wins. Commutative and associative as
    /// a set operation; callers must not assume any arrival order.
    pub fn merge(&mut self, other: SeriesList) {
        let mut seen: BTreeSet<Fingerprint> =
            self.metrics.iter().map(|metric| metric.fingerprint()).collect();
        for metric in other.metrics {
            if seen.insert(metric.fingerprint()) {
                self.metrics.push(metric);
            }
        }
    }
}

/// The result of a `label/<name>/values` call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelValueList {
    pub values: Vec<String>,
}

impl LabelValueList {
    /// Folds another partial label-value list into this one: union by string
    /// equality, first seen wins.
    pub fn merge(&mut self, other: LabelValueList) {
        let mut seen: BTreeSet<String> = self.values.iter().cloned().collect();
        for value in other.values {
            if seen.insert(value.clone()) {
                self.values.push(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use promfed_repr::{SamplePair, SampleValue, Timestamp};

    use super::*;

    fn metric(pairs: &[(&str, &str)]) -> Metric {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn decodes_vector_data() {
        let json = r#"{
            "resultType": "vector",
            "result": [
                {"metric": {"__name__": "up", "job": "prometheus"}, "value": [1507412244.663, "1"]}
            ]
        }"#;
        let data: QueryData = serde_json::from_str(json).unwrap();
        assert_eq!(data.result_type, ValueType::Vector);
        let Value::Vector(samples) = &data.result else {
            panic!("expected vector")
        };
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value(), SampleValue(1.0));
    }

    #[test]
    fn decodes_matrix_data() {
        let json = r#"{
            "resultType": "matrix",
            "result": [
                {"metric": {"__name__": "up"}, "values": [[0, "1"], [15, "2"]]}
            ]
        }"#;
        let data: QueryData = serde_json::from_str(json).unwrap();
        assert_eq!(data.result_type, ValueType::Matrix);
        let Value::Matrix(streams) = &data.result else {
            panic!("expected matrix")
        };
        assert_eq!(
            streams[0].values,
            vec![
                SamplePair {
                    timestamp: Timestamp::ZERO,
                    value: SampleValue(1.0)
                },
                SamplePair {
                    timestamp: Timestamp::from_millis(15_000),
                    value: SampleValue(2.0)
                },
            ]
        );
    }

    #[test]
    fn decodes_scalar_and_string_data() {
        let data: QueryData =
            serde_json::from_str(r#"{"resultType": "scalar", "result": [100.5, "3.5"]}"#).unwrap();
        assert_eq!(
            data.result,
            Value::Scalar(Scalar {
                timestamp: Timestamp::from_millis(100_500),
                value: SampleValue(3.5),
            })
        );

        let data: QueryData =
            serde_json::from_str(r#"{"resultType": "string", "result": [100, "hello"]}"#).unwrap();
        assert_eq!(
            data.result,
            Value::String(StringValue {
                timestamp: Timestamp::from_millis(100_000),
                value: "hello".into(),
            })
        );
    }

    #[test]
    fn rejects_type_tag_disagreement() {
        let json = r#"{"resultType": "vector", "result": [100, "3.5"]}"#;
        assert!(serde_json::from_str::<QueryData>(json).is_err());
    }

    #[test]
    fn query_data_round_trips() {
        let data = QueryData {
            result_type: ValueType::Vector,
            result: Value::Vector(vec![Sample::new(
                metric(&[("__name__", "up")]),
                Timestamp::from_millis(1000),
                1.0,
            )]),
        };
        let json = serde_json::to_string(&data).unwrap();
        let decoded: QueryData = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn series_list_union_is_idempotent() {
        let mut list = SeriesList {
            metrics: vec![metric(&[("job", "x")]), metric(&[("job", "y")])],
        };
        let copy = list.clone();
        list.merge(copy.clone());
        assert_eq!(list, copy);

        list.merge(SeriesList {
            metrics: vec![metric(&[("job", "z")]), metric(&[("job", "x")])],
        });
        assert_eq!(
            list.metrics,
            vec![
                metric(&[("job", "x")]),
                metric(&[("job", "y")]),
                metric(&[("job", "z")]),
            ]
        );
    }

    #[test]
    fn label_value_list_union_is_idempotent() {
        let mut list = LabelValueList {
            values: vec!["a".into(), "b".into()],
        };
        let copy = list.clone();
        list.merge(copy.clone());
        assert_eq!(list, copy);

        list.merge(LabelValueList {
            values: vec!["b".into(), "c".into()],
        });
        assert_eq!(list.values, vec!["a", "b", "c"]);
    }
}
