// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Projection of merged result values into per-series iterators.

use promfed_repr::{Metric, SamplePair, Value};

/// Iterates the samples of one series of a merged result.
#[derive(Debug)]
pub struct SeriesIterator {
    metric: Metric,
    values: std::vec::IntoIter<SamplePair>,
}

impl SeriesIterator {
    fn new(metric: Metric, values: Vec<SamplePair>) -> SeriesIterator {
        SeriesIterator {
            metric,
            values: values.into_iter(),
        }
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }
}

impl Iterator for SeriesIterator {
    type Item = SamplePair;

    fn next(&mut self) -> Option<SamplePair> {
        self.values.next()
    }
}

/// Produces one iterator per series of `value`.
///
/// A vector yields one single-sample iterator per entry and a scalar yields
/// one metric-less iterator; a string result has no sample representation and
/// yields nothing.
pub fn iterators_for_value(value: Value) -> Vec<SeriesIterator> {
    match value {
        Value::Matrix(streams) => streams
            .into_iter()
            .map(|stream| SeriesIterator::new(stream.metric, stream.values))
            .collect(),
        Value::Vector(samples) => samples
            .into_iter()
            .map(|sample| SeriesIterator::new(sample.metric, vec![sample.pair]))
            .collect(),
        Value::Scalar(scalar) => vec![SeriesIterator::new(
            Metric::default(),
            vec![SamplePair {
                timestamp: scalar.timestamp,
                value: scalar.value,
            }],
        )],
        Value::String(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use promfed_repr::{Sample, SampleStream, SampleValue, Scalar, StringValue, Timestamp};

    use super::*;

    fn metric(pairs: &[(&str, &str)]) -> Metric {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn matrix_projects_one_iterator_per_series() {
        let value = Value::Matrix(vec![
            SampleStream {
                metric: metric(&[("job", "x")]),
                values: vec![
                    SamplePair {
                        timestamp: Timestamp::from_millis(0),
                        value: SampleValue(1.0),
                    },
                    SamplePair {
                        timestamp: Timestamp::from_millis(15_000),
                        value: SampleValue(2.0),
                    },
                ],
            },
            SampleStream {
                metric: metric(&[("job", "y")]),
                values: Vec::new(),
            },
        ]);
        let mut iterators = iterators_for_value(value);
        assert_eq!(iterators.len(), 2);
        assert_eq!(iterators[0].metric(), &metric(&[("job", "x")]));
        assert_eq!(iterators[0].by_ref().count(), 2);
        assert_eq!(iterators[1].by_ref().count(), 0);
    }

    #[test]
    fn vector_projects_single_sample_iterators() {
        let value = Value::Vector(vec![Sample::new(
            metric(&[("job", "x")]),
            Timestamp::from_millis(10),
            5.0,
        )]);
        let mut iterators = iterators_for_value(value);
        assert_eq!(iterators.len(), 1);
        let pair = iterators[0].next().unwrap();
        assert_eq!(pair.value, SampleValue(5.0));
        assert_eq!(iterators[0].next(), None);
    }

    #[test]
    fn scalar_and_string_projections() {
        let scalar = Value::Scalar(Scalar {
            timestamp: Timestamp::from_millis(10),
            value: SampleValue(3.0),
        });
        let iterators = iterators_for_value(scalar);
        assert_eq!(iterators.len(), 1);
        assert!(iterators[0].metric().is_empty());

        let string = Value::String(StringValue::default());
        assert!(iterators_for_value(string).is_empty());
    }
}
