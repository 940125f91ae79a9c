// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Samples, sample streams, and the polymorphic query result value.
//!
//! The JSON forms here are exactly those of the downstream HTTP API: a sample
//! pair is a `[<fractional seconds>, "<value>"]` tuple, a vector entry is
//! `{"metric": …, "value": …}`, and a matrix entry is
//! `{"metric": …, "values": […]}`.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeTuple, Serializer};
use serde::{Deserialize, Serialize};

use crate::metric::Metric;
use crate::timestamp::Timestamp;

/// A single sample value.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct SampleValue(pub f64);

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(timestamp, value)` pair within a sample stream.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplePair {
    pub timestamp: Timestamp,
    pub value: SampleValue,
}

impl Serialize for SamplePair {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.timestamp.as_unix_seconds())?;
        tuple.serialize_element(&self.value.to_string())?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for SamplePair {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (seconds, value) = <(f64, String)>::deserialize(deserializer)?;
        let value = value
            .parse::<f64>()
            .map_err(|e| de::Error::custom(format!("invalid sample value {:?}: {}", value, e)))?;
        Ok(SamplePair {
            timestamp: Timestamp::from_unix_seconds(seconds),
            value: SampleValue(value),
        })
    }
}

/// One series sampled at one instant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: Metric,
    #[serde(rename = "value")]
    pub pair: SamplePair,
}

impl Sample {
    pub fn new(metric: Metric, timestamp: Timestamp, value: f64) -> Sample {
        Sample {
            metric,
            pair: SamplePair {
                timestamp,
                value: SampleValue(value),
            },
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.pair.timestamp
    }

    pub fn value(&self) -> SampleValue {
        self.pair.value
    }
}

/// One series with a sorted sequence of samples.
///
/// Invariant: `values` is strictly ascending by timestamp.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStream {
    pub metric: Metric,
    pub values: Vec<SamplePair>,
}

/// A scalar result: a single number at a single instant.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Scalar {
    pub timestamp: Timestamp,
    pub value: SampleValue,
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SamplePair {
            timestamp: self.timestamp,
            value: self.value,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pair = SamplePair::deserialize(deserializer)?;
        Ok(Scalar {
            timestamp: pair.timestamp,
            value: pair.value,
        })
    }
}

/// A string result at a single instant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StringValue {
    pub timestamp: Timestamp,
    pub value: String,
}

impl Serialize for StringValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.timestamp.as_unix_seconds())?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for StringValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (seconds, value) = <(f64, String)>::deserialize(deserializer)?;
        Ok(StringValue {
            timestamp: Timestamp::from_unix_seconds(seconds),
            value,
        })
    }
}

/// The type tag of a [`Value`], observable without matching on the value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Scalar,
    String,
    Vector,
    Matrix,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Scalar => "scalar",
            ValueType::String => "string",
            ValueType::Vector => "vector",
            ValueType::Matrix => "matrix",
        };
        f.write_str(s)
    }
}

/// A query result value.
///
/// Deserialization requires the side-channel type tag of the response
/// envelope and therefore lives with the envelope decoding, not here.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(Scalar),
    String(StringValue),
    Vector(Vec<Sample>),
    Matrix(Vec<SampleStream>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Scalar(_) => ValueType::Scalar,
            Value::String(_) => ValueType::String,
            Value::Vector(_) => ValueType::Vector,
            Value::Matrix(_) => ValueType::Matrix,
        }
    }

    /// Stamps identity labels onto every series of the value.
    ///
    /// Scalars and strings carry no label sets and are unchanged. Stamped
    /// labels overwrite existing labels of the same name.
    pub fn add_label_set(&mut self, labels: &Metric) {
        match self {
            Value::Scalar(_) | Value::String(_) => (),
            Value::Vector(samples) => {
                for sample in samples {
                    for (name, value) in labels.iter() {
                        sample.metric.insert(name.clone(), value.clone());
                    }
                }
            }
            Value::Matrix(streams) => {
                for stream in streams {
                    for (name, value) in labels.iter() {
                        stream.metric.insert(name.clone(), value.clone());
                    }
                }
            }
        }
    }
}
