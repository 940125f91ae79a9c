// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Merging of partial query results from independent backends.
//!
//! [`merge_values`] combines two result values of the same type into one,
//! reconciling duplicate series by fingerprint. [`merge_sample_stream`]
//! reconciles two sorted sample sequences of the same series, deduplicating
//! exact timestamps and suppressing near-duplicate points produced by
//! replicated scrapes whose clocks disagree.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::time::Duration;

use crate::metric::Fingerprint;
use crate::timestamp::Timestamp;
use crate::value::{Sample, SampleStream, SampleValue, Value, ValueType};

/// The minimum temporal spacing enforced between samples emitted by
/// [`merge_sample_stream`].
///
/// Timestamps of replicated scrapes are scrape *start* times, which differ
/// between replicas by bounded skew. Without a buffer the merged series would
/// carry visually-duplicate points at close timestamps, breaking downstream
/// rate calculations. 10 seconds tolerates 5 seconds of skew on either side.
pub const ANTI_AFFINITY_BUFFER: Duration = Duration::from_secs(10);

/// An error merging two partial results.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    #[error("cannot merge values of mismatched types {left} and {right}")]
    MismatchedTypes { left: ValueType, right: ValueType },
    #[error("cannot merge sample streams of mismatched fingerprints {left} and {right}")]
    MismatchedFingerprints { left: Fingerprint, right: Fingerprint },
}

/// Combines two result values of the same type into one.
///
/// Scalars and strings carry a single point, so either backend's answer is
/// acceptable: the left operand wins if it is present (non-zero value and
/// non-zero timestamp), otherwise the right is returned. Vectors and matrices
/// accumulate left-to-right keyed by series fingerprint; all of `a`'s series
/// precede any series only `b` has, and callers must not depend on any other
/// ordering.
pub fn merge_values(a: Value, b: Value) -> Result<Value, MergeError> {
    let (left, right) = (a.value_type(), b.value_type());
    match (a, b) {
        (Value::Scalar(a), Value::Scalar(b)) => {
            if a.value != SampleValue(0.0) && a.timestamp != Timestamp::ZERO {
                Ok(Value::Scalar(a))
            } else {
                Ok(Value::Scalar(b))
            }
        }
        (Value::String(a), Value::String(b)) => {
            if !a.value.is_empty() && a.timestamp != Timestamp::ZERO {
                Ok(Value::String(a))
            } else {
                Ok(Value::String(b))
            }
        }
        (Value::Vector(a), Value::Vector(b)) => Ok(Value::Vector(merge_vectors(a, b))),
        (Value::Matrix(a), Value::Matrix(b)) => Ok(Value::Matrix(merge_matrices(a, b)?)),
        _ => Err(MergeError::MismatchedTypes { left, right }),
    }
}

fn merge_vectors(a: Vec<Sample>, b: Vec<Sample>) -> Vec<Sample> {
    let mut merged: Vec<Sample> = Vec::with_capacity(a.len() + b.len());
    let mut by_fingerprint: BTreeMap<Fingerprint, usize> = BTreeMap::new();
    for sample in a.into_iter().chain(b) {
        match by_fingerprint.entry(sample.metric.fingerprint()) {
            Entry::Vacant(entry) => {
                entry.insert(merged.len());
                merged.push(sample);
            }
            Entry::Occupied(entry) => {
                // A duplicate series only contributes its value when the one
                // already held looks missing.
                let held = &mut merged[*entry.get()];
                if held.pair.value == SampleValue(0.0) {
                    held.pair.value = sample.pair.value;
                }
            }
        }
    }
    merged
}

fn merge_matrices(
    a: Vec<SampleStream>,
    b: Vec<SampleStream>,
) -> Result<Vec<SampleStream>, MergeError> {
    let mut merged: Vec<SampleStream> = Vec::with_capacity(a.len() + b.len());
    let mut by_fingerprint: BTreeMap<Fingerprint, usize> = BTreeMap::new();
    for stream in a.into_iter().chain(b) {
        match by_fingerprint.entry(stream.metric.fingerprint()) {
            Entry::Vacant(entry) => {
                entry.insert(merged.len());
                merged.push(stream);
            }
            Entry::Occupied(entry) => {
                let index = *entry.get();
                let held = mem::take(&mut merged[index]);
                merged[index] = merge_sample_stream(held, stream)?;
            }
        }
    }
    Ok(merged)
}

/// Merges two sorted sample sequences of the same series.
///
/// Equivalent to [`merge_sample_stream_with_buffer`] with the default
/// [`ANTI_AFFINITY_BUFFER`].
pub fn merge_sample_stream(a: SampleStream, b: SampleStream) -> Result<SampleStream, MergeError> {
    merge_sample_stream_with_buffer(a, b, ANTI_AFFINITY_BUFFER)
}

/// Merges two sorted sample sequences of the same series, enforcing `buffer`
/// as the minimum spacing between emitted samples.
///
/// The inputs must be strictly ascending by timestamp and share a metric
/// fingerprint. The merge walks both sequences picking the earlier candidate
/// each step (ties go to `b`), drops candidates whose exact timestamp was
/// already emitted, and drops candidates closer than `buffer` to the last
/// emitted sample. The first accepted sample initializes the watermark.
pub fn merge_sample_stream_with_buffer(
    a: SampleStream,
    b: SampleStream,
    buffer: Duration,
) -> Result<SampleStream, MergeError> {
    let (left, right) = (a.metric.fingerprint(), b.metric.fingerprint());
    if left != right {
        return Err(MergeError::MismatchedFingerprints { left, right });
    }
    let buffer_millis = i64::try_from(buffer.as_millis()).unwrap_or(i64::MAX);

    let mut values = Vec::with_capacity(a.values.len() + b.values.len());
    let mut seen: BTreeSet<Timestamp> = BTreeSet::new();
    let mut last: Option<Timestamp> = None;
    let (mut i, mut j) = (0, 0);

    loop {
        let item = if i < a.values.len() && j < b.values.len() {
            if a.values[i].timestamp < b.values[j].timestamp {
                i += 1;
                a.values[i - 1]
            } else {
                j += 1;
                b.values[j - 1]
            }
        } else if i < a.values.len() {
            i += 1;
            a.values[i - 1]
        } else if j < b.values.len() {
            j += 1;
            b.values[j - 1]
        } else {
            break;
        };

        if seen.contains(&item.timestamp) {
            continue;
        }
        if let Some(last) = last {
            if item.timestamp.millis() - last.millis() < buffer_millis {
                continue;
            }
        }
        last = Some(item.timestamp);
        seen.insert(item.timestamp);
        values.push(item);
    }

    Ok(SampleStream {
        metric: a.metric,
        values,
    })
}
