// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The core time-series data model for the federation proxy.
//!
//! This crate defines the types that flow between the downstream client, the
//! fan-out orchestrator, and the storage facade: label sets and their
//! fingerprints, timestamps, samples, sample streams, and the polymorphic
//! query result [`Value`]. It also owns the merge logic that reconciles
//! partial results returned by independent backends into one coherent answer.

mod merge;
mod metric;
mod timestamp;
mod value;

pub use crate::merge::{
    merge_sample_stream, merge_sample_stream_with_buffer, merge_values, MergeError,
    ANTI_AFFINITY_BUFFER,
};
pub use crate::metric::{Fingerprint, Metric};
pub use crate::timestamp::Timestamp;
pub use crate::value::{
    Sample, SamplePair, SampleStream, SampleValue, Scalar, StringValue, Value, ValueType,
};
