// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Metric identity: label sets and their fingerprints.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

/// The label under which a metric's name is stored in its label set.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// A metric identity: a mapping from label names to label values.
///
/// Two samples belong to the same logical series exactly when their metrics
/// have equal [`Fingerprint`]s. The map is ordered so that fingerprinting and
/// printing are deterministic regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metric(pub BTreeMap<String, String>);

impl Metric {
    /// Computes the stable hash identifying this label set.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hash = Fnv64::new();
        for (name, value) in &self.0 {
            hash.write(name.as_bytes());
            hash.write_byte(SEPARATOR);
            hash.write(value.as_bytes());
            hash.write_byte(SEPARATOR);
        }
        Fingerprint(hash.finish())
    }
}

impl Deref for Metric {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Metric {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(String, String)> for Metric {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Metric(iter.into_iter().collect())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.0.get(METRIC_NAME_LABEL) {
            write!(f, "{}", name)?;
        }
        write!(f, "{{")?;
        let mut first = true;
        for (name, value) in &self.0 {
            if name == METRIC_NAME_LABEL {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={:?}", name, value)?;
        }
        write!(f, "}}")
    }
}

/// A stable hash of a label set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Separates label names from values and pairs from each other while hashing.
/// `0xff` cannot occur in valid UTF-8, so no crafted label set can collide
/// with the concatenation of a different one.
const SEPARATOR: u8 = 0xff;

/// 64-bit FNV-1a.
struct Fnv64(u64);

impl Fnv64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x100_0000_01b3;

    fn new() -> Fnv64 {
        Fnv64(Self::OFFSET_BASIS)
    }

    fn write_byte(&mut self, byte: u8) {
        self.0 = (self.0 ^ u64::from(byte)).wrapping_mul(Self::PRIME);
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.write_byte(*byte);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
