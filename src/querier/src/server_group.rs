// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Server group configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use promfed_repr::Metric;

/// A named group of equivalent backends.
///
/// Every sample produced through this group is stamped with the group's
/// identity `labels` (distinguishing, say, datacenter A from datacenter B).
/// Groups are created at configuration load and are read-only for the
/// duration of any query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub name: String,
    /// Identity labels attached to every sample produced via this group.
    #[serde(default)]
    pub labels: Metric,
    /// Base URLs of the group's members, in dispatch order.
    pub targets: Vec<Url>,
}

impl ServerGroup {
    /// The ordered base URLs a fan-out dispatches to for this group.
    pub fn targets(&self) -> &[Url] {
        &self.targets
    }
}
