// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Versioned registry snapshots and the provider contract.

use crate::instance::{Instance, InstanceMap};
use dashmap::DashMap;
use faststr::FastStr;
use std::sync::Arc;

/// An immutable, named, monotonically versioned view of the instances that
/// match one microservice and version rule.
///
/// Snapshots are produced upstream (registry client, poller, test fixture)
/// and handed into the resolution pipeline as already-fetched values; the
/// pipeline performs no I/O of its own.
#[derive(Debug, Clone)]
pub struct VersionedSnapshot {
    name: FastStr,
    version: u64,
    data: Arc<InstanceMap>,
}

impl VersionedSnapshot {
    /// Creates a snapshot. `name` identifies the instance set below one
    /// microservice, conventionally the version rule (e.g. `1.0.0-2.0.0`).
    pub fn new(name: impl Into<FastStr>, version: u64, data: Arc<InstanceMap>) -> Self {
        Self { name: name.into(), version, data }
    }

    /// Cache name of this instance set.
    pub fn name(&self) -> FastStr {
        self.name.clone()
    }

    /// Monotonic version stamp; strictly increases whenever the underlying
    /// instance data changes, stable otherwise.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The instances, keyed by instance id.
    pub fn instances(&self) -> &Arc<InstanceMap> {
        &self.data
    }
}

/// Source of [`VersionedSnapshot`]s, typically backed by a remote registry
/// client with its own refresh loop.
///
/// Contract: for the same `(app_id, service_name, version_rule)` the returned
/// version strictly increases across calls whenever underlying instance data
/// changed, and is stable (same version, same data) otherwise.
pub trait SnapshotProvider: Send + Sync + 'static {
    /// Returns the current snapshot for one microservice and version rule.
    fn get_or_create(&self, app_id: &str, service_name: &str, version_rule: &str) -> VersionedSnapshot;
}

/// [`StaticRegistry`] is an in-process [`SnapshotProvider`] holding instance
/// sets put there by the application, with per-key version bumping.
///
/// Useful for tests, examples and deployments with a fixed topology, in the
/// same spirit as a fixed-list discover.
#[derive(Default)]
pub struct StaticRegistry {
    entries: DashMap<FastStr, Entry>,
}

struct Entry {
    version: u64,
    data: Arc<InstanceMap>,
}

impl StaticRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the instance set for one microservice and version rule,
    /// bumping its snapshot version.
    pub fn put<I: IntoIterator<Item = Instance>>(&self, app_id: &str, service_name: &str, version_rule: &str, instances: I) {
        let data = Arc::new(crate::instance::instance_map(instances));
        self.entries
            .entry(entry_key(app_id, service_name, version_rule))
            .and_modify(|entry| {
                entry.version += 1;
                entry.data = data.clone();
            })
            .or_insert(Entry { version: 1, data });
    }
}

impl SnapshotProvider for StaticRegistry {
    fn get_or_create(&self, app_id: &str, service_name: &str, version_rule: &str) -> VersionedSnapshot {
        let entry = self
            .entries
            .entry(entry_key(app_id, service_name, version_rule))
            .or_insert_with(|| Entry { version: 1, data: Arc::new(InstanceMap::new()) });
        VersionedSnapshot::new(FastStr::from(version_rule.to_owned()), entry.version, entry.data.clone())
    }
}

fn entry_key(app_id: &str, service_name: &str, version_rule: &str) -> FastStr {
    FastStr::from(format!("{app_id}/{service_name}/{version_rule}"))
}
