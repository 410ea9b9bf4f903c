// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Registry-side view of one running service process.

use faststr::FastStr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Instances keyed by instance id, as delivered by a registry snapshot.
pub type InstanceMap = HashMap<FastStr, Arc<Instance>>;

/// Running state of an instance as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Ready to accept traffic.
    #[default]
    Up,
    /// Registered but still warming up.
    Starting,
    /// Known to be unavailable.
    Down,
    /// Administratively removed from rotation.
    OutOfService,
}

/// [`Instance`] is one running, addressable process of a microservice.
///
/// The registry hands instances in wholesale as part of a
/// [`VersionedSnapshot`](crate::registry::VersionedSnapshot); this library
/// never mutates them, it only narrows and regroups the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Registry-assigned unique id.
    pub instance_id: FastStr,
    /// Running state; only [`InstanceStatus::Up`] instances are callable.
    pub status: InstanceStatus,
    /// Advertised endpoint URIs, e.g. `rest://10.0.0.3:8080` or
    /// `grpc://10.0.0.3:50051?sslEnabled=true`.
    pub endpoints: Vec<FastStr>,
    /// Deployment region, if the registry reports one.
    pub region: Option<FastStr>,
    /// Availability zone inside the region.
    pub zone: Option<FastStr>,
    /// Free-form instance properties, e.g. `{"env": "production"}`.
    pub tags: HashMap<FastStr, FastStr>,
}

impl Instance {
    /// Creates an `Up` instance with no endpoints, no placement and no tags.
    pub fn new(instance_id: impl Into<FastStr>) -> Self {
        Self {
            instance_id: instance_id.into(),
            status: InstanceStatus::Up,
            endpoints: Vec::new(),
            region: None,
            zone: None,
            tags: HashMap::new(),
        }
    }

    /// Sets the running state.
    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    /// Appends one advertised endpoint URI.
    pub fn with_endpoint(mut self, uri: impl Into<FastStr>) -> Self {
        self.endpoints.push(uri.into());
        self
    }

    /// Sets region and availability zone.
    pub fn in_zone(mut self, region: impl Into<FastStr>, zone: impl Into<FastStr>) -> Self {
        self.region = Some(region.into());
        self.zone = Some(zone.into());
        self
    }

    /// Inserts one instance property.
    pub fn with_tag(mut self, key: impl Into<FastStr>, value: impl Into<FastStr>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Collects instances into an [`InstanceMap`] keyed by instance id.
pub fn instance_map<I: IntoIterator<Item = Instance>>(instances: I) -> InstanceMap {
    instances.into_iter().map(|i| (i.instance_id.clone(), Arc::new(i))).collect()
}

#[cfg(test)]
mod tests {
    use super::{instance_map, Instance, InstanceStatus};

    #[test]
    fn test_builder_defaults() {
        let instance = Instance::new("i1");
        assert_eq!(instance.status, InstanceStatus::Up);
        assert!(instance.endpoints.is_empty());
        assert!(instance.region.is_none());
    }

    #[test]
    fn test_instance_map_keys_by_id() {
        let map = instance_map(vec![Instance::new("i1"), Instance::new("i2").with_status(InstanceStatus::Down)]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["i2"].status, InstanceStatus::Down);
    }
}
