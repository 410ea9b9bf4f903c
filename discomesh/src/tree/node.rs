// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! One node of the resolution tree.

use crate::endpoint::Endpoint;
use crate::instance::InstanceMap;
use crate::registry::VersionedSnapshot;
use dashmap::DashMap;
use faststr::FastStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Payload carried by a [`TreeNode`].
///
/// Early stages carry the instance map seeded from the registry snapshot;
/// the endpoint stage converts it into connectable endpoints.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    /// Live instances keyed by instance id.
    Instances(Arc<InstanceMap>),
    /// Connectable endpoints derived from instances.
    Endpoints(Arc<Vec<Endpoint>>),
}

impl NodeData {
    /// Whether the payload holds nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            NodeData::Instances(map) => map.is_empty(),
            NodeData::Endpoints(list) => list.is_empty(),
        }
    }
}

/// [`TreeNode`] wraps one narrowed view of the instance set: a group name
/// usable as a load-balancer cache key, the snapshot version it was built
/// from, an optional payload, and lazily built children keyed by branch
/// name.
///
/// Nodes are shared read-only across concurrent resolutions once published
/// into a parent's children map; only the one-shot children initialization
/// takes a node-scoped lock.
#[derive(Debug)]
pub struct TreeNode {
    name: RwLock<FastStr>,
    level: AtomicUsize,
    cache_version: u64,
    data: Option<NodeData>,
    children: DashMap<FastStr, Arc<TreeNode>>,
    children_inited: AtomicBool,
    init_lock: Mutex<()>,
}

impl TreeNode {
    /// Creates a node with no payload and no children, at version 0.
    pub fn new(name: impl Into<FastStr>) -> Self {
        Self {
            name: RwLock::new(name.into()),
            level: AtomicUsize::new(0),
            cache_version: 0,
            data: None,
            children: DashMap::new(),
            children_inited: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    /// Creates the first-level node of a resolution: name, version and
    /// instance payload all taken from the registry snapshot.
    pub fn from_snapshot(snapshot: &VersionedSnapshot) -> Self {
        Self::new(snapshot.name())
            .with_cache_version(snapshot.version())
            .with_data(NodeData::Instances(snapshot.instances().clone()))
    }

    /// Stamps the snapshot version this node was built from.
    pub fn with_cache_version(mut self, version: u64) -> Self {
        self.cache_version = version;
        self
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: NodeData) -> Self {
        self.data = Some(data);
        self
    }

    /// Group name; a branch path such as `1.0.0-2.0.0/up-instances/rest`.
    pub fn name(&self) -> FastStr {
        self.name.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Renames the node; only the orchestrator and grouping filters do this.
    pub fn set_name(&self, name: FastStr) {
        *self.name.write().unwrap_or_else(PoisonError::into_inner) = name;
    }

    /// Child name for a branch below `parent`.
    pub fn sub_name(parent: &TreeNode, group: &str) -> FastStr {
        FastStr::from(format!("{}/{}", parent.name(), group))
    }

    /// Index of the filter stage that produced this node; 0 for the
    /// snapshot-level node.
    pub fn level(&self) -> usize {
        self.level.load(Ordering::Acquire)
    }

    /// Stamps the producing stage index.
    pub fn set_level(&self, level: usize) {
        self.level.store(level, Ordering::Release);
    }

    /// Version of the snapshot this subtree was built from.
    pub fn cache_version(&self) -> u64 {
        self.cache_version
    }

    /// The payload, if any.
    pub fn data(&self) -> Option<&NodeData> {
        self.data.as_ref()
    }

    /// Instance payload shorthand.
    pub fn instances(&self) -> Option<&Arc<InstanceMap>> {
        match &self.data {
            Some(NodeData::Instances(map)) => Some(map),
            _ => None,
        }
    }

    /// Endpoint payload shorthand.
    pub fn endpoints(&self) -> Option<&[Endpoint]> {
        match &self.data {
            Some(NodeData::Endpoints(list)) => Some(list),
            _ => None,
        }
    }

    /// True iff the node carries no payload or an empty one.
    pub fn is_empty(&self) -> bool {
        self.data.as_ref().map_or(true, NodeData::is_empty)
    }

    /// Looks up a child by branch name.
    pub fn child(&self, name: &str) -> Option<Arc<TreeNode>> {
        self.children.get(name).map(|entry| entry.value().clone())
    }

    /// Publishes a child under a branch name.
    pub fn set_child(&self, name: FastStr, child: Arc<TreeNode>) {
        self.children.insert(name, child);
    }

    /// Returns the child under `name`, creating it with `create` if absent.
    pub fn child_or_create<F: FnOnce() -> TreeNode>(&self, name: FastStr, create: F) -> Arc<TreeNode> {
        self.children.entry(name).or_insert_with(|| Arc::new(create())).value().clone()
    }

    /// Runs `init` exactly once per node to populate the children map.
    ///
    /// The first caller to observe "not initialized" runs `init` under the
    /// node-scoped lock; concurrent callers block until it finishes and then
    /// proceed without re-running it. Reads of an initialized children map
    /// never take this lock.
    pub fn ensure_children<F: FnOnce()>(&self, init: F) {
        if self.children_inited.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.children_inited.load(Ordering::Relaxed) {
            return;
        }
        init();
        self.children_inited.store(true, Ordering::Release);
    }
}
