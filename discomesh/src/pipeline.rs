// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The resolution pipeline: versioned root cache plus the filter-chain
//! walk with backtracking.
//!
//! One [`Pipeline`] serves every outbound call of a process. Per call it
//! (1) checks the per-service root against the latest registry snapshot and
//! replaces it wholesale when the snapshot version advanced, (2) finds or
//! seeds the first-level node for the snapshot's instance set, and (3) walks
//! the priority-sorted filters, descending one cached tree level per stage.
//! A stage that comes up empty unwinds to the nearest rerun point and tries
//! an alternate branch instead of failing the call.

use crate::filter::Filter;
use crate::registry::{SnapshotProvider, VersionedSnapshot};
use crate::tree::{ResolveContext, ResolveRequest, TreeNode};
use dashmap::DashMap;
use faststr::FastStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Critical errors raised by the resolution pipeline.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// A filter produced no node at all. An empty node is the valid way to
    /// express "nothing survived"; returning nothing is a broken filter
    /// implementation and is never retried.
    #[error("discovery filter `{0}` produced no node")]
    BrokenFilter(&'static str),
}

/// Assembles a [`Pipeline`]: explicit filter registration, then a one-time
/// sort-and-freeze at [`PipelineBuilder::build`].
#[derive(Default)]
pub struct PipelineBuilder {
    filters: Vec<Arc<dyn Filter>>,
}

impl PipelineBuilder {
    /// Creates a builder with no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one filter.
    pub fn add_filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Registers already-shared filters, e.g. [`crate::filters::standard_filters`].
    pub fn add_filters<I: IntoIterator<Item = Arc<dyn Filter>>>(mut self, filters: I) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Sorts filters ascending by order (stable, so ties keep registration
    /// order) and freezes the chain. The built pipeline never re-sorts.
    pub fn build(self, provider: Arc<dyn SnapshotProvider>) -> Pipeline {
        let mut filters = self.filters;
        filters.sort_by_key(|filter| filter.order());
        for filter in &filters {
            info!(filter = filter.name(), order = filter.order(), enabled = filter.enabled(), "discovery filter registered");
        }
        Pipeline {
            provider,
            filters,
            roots: DashMap::new(),
            root_lock: Mutex::new(()),
        }
    }
}

/// [`Pipeline`] narrows a versioned instance snapshot down to the subset
/// usable for one outbound call, caching every intermediate narrowing step
/// in a tree keyed by the snapshot version.
///
/// All traversal is lock-free over published nodes; the only locks are the
/// pipeline-scoped one around O(1) root replacement and the per-node one
/// around first-time children initialization.
pub struct Pipeline {
    provider: Arc<dyn SnapshotProvider>,
    filters: Vec<Arc<dyn Filter>>,
    roots: DashMap<(FastStr, FastStr), Arc<TreeNode>>,
    root_lock: Mutex<()>,
}

impl Pipeline {
    /// Resolves the usable instance view for one outbound call, fetching the
    /// current snapshot from the provider.
    ///
    /// The returned node's payload is whatever the last filter produced
    /// (endpoints with the stock chain) and its name is a stable cache key
    /// for the load balancer sitting downstream.
    pub fn resolve(&self, request: ResolveRequest) -> Result<Arc<TreeNode>, ResolveError> {
        let snapshot = self
            .provider
            .get_or_create(&request.app_id, &request.service_name, &request.version_rule);
        self.resolve_with(snapshot, request)
    }

    /// Resolves against an already-fetched snapshot.
    pub fn resolve_with(&self, snapshot: VersionedSnapshot, request: ResolveRequest) -> Result<Arc<TreeNode>, ResolveError> {
        let root = self.get_or_create_root(&request.app_id, &request.service_name, &snapshot);
        let parent = root.child_or_create(snapshot.name(), || TreeNode::from_snapshot(&snapshot));
        let mut ctx = ResolveContext::new(request);
        self.run_filters(&mut ctx, parent)
    }

    /// Root cache maintenance with double-checked locking: readers of a
    /// non-expired root never block, replacement happens at most once per
    /// version bump, and a caller whose snapshot is already older than the
    /// shared root gets a disposable unshared root so stale-version children
    /// are never attached into a newer tree.
    fn get_or_create_root(&self, app_id: &FastStr, service_name: &FastStr, snapshot: &VersionedSnapshot) -> Arc<TreeNode> {
        let key = (app_id.clone(), service_name.clone());
        if let Some(root) = self.roots.get(&key).map(|entry| entry.value().clone()) {
            if root.cache_version() == snapshot.version() {
                return root;
            }
        }

        let _guard = self.root_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.roots.get(&key).map(|entry| entry.value().clone()) {
            Some(root) if root.cache_version() == snapshot.version() => root,
            Some(root) if root.cache_version() > snapshot.version() => {
                // A faster caller already advanced the shared root past this
                // snapshot. Minimal-probability race; serve this call from a
                // throwaway root.
                Arc::new(TreeNode::new("").with_cache_version(snapshot.version()))
            }
            _ => {
                // Not initialized yet, or the snapshot is newer than the
                // root: replace the whole generation.
                let root = Arc::new(TreeNode::new("").with_cache_version(snapshot.version()));
                self.roots.insert(key, root.clone());
                root
            }
        }
    }

    /// Walks the filter chain, backtracking on empty results.
    fn run_filters(&self, ctx: &mut ResolveContext, mut parent: Arc<TreeNode>) -> Result<Arc<TreeNode>, ResolveError> {
        let mut idx = 0;
        while idx < self.filters.len() {
            let filter = &self.filters[idx];
            if !filter.enabled() {
                idx += 1;
                continue;
            }
            ctx.set_current(parent.clone());

            let Some(child) = filter.resolve(ctx, &parent) else {
                return Err(ResolveError::BrokenFilter(filter.name()));
            };

            child.set_level(idx + 1);
            if !filter.grouping() {
                child.set_name(parent.name());
            }

            if child.is_empty() {
                if let Some(rerun) = ctx.pop_rerun() {
                    idx = rerun.level();
                    parent = rerun;
                    continue;
                }
                // No rerun point left: keep going with the empty child. A
                // later filter may still synthesize instances from elsewhere
                // (static configuration, domain names).
                debug!(filter = filter.name(), group = child.name().as_str(), "stage empty with no rerun point");
            }

            parent = child;
            idx += 1;
        }
        Ok(parent)
    }

    #[cfg(test)]
    fn root(&self, app_id: &str, service_name: &str) -> Option<Arc<TreeNode>> {
        self.roots
            .get(&(FastStr::from(app_id.to_owned()), FastStr::from(service_name.to_owned())))
            .map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::{Pipeline, PipelineBuilder, ResolveError};
    use crate::filter::{Filter, Group, GroupingFilter};
    use crate::filters::{standard_filters, EndpointFilter, InstanceStatusFilter, ZoneAwareFilter};
    use crate::instance::{instance_map, Instance, InstanceStatus};
    use crate::registry::{SnapshotProvider, StaticRegistry, VersionedSnapshot};
    use crate::tree::{NodeData, ResolveContext, ResolveRequest, TreeNode};
    use assert_matches::assert_matches;
    use faststr::FastStr;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request() -> ResolveRequest {
        ResolveRequest::new("app", "svc", "latest")
    }

    fn snapshot(name: &str, version: u64, instances: Vec<Instance>) -> VersionedSnapshot {
        VersionedSnapshot::new(FastStr::from(name.to_owned()), version, Arc::new(instance_map(instances)))
    }

    /// Ad-hoc stage: groups under a fixed key, or passes the parent's data
    /// through unchanged.
    struct GroupOrPass {
        group: Option<&'static str>,
        order: i32,
    }

    impl Filter for GroupOrPass {
        fn name(&self) -> &'static str {
            "group-or-pass"
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn grouping(&self) -> bool {
            self.group.is_some()
        }

        fn resolve(&self, _ctx: &mut ResolveContext, parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>> {
            let mut child = match self.group {
                Some(group) => TreeNode::new(TreeNode::sub_name(parent, group)),
                None => TreeNode::new(parent.name()),
            };
            if let Some(data) = parent.data() {
                child = child.with_data(data.clone());
            }
            Some(Arc::new(child.with_cache_version(parent.cache_version())))
        }
    }

    #[test]
    fn test_name_accumulates_only_at_grouping_stages() {
        // Equal orders: the stable sort must keep registration order.
        let pipeline = PipelineBuilder::new()
            .add_filter(GroupOrPass { group: Some("g1"), order: 0 })
            .add_filter(GroupOrPass { group: None, order: 0 })
            .add_filter(GroupOrPass { group: Some("g2"), order: 0 })
            .add_filter(GroupOrPass { group: None, order: 0 })
            .build(Arc::new(StaticRegistry::new()));

        let result = pipeline
            .resolve_with(snapshot("1.0.0-2.0.0", 1, vec![Instance::new("i1")]), ResolveRequest::new("app", "svc", "1.0.0-2.0.0"))
            .unwrap();
        assert_eq!(result.name().as_str(), "1.0.0-2.0.0/g1/g2");
        assert_eq!(result.level(), 4);
    }

    struct Broken;

    impl Filter for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn order(&self) -> i32 {
            0
        }

        fn resolve(&self, _ctx: &mut ResolveContext, _parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>> {
            None
        }
    }

    #[test]
    fn test_filter_without_node_is_a_contract_violation() {
        let pipeline = PipelineBuilder::new().add_filter(Broken).build(Arc::new(StaticRegistry::new()));
        let result = pipeline.resolve_with(snapshot("latest", 1, vec![Instance::new("i1")]), request());
        assert_matches!(result, Err(ResolveError::BrokenFilter("broken")));
    }

    /// First visit yields a branch that the next stage rejects; the revisit
    /// after backtracking yields the branch that survives.
    struct TwoTryGroup;

    impl Filter for TwoTryGroup {
        fn name(&self) -> &'static str {
            "two-try"
        }

        fn order(&self) -> i32 {
            0
        }

        fn grouping(&self) -> bool {
            true
        }

        fn resolve(&self, ctx: &mut ResolveContext, parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>> {
            let id = if ctx.param::<usize>("step").is_none() {
                ctx.push_rerun();
                ctx.put_param("step", 1_usize);
                "first"
            } else {
                "second"
            };
            let node = TreeNode::new(TreeNode::sub_name(parent, id))
                .with_cache_version(parent.cache_version())
                .with_data(NodeData::Instances(Arc::new(instance_map(vec![Instance::new(id)]))));
            Some(Arc::new(node))
        }
    }

    struct RejectFirst;

    impl Filter for RejectFirst {
        fn name(&self) -> &'static str {
            "reject-first"
        }

        fn order(&self) -> i32 {
            1
        }

        fn resolve(&self, _ctx: &mut ResolveContext, parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>> {
            let mut child = TreeNode::new(parent.name()).with_cache_version(parent.cache_version());
            match parent.instances() {
                Some(instances) if !instances.contains_key("first") => {
                    child = child.with_data(NodeData::Instances(instances.clone()));
                }
                _ => {}
            }
            Some(Arc::new(child))
        }
    }

    #[test]
    fn test_empty_stage_reruns_from_alternate_branch() {
        let pipeline = PipelineBuilder::new().add_filter(TwoTryGroup).add_filter(RejectFirst).build(Arc::new(StaticRegistry::new()));
        let result = pipeline.resolve_with(snapshot("latest", 1, vec![Instance::new("i1")]), request()).unwrap();
        assert!(result.instances().unwrap().contains_key("second"));
        assert_eq!(result.name().as_str(), "latest/second");
    }

    #[test]
    fn test_empty_result_without_rerun_falls_through() {
        let pipeline = PipelineBuilder::new()
            .add_filter(GroupOrPass { group: Some("g1"), order: 0 })
            .build(Arc::new(StaticRegistry::new()));
        let result = pipeline.resolve_with(snapshot("latest", 1, vec![]), request()).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.name().as_str(), "latest/g1");
    }

    struct CountingLogic {
        splits: Arc<AtomicUsize>,
    }

    impl Group for CountingLogic {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn order(&self) -> i32 {
            0
        }

        fn split(&self, _ctx: &mut ResolveContext, parent: &TreeNode) -> HashMap<FastStr, NodeData> {
            self.splits.fetch_add(1, Ordering::SeqCst);
            let mut branches = HashMap::new();
            if let Some(instances) = parent.instances() {
                branches.insert(FastStr::from_static_str("g"), NodeData::Instances(instances.clone()));
            }
            branches
        }

        fn pick(&self, _ctx: &mut ResolveContext, _parent: &TreeNode) -> FastStr {
            FastStr::from_static_str("g")
        }
    }

    #[test]
    fn test_unexpired_root_never_reclassifies() {
        let splits = Arc::new(AtomicUsize::new(0));
        let pipeline = PipelineBuilder::new()
            .add_filter(GroupingFilter::new(CountingLogic { splits: splits.clone() }))
            .build(Arc::new(StaticRegistry::new()));

        let snap = snapshot("latest", 1, vec![Instance::new("i1")]);
        let first = pipeline.resolve_with(snap.clone(), request()).unwrap();
        let second = pipeline.resolve_with(snap, request()).unwrap();
        assert_eq!(splits.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_root_replaced_monotonically() {
        let registry = Arc::new(StaticRegistry::new());
        let pipeline = PipelineBuilder::new().add_filters(standard_filters(None)).build(registry.clone());

        registry.put("app", "svc", "latest", vec![Instance::new("i1").with_endpoint("rest://10.0.0.1:8080")]);
        pipeline.resolve(request()).unwrap();
        assert_eq!(pipeline.root("app", "svc").unwrap().cache_version(), 1);

        registry.put("app", "svc", "latest", vec![Instance::new("i2").with_endpoint("rest://10.0.0.2:8080")]);
        pipeline.resolve(request()).unwrap();
        let advanced = pipeline.root("app", "svc").unwrap();
        assert_eq!(advanced.cache_version(), 2);

        // Same version again: the root must not regress or be rebuilt.
        pipeline.resolve(request()).unwrap();
        assert!(Arc::ptr_eq(&advanced, &pipeline.root("app", "svc").unwrap()));
    }

    #[test]
    fn test_stale_snapshot_gets_throwaway_root() {
        let pipeline = PipelineBuilder::new().build(Arc::new(StaticRegistry::new()));

        pipeline.resolve_with(snapshot("latest", 5, vec![Instance::new("i5")]), request()).unwrap();
        let shared = pipeline.root("app", "svc").unwrap();
        assert_eq!(shared.cache_version(), 5);

        // An older snapshot must not attach children into the newer tree.
        let stale = pipeline.resolve_with(snapshot("stale-rule", 3, vec![Instance::new("i3")]), request()).unwrap();
        assert_eq!(stale.cache_version(), 3);
        assert!(pipeline.root("app", "svc").unwrap().child("stale-rule").is_none());
        assert!(Arc::ptr_eq(&shared, &pipeline.root("app", "svc").unwrap()));
    }

    #[test]
    fn test_stock_chain_serves_up_instances_only() {
        let registry = Arc::new(StaticRegistry::new());
        registry.put(
            "app",
            "svc",
            "latest",
            vec![
                Instance::new("i1").with_endpoint("rest://10.0.0.1:8080"),
                Instance::new("i2").with_status(InstanceStatus::Down).with_endpoint("rest://10.0.0.2:8080"),
                Instance::new("i3").with_endpoint("rest://10.0.0.3:8080"),
            ],
        );
        let pipeline = PipelineBuilder::new().add_filters(standard_filters(None)).build(registry);

        let result = pipeline.resolve(request().with_transport("rest")).unwrap();
        let endpoints = result.endpoints().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert!(endpoints.iter().all(|endpoint| endpoint.instance.instance_id.as_str() != "i2"));
        assert_eq!(result.name().as_str(), "latest/up-instances/rest");
    }

    #[test]
    fn test_empty_snapshot_resolves_to_empty_without_error() {
        let pipeline = PipelineBuilder::new().add_filters(standard_filters(None)).build(Arc::new(StaticRegistry::new()));
        let result = pipeline.resolve(request()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_disabled_filter_consumes_no_level() {
        let registry = Arc::new(StaticRegistry::new());
        registry.put("app", "svc", "latest", vec![Instance::new("i1").with_status(InstanceStatus::Down).with_endpoint("rest://10.0.0.1:8080")]);
        let pipeline = PipelineBuilder::new()
            .add_filter(GroupingFilter::new(InstanceStatusFilter::new(false)))
            .add_filter(GroupingFilter::new(EndpointFilter))
            .build(registry);

        // With the status stage disabled, down instances stay visible.
        let result = pipeline.resolve(request().with_transport("rest")).unwrap();
        assert_eq!(result.endpoints().unwrap().len(), 1);
        assert_eq!(result.name().as_str(), "latest/rest");
        assert_eq!(result.level(), 2);
    }

    #[test]
    fn test_zone_widens_when_transport_missing_nearby() {
        let registry = Arc::new(StaticRegistry::new());
        registry.put(
            "app",
            "svc",
            "latest",
            vec![
                Instance::new("near").in_zone("eu-1", "eu-1a").with_endpoint("rest://10.0.0.1:8080"),
                Instance::new("far").in_zone("eu-1", "eu-1b").with_endpoint("grpc://10.0.0.2:50051"),
            ],
        );
        let pipeline = PipelineBuilder::new().add_filters(standard_filters(Some(("eu-1", "eu-1a")))).build(registry);

        // The same-zone instance has no grpc endpoint; resolution must
        // backtrack at the endpoint stage and widen to the same region.
        let result = pipeline.resolve(request().with_transport("grpc")).unwrap();
        let endpoints = result.endpoints().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].instance.instance_id.as_str(), "far");
        assert_eq!(result.name().as_str(), "latest/up-instances/same-region/grpc");
    }

    #[test]
    fn test_repeated_resolution_is_deterministic() {
        let registry = Arc::new(StaticRegistry::new());
        registry.put(
            "app",
            "svc",
            "latest",
            vec![
                Instance::new("i1").with_endpoint("rest://10.0.0.1:8080"),
                Instance::new("i2").with_endpoint("rest://10.0.0.2:8080"),
            ],
        );
        let pipeline = PipelineBuilder::new().add_filters(standard_filters(None)).build(registry);

        let first = pipeline.resolve(request().with_transport("rest")).unwrap();
        let second = pipeline.resolve(request().with_transport("rest")).unwrap();
        assert_eq!(first.data(), second.data());
        assert_eq!(first.name(), second.name());
    }

    #[test]
    fn test_resolve_uses_provider_snapshot() {
        let registry = Arc::new(StaticRegistry::new());
        registry.put("app", "svc", "1.x", vec![Instance::new("i1").with_endpoint("rest://10.0.0.1:8080")]);
        let pipeline = PipelineBuilder::new().build(registry);

        let result = pipeline.resolve(ResolveRequest::new("app", "svc", "1.x")).unwrap();
        assert_eq!(result.name().as_str(), "1.x");
        assert_eq!(result.instances().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_resolutions_share_one_classification() {
        let splits = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(StaticRegistry::new());
        registry.put("app", "svc", "latest", vec![Instance::new("i1")]);
        let pipeline = Arc::new(
            PipelineBuilder::new()
                .add_filter(GroupingFilter::new(CountingLogic { splits: splits.clone() }))
                .build(registry),
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = pipeline.clone();
                std::thread::spawn(move || pipeline.resolve(ResolveRequest::new("app", "svc", "latest")).unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        assert_eq!(splits.load(Ordering::SeqCst), 1);
        for result in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], result));
        }
    }

    #[test]
    fn test_zone_only_remote_instances_fall_back_to_all() {
        let registry = Arc::new(StaticRegistry::new());
        registry.put("app", "svc", "latest", vec![Instance::new("remote").in_zone("us-2", "us-2a").with_endpoint("rest://10.1.0.1:8080")]);
        let pipeline = PipelineBuilder::new()
            .add_filter(GroupingFilter::new(ZoneAwareFilter::new("eu-1", "eu-1a")))
            .add_filter(GroupingFilter::new(EndpointFilter))
            .build(registry);

        let result = pipeline.resolve(request().with_transport("rest")).unwrap();
        assert_eq!(result.endpoints().unwrap().len(), 1);
        assert_eq!(result.name().as_str(), "latest/all/rest");
    }
}
