// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The pluggable filter contract and the two reusable filter shapes.
//!
//! A filter is either *refining* (narrows the instance set within the same
//! group) or *grouping* (fans the set out into named branches). Both shapes
//! are provided as generic adapters over small strategy traits, so concrete
//! filters only write their classification logic and inherit the caching
//! discipline: children of a node are computed at most once and shared by
//! every later resolution that walks the same branch.

use crate::tree::{NodeData, ResolveContext, TreeNode};
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;

/// A pipeline stage. Stateless across calls; one instance serves every
/// concurrent resolution.
pub trait Filter: Send + Sync {
    /// Stable name used in logs and broken-filter errors.
    fn name(&self) -> &'static str;

    /// Priority; filters execute in ascending order, ties broken by
    /// registration order.
    fn order(&self) -> i32;

    /// Disabled filters are skipped entirely and do not consume a tree
    /// level.
    fn enabled(&self) -> bool {
        true
    }

    /// Whether this stage renames nodes to its branch key. Non-grouping
    /// children keep the parent's name so downstream load-balancer caches
    /// see a stable key across refining-only stages.
    fn grouping(&self) -> bool {
        false
    }

    /// Produces the child node for the current resolution.
    ///
    /// Must never return `None`: an empty node is the valid way to express
    /// "nothing survived this stage", while `None` is treated by the
    /// pipeline as a broken implementation and aborts the call.
    fn resolve(&self, ctx: &mut ResolveContext, parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>>;
}

/// Classification logic of a refining filter: derives one narrowed instance
/// set from the parent.
pub trait Refine: Send + Sync + 'static {
    /// See [`Filter::name`].
    fn name(&self) -> &'static str;

    /// See [`Filter::order`].
    fn order(&self) -> i32;

    /// See [`Filter::enabled`].
    fn enabled(&self) -> bool {
        true
    }

    /// Derives the refined payload. `None` means the refinement keeps
    /// nothing; the stage then yields an empty node.
    fn refine(&self, ctx: &mut ResolveContext, parent: &TreeNode) -> Option<NodeData>;
}

/// Adapter turning a [`Refine`] into a [`Filter`].
///
/// The refined result is cached as a single child under the filter's name;
/// the child keeps the parent's group name.
pub struct RefiningFilter<R> {
    logic: R,
}

impl<R: Refine> RefiningFilter<R> {
    /// Wraps refinement logic into a pipeline stage.
    pub fn new(logic: R) -> Self {
        Self { logic }
    }
}

impl<R: Refine> Filter for RefiningFilter<R> {
    fn name(&self) -> &'static str {
        self.logic.name()
    }

    fn order(&self) -> i32 {
        self.logic.order()
    }

    fn enabled(&self) -> bool {
        self.logic.enabled()
    }

    fn resolve(&self, ctx: &mut ResolveContext, parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>> {
        parent.ensure_children(|| {
            let mut child = TreeNode::new(parent.name()).with_cache_version(parent.cache_version());
            if let Some(data) = self.logic.refine(ctx, parent) {
                child = child.with_data(data);
            }
            parent.set_child(FastStr::from_static_str(self.logic.name()), Arc::new(child));
        });
        Some(match parent.child(self.logic.name()) {
            Some(child) => child,
            None => Arc::new(TreeNode::new(parent.name()).with_cache_version(parent.cache_version())),
        })
    }
}

/// Classification logic of a grouping filter: fans the parent's instances
/// out into named branches and picks the branch the current resolution
/// should descend into.
pub trait Group: Send + Sync + 'static {
    /// See [`Filter::name`].
    fn name(&self) -> &'static str;

    /// See [`Filter::order`].
    fn order(&self) -> i32;

    /// See [`Filter::enabled`].
    fn enabled(&self) -> bool {
        true
    }

    /// Buckets every instance of `parent` into zero or more named branches.
    /// Runs at most once per node; the result is cached as the node's
    /// children.
    fn split(&self, ctx: &mut ResolveContext, parent: &TreeNode) -> HashMap<FastStr, NodeData>;

    /// Picks the branch for the current resolution. Runs on every
    /// traversal, so request-dependent selection (and rerun bookkeeping)
    /// belongs here, not in [`Group::split`].
    fn pick(&self, ctx: &mut ResolveContext, parent: &TreeNode) -> FastStr;
}

/// Adapter turning a [`Group`] into a [`Filter`].
///
/// Children are named `parent-name/branch-key`, making the accumulated
/// branch path itself the downstream cache key.
pub struct GroupingFilter<G> {
    logic: G,
}

impl<G: Group> GroupingFilter<G> {
    /// Wraps grouping logic into a pipeline stage.
    pub fn new(logic: G) -> Self {
        Self { logic }
    }
}

impl<G: Group> Filter for GroupingFilter<G> {
    fn name(&self) -> &'static str {
        self.logic.name()
    }

    fn order(&self) -> i32 {
        self.logic.order()
    }

    fn enabled(&self) -> bool {
        self.logic.enabled()
    }

    fn grouping(&self) -> bool {
        true
    }

    fn resolve(&self, ctx: &mut ResolveContext, parent: &Arc<TreeNode>) -> Option<Arc<TreeNode>> {
        parent.ensure_children(|| {
            for (key, data) in self.logic.split(ctx, parent) {
                let child = TreeNode::new(TreeNode::sub_name(parent, &key))
                    .with_cache_version(parent.cache_version())
                    .with_data(data);
                parent.set_child(key, Arc::new(child));
            }
        });
        let key = self.logic.pick(ctx, parent);
        Some(match parent.child(&key) {
            Some(child) => child,
            // The picked branch got no instances; hand back an empty node so
            // the pipeline can backtrack or fall through.
            None => Arc::new(TreeNode::new(TreeNode::sub_name(parent, &key)).with_cache_version(parent.cache_version())),
        })
    }
}
