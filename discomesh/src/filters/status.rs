// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Health-status grouping.

use crate::filter::Group;
use crate::instance::{InstanceMap, InstanceStatus};
use crate::tree::{NodeData, ResolveContext, TreeNode};
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;

/// Branch holding only instances whose status is `Up`.
pub const UP_INSTANCES: &str = "up-instances";

/// [`InstanceStatusFilter`] keeps only callable instances.
///
/// Grouping filter that runs first: instances reported `Up` go into the
/// [`UP_INSTANCES`] branch; when none are up, no branch is created and the
/// stage yields an empty node, leaving the decision to the rerun/fall-through
/// handling of the pipeline.
pub struct InstanceStatusFilter {
    enabled: bool,
}

impl InstanceStatusFilter {
    /// Runs before every other stock filter.
    pub const ORDER: i32 = -10_000;

    /// Creates the filter; `enabled: false` removes the stage from the
    /// chain without consuming a tree level.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for InstanceStatusFilter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Group for InstanceStatusFilter {
    fn name(&self) -> &'static str {
        "instance-status"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn split(&self, _ctx: &mut ResolveContext, parent: &TreeNode) -> HashMap<FastStr, NodeData> {
        let mut up = InstanceMap::new();
        if let Some(instances) = parent.instances() {
            for (id, instance) in instances.iter() {
                if instance.status == InstanceStatus::Up {
                    up.insert(id.clone(), instance.clone());
                }
            }
        }
        let mut branches = HashMap::new();
        if !up.is_empty() {
            branches.insert(FastStr::from_static_str(UP_INSTANCES), NodeData::Instances(Arc::new(up)));
        }
        branches
    }

    fn pick(&self, _ctx: &mut ResolveContext, _parent: &TreeNode) -> FastStr {
        FastStr::from_static_str(UP_INSTANCES)
    }
}
