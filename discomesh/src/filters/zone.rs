// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Zone/region affinity with widening fallback.

use crate::filter::Group;
use crate::instance::InstanceMap;
use crate::tree::{NodeData, ResolveContext, TreeNode};
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const SAME_ZONE: &str = "same-zone";
const SAME_REGION: &str = "same-region";
const ALL: &str = "all";

const LEVEL_PARAM: &str = "zone-aware.level";

/// [`ZoneAwareFilter`] prefers instances deployed close to the caller.
///
/// Grouping filter with three branches: `same-zone` (region and zone both
/// match the caller's placement), `same-region` (region matches, zone does
/// not), and `all`. Every visit below the widest branch registers a rerun
/// point, so an empty branch or an empty result in any later stage
/// backtracks here and widens the search by one step.
pub struct ZoneAwareFilter {
    region: FastStr,
    zone: FastStr,
}

impl ZoneAwareFilter {
    /// Runs after health grouping, before endpoint grouping.
    pub const ORDER: i32 = 300;

    /// Creates the filter with the calling process's own placement.
    pub fn new(region: impl Into<FastStr>, zone: impl Into<FastStr>) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
        }
    }
}

impl Group for ZoneAwareFilter {
    fn name(&self) -> &'static str {
        "zone-aware"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn split(&self, _ctx: &mut ResolveContext, parent: &TreeNode) -> HashMap<FastStr, NodeData> {
        let mut same_zone = InstanceMap::new();
        let mut same_region = InstanceMap::new();
        let mut all = InstanceMap::new();
        if let Some(instances) = parent.instances() {
            for (id, instance) in instances.iter() {
                let region_match = instance.region.as_deref() == Some(self.region.as_str());
                if region_match && instance.zone.as_deref() == Some(self.zone.as_str()) {
                    same_zone.insert(id.clone(), instance.clone());
                } else if region_match {
                    same_region.insert(id.clone(), instance.clone());
                }
                all.insert(id.clone(), instance.clone());
            }
        }
        let mut branches = HashMap::new();
        if !same_zone.is_empty() {
            branches.insert(FastStr::from_static_str(SAME_ZONE), NodeData::Instances(Arc::new(same_zone)));
        }
        if !same_region.is_empty() {
            branches.insert(FastStr::from_static_str(SAME_REGION), NodeData::Instances(Arc::new(same_region)));
        }
        branches.insert(FastStr::from_static_str(ALL), NodeData::Instances(Arc::new(all)));
        branches
    }

    fn pick(&self, ctx: &mut ResolveContext, parent: &TreeNode) -> FastStr {
        let level = ctx.param::<usize>(LEVEL_PARAM).copied().unwrap_or(0);
        let branch = match level {
            0 => SAME_ZONE,
            1 => SAME_REGION,
            _ => ALL,
        };
        if level < 2 {
            // Any empty result downstream may unwind back to this node and
            // retry one branch wider.
            ctx.put_param(LEVEL_PARAM, level + 1);
            ctx.push_rerun();
        }
        debug!(group = parent.name().as_str(), branch, "zone-aware branch picked");
        FastStr::from_static_str(branch)
    }
}
