// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Property-based refinement.

use crate::filter::Refine;
use crate::instance::InstanceMap;
use crate::tree::{NodeData, ResolveContext, TreeNode};
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;

/// [`TagFilter`] keeps only instances whose tags contain every configured
/// key/value pair.
///
/// Refining filter: the narrowed set stays under the parent's group name.
/// With no configured pairs the filter reports itself disabled and the
/// pipeline skips it.
pub struct TagFilter {
    required: HashMap<FastStr, FastStr>,
}

impl TagFilter {
    /// Runs after zone affinity.
    pub const ORDER: i32 = 400;

    /// Creates the filter from required tag pairs.
    pub fn new<I, K, V>(required: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FastStr>,
        V: Into<FastStr>,
    {
        Self {
            required: required.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Refine for TagFilter {
    fn name(&self) -> &'static str {
        "tag-match"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn enabled(&self) -> bool {
        !self.required.is_empty()
    }

    fn refine(&self, _ctx: &mut ResolveContext, parent: &TreeNode) -> Option<NodeData> {
        let instances = parent.instances()?;
        let kept: InstanceMap = instances
            .iter()
            .filter(|(_, instance)| self.required.iter().all(|(key, value)| instance.tags.get(key) == Some(value)))
            .map(|(id, instance)| (id.clone(), instance.clone()))
            .collect();
        Some(NodeData::Instances(Arc::new(kept)))
    }
}
