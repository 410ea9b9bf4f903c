// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Endpoint grouping by wire protocol.

use crate::endpoint::Endpoint;
use crate::filter::Group;
use crate::tree::{NodeData, ResolveContext, TreeNode};
use faststr::FastStr;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Branch holding every endpoint regardless of wire protocol.
pub const ALL_TRANSPORT: &str = "all";

/// [`EndpointFilter`] converts instances into connectable endpoints and
/// groups them by URI scheme.
///
/// Runs last: one branch per advertised scheme plus the [`ALL_TRANSPORT`]
/// branch. A malformed endpoint URI is logged and skipped; one bad instance
/// must not abort resolution for the whole group.
#[derive(Default)]
pub struct EndpointFilter;

impl EndpointFilter {
    /// Terminal stage of the stock chain.
    pub const ORDER: i32 = i32::MAX;
}

impl Group for EndpointFilter {
    fn name(&self) -> &'static str {
        "endpoint"
    }

    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn split(&self, _ctx: &mut ResolveContext, parent: &TreeNode) -> HashMap<FastStr, NodeData> {
        let mut buckets: HashMap<FastStr, Vec<Endpoint>> = HashMap::new();
        if let Some(instances) = parent.instances() {
            for instance in instances.values() {
                for uri in &instance.endpoints {
                    match Endpoint::parse(uri, instance.clone()) {
                        Ok(endpoint) => {
                            buckets.entry(endpoint.scheme.clone()).or_default().push(endpoint.clone());
                            buckets.entry(FastStr::from_static_str(ALL_TRANSPORT)).or_default().push(endpoint);
                        }
                        Err(error) => {
                            warn!(
                                instance_id = instance.instance_id.as_str(),
                                uri = uri.as_str(),
                                %error,
                                "skipping malformed endpoint uri"
                            );
                        }
                    }
                }
            }
        }
        buckets
            .into_iter()
            .map(|(scheme, mut endpoints)| {
                // Stable output independent of instance-map iteration order.
                endpoints.sort_by(|a, b| (&a.authority, &a.instance.instance_id).cmp(&(&b.authority, &b.instance.instance_id)));
                (scheme, NodeData::Endpoints(Arc::new(endpoints)))
            })
            .collect()
    }

    fn pick(&self, ctx: &mut ResolveContext, _parent: &TreeNode) -> FastStr {
        match &ctx.request().transport {
            Some(scheme) => scheme.clone(),
            None => FastStr::from_static_str(ALL_TRANSPORT),
        }
    }
}
