// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Concrete filters shipped with the crate.

pub use endpoint::{EndpointFilter, ALL_TRANSPORT};
pub use status::{InstanceStatusFilter, UP_INSTANCES};
pub use tag::TagFilter;
pub use zone::ZoneAwareFilter;

mod endpoint;
mod status;
mod tag;
mod zone;

use crate::filter::{Filter, GroupingFilter};
use faststr::FastStr;
use std::sync::Arc;

/// The stock filter chain: status first, optional zone affinity, endpoint
/// grouping last.
///
/// `placement` is the calling process's own `(region, zone)`; without it the
/// zone-aware stage is omitted.
pub fn standard_filters(placement: Option<(&str, &str)>) -> Vec<Arc<dyn Filter>> {
    let mut filters: Vec<Arc<dyn Filter>> = vec![
        Arc::new(GroupingFilter::new(InstanceStatusFilter::default())),
        Arc::new(GroupingFilter::new(EndpointFilter::default())),
    ];
    if let Some((region, zone)) = placement {
        filters.push(Arc::new(GroupingFilter::new(ZoneAwareFilter::new(FastStr::new(region), FastStr::new(zone)))));
    }
    filters
}
