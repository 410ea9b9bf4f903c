// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! discomesh narrows a live, versioned set of microservice instances down
//! to the subset usable for one outbound call: filtering by health, zone
//! affinity and wire protocol through a pluggable filter chain, caching
//! every intermediate narrowing step in a tree keyed by the registry
//! snapshot version, and backtracking to wider branches when a stage comes
//! up empty.
//!
//! ```rust
//! use discomesh::filters::standard_filters;
//! use discomesh::instance::Instance;
//! use discomesh::pipeline::PipelineBuilder;
//! use discomesh::registry::StaticRegistry;
//! use discomesh::tree::ResolveRequest;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(StaticRegistry::new());
//! registry.put("shop", "orders", "latest", vec![
//!     Instance::new("i1").with_endpoint("rest://10.0.0.1:8080"),
//! ]);
//! let pipeline = PipelineBuilder::new().add_filters(standard_filters(None)).build(registry);
//!
//! let view = pipeline.resolve(ResolveRequest::new("shop", "orders", "latest").with_transport("rest"))?;
//! assert_eq!(view.endpoints().unwrap()[0].authority.as_str(), "10.0.0.1:8080");
//! # Ok::<(), discomesh::pipeline::ResolveError>(())
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod endpoint;
pub mod filter;
pub mod filters;
pub mod instance;
pub mod pipeline;
pub mod registry;
pub mod tree;

pub use crate::pipeline::{Pipeline, PipelineBuilder, ResolveError};
pub use crate::registry::{SnapshotProvider, VersionedSnapshot};
pub use crate::tree::{NodeData, ResolveRequest, TreeNode};
