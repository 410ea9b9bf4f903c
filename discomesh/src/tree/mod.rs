// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! The per-service resolution tree and the per-call context threaded
//! through the filter chain.

pub use context::{ResolveContext, ResolveRequest};
pub use node::{NodeData, TreeNode};

mod context;
mod node;
