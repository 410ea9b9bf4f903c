// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Per-call resolution state.

use super::TreeNode;
use faststr::FastStr;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Caller-supplied input of one resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Application the target microservice belongs to.
    pub app_id: FastStr,
    /// Target microservice name.
    pub service_name: FastStr,
    /// Version constraint selecting eligible instances, e.g. `latest` or
    /// `1.0.0-2.0.0`.
    pub version_rule: FastStr,
    /// Desired endpoint scheme (`rest`, `grpc`, ...); `None` accepts any.
    pub transport: Option<FastStr>,
    /// Free-form hints for custom filters.
    pub hints: HashMap<FastStr, FastStr>,
}

impl ResolveRequest {
    /// Creates a request for one microservice under a version rule.
    pub fn new(app_id: impl Into<FastStr>, service_name: impl Into<FastStr>, version_rule: impl Into<FastStr>) -> Self {
        Self {
            app_id: app_id.into(),
            service_name: service_name.into(),
            version_rule: version_rule.into(),
            transport: None,
            hints: HashMap::new(),
        }
    }

    /// Restricts resolution to endpoints of one wire protocol.
    pub fn with_transport(mut self, scheme: impl Into<FastStr>) -> Self {
        self.transport = Some(scheme.into());
        self
    }

    /// Adds a free-form hint.
    pub fn with_hint(mut self, key: impl Into<FastStr>, value: impl Into<FastStr>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}

/// [`ResolveContext`] is created fresh per resolution and threaded through
/// the filter chain: the caller's request, a typed key/value side channel
/// for inter-filter communication, and the backtracking stack of rerun
/// points.
///
/// Single-threaded by construction; it is never shared across resolutions.
pub struct ResolveContext {
    request: ResolveRequest,
    params: HashMap<FastStr, Box<dyn Any>>,
    rerun_stack: Vec<Arc<TreeNode>>,
    current: Option<Arc<TreeNode>>,
}

impl ResolveContext {
    /// Creates the context for one resolution.
    pub fn new(request: ResolveRequest) -> Self {
        Self {
            request,
            params: HashMap::new(),
            rerun_stack: Vec::new(),
            current: None,
        }
    }

    /// The caller's request.
    pub fn request(&self) -> &ResolveRequest {
        &self.request
    }

    /// Writes a side-channel parameter; last write per key wins.
    pub fn put_param<T: 'static>(&mut self, key: impl Into<FastStr>, value: T) {
        self.params.insert(key.into(), Box::new(value));
    }

    /// Reads a side-channel parameter. Absence means "no opinion", never an
    /// error.
    pub fn param<T: 'static>(&self, key: &str) -> Option<&T> {
        self.params.get(key).and_then(|value| value.downcast_ref())
    }

    /// Records the node that was active before the currently executing
    /// filter ran, so the chain can resume from it when a later stage comes
    /// up empty.
    pub fn push_rerun(&mut self) {
        if let Some(node) = &self.current {
            self.rerun_stack.push(node.clone());
        }
    }

    /// Pops the most recent rerun point, LIFO.
    pub fn pop_rerun(&mut self) -> Option<Arc<TreeNode>> {
        self.rerun_stack.pop()
    }

    /// Updated by the orchestrator before each filter invocation.
    pub fn set_current(&mut self, node: Arc<TreeNode>) {
        self.current = Some(node);
    }
}
