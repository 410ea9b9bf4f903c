// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Connectable endpoints parsed from advertised endpoint URIs.

use crate::instance::Instance;
use faststr::FastStr;
use std::sync::Arc;
use url::Url;

/// One connectable address of an instance, derived from a single advertised
/// endpoint URI such as `rest://10.0.0.3:8080?sslEnabled=true`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Wire protocol, taken from the URI scheme (`rest`, `grpc`, ...).
    pub scheme: FastStr,
    /// `host:port` to dial.
    pub authority: FastStr,
    /// The instance that advertised this endpoint.
    pub instance: Arc<Instance>,
}

impl Endpoint {
    /// Parses one advertised endpoint URI.
    ///
    /// The scheme names the transport and is used as a grouping key by the
    /// endpoint filter; query parameters are tolerated and ignored here.
    pub fn parse(uri: &str, instance: Arc<Instance>) -> Result<Self, url::ParseError> {
        let url = Url::parse(uri)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        let authority = match url.port() {
            Some(port) => FastStr::from(format!("{host}:{port}")),
            None => FastStr::from(host.to_owned()),
        };
        Ok(Self {
            scheme: FastStr::from(url.scheme().to_owned()),
            authority,
            instance,
        })
    }
}
