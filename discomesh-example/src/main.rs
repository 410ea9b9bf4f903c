// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use discomesh::filters::standard_filters;
use discomesh::instance::{Instance, InstanceStatus};
use discomesh::pipeline::PipelineBuilder;
use discomesh::registry::StaticRegistry;
use discomesh::tree::{ResolveRequest, TreeNode};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
struct Flags {
    /// Restricts resolution to one wire protocol.
    #[clap(long)]
    transport: Option<String>,
    /// This process's own region, enabling the zone-aware stage.
    #[clap(long, default_value = "eu-1")]
    region: String,
    /// This process's own availability zone.
    #[clap(long, default_value = "eu-1a")]
    zone: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let flags = Flags::parse();

    let registry = Arc::new(StaticRegistry::new());
    registry.put(
        "shop",
        "orders",
        "latest",
        vec![
            Instance::new("orders-1").in_zone("eu-1", "eu-1a").with_endpoint("rest://10.0.0.1:8080"),
            Instance::new("orders-2").in_zone("eu-1", "eu-1b").with_endpoint("rest://10.0.0.2:8080").with_endpoint("grpc://10.0.0.2:50051"),
            Instance::new("orders-3").in_zone("us-2", "us-2a").with_status(InstanceStatus::Down).with_endpoint("rest://10.0.0.3:8080"),
        ],
    );

    let pipeline = PipelineBuilder::new()
        .add_filters(standard_filters(Some((flags.region.as_str(), flags.zone.as_str()))))
        .build(registry.clone());

    let mut request = ResolveRequest::new("shop", "orders", "latest");
    if let Some(transport) = &flags.transport {
        request = request.with_transport(transport.clone());
    }

    let view = pipeline.resolve(request.clone())?;
    report("initial topology", &view);

    // Take the same-zone instance down; the next snapshot version replaces
    // the cached tree and resolution widens to the next zone over.
    registry.put(
        "shop",
        "orders",
        "latest",
        vec![
            Instance::new("orders-1").in_zone("eu-1", "eu-1a").with_status(InstanceStatus::Down).with_endpoint("rest://10.0.0.1:8080"),
            Instance::new("orders-2").in_zone("eu-1", "eu-1b").with_endpoint("rest://10.0.0.2:8080").with_endpoint("grpc://10.0.0.2:50051"),
        ],
    );

    let view = pipeline.resolve(request)?;
    report("after orders-1 went down", &view);

    Ok(())
}

fn report(moment: &str, view: &TreeNode) {
    match view.endpoints() {
        Some(endpoints) => {
            for endpoint in endpoints {
                info!(
                    moment,
                    group = view.name().as_str(),
                    instance = endpoint.instance.instance_id.as_str(),
                    scheme = endpoint.scheme.as_str(),
                    authority = endpoint.authority.as_str(),
                    "resolved endpoint"
                );
            }
        }
        None => info!(moment, group = view.name().as_str(), "no endpoints resolved"),
    }
}
