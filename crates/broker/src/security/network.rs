// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restricted bridge network: inter-container communication disabled, host
//! binding limited to loopback.

use std::collections::HashMap;

use anyhow::Context;
use bollard::network::CreateNetworkOptions;
use bollard::Docker;
use tracing::info;

use crate::container::hardening::MANAGED_LABEL;

const ICC_OPT: &str = "com.docker.network.bridge.enable_icc";
const HOST_BINDING_OPT: &str = "com.docker.network.bridge.host_binding_ipv4";

/// Verify the restricted network exists with the expected options, creating
/// it when absent. Returns the network name to use as the container network
/// mode.
pub async fn ensure_restricted(docker: &Docker, name: &str) -> anyhow::Result<String> {
    match docker.inspect_network::<String>(name, None).await {
        Ok(network) => {
            let options = network.options.unwrap_or_default();
            verify_options(name, &options)?;
            Ok(name.to_owned())
        }
        Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
            create_restricted(docker, name).await?;
            info!(network = name, "created restricted network");
            Ok(name.to_owned())
        }
        Err(err) => Err(err).context("inspect restricted network"),
    }
}

/// The checks an existing network must pass before sandboxes join it.
pub fn verify_options(name: &str, options: &HashMap<String, String>) -> anyhow::Result<()> {
    if options.get(ICC_OPT).map(String::as_str) != Some("false") {
        anyhow::bail!("network {name} does not disable inter-container communication");
    }
    if options.get(HOST_BINDING_OPT).map(String::as_str) != Some("127.0.0.1") {
        anyhow::bail!("network {name} does not restrict host binding to loopback");
    }
    Ok(())
}

async fn create_restricted(docker: &Docker, name: &str) -> anyhow::Result<()> {
    let mut options = HashMap::new();
    options.insert(ICC_OPT.to_owned(), "false".to_owned());
    options.insert(HOST_BINDING_OPT.to_owned(), "127.0.0.1".to_owned());

    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_owned(), "true".to_owned());

    docker
        .create_network(CreateNetworkOptions {
            name: name.to_owned(),
            driver: "bridge".to_owned(),
            options,
            labels,
            ..Default::default()
        })
        .await
        .context("create restricted network")?;
    Ok(())
}
