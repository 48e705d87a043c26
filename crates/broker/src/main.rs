// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use termbroker::config::Config;
use termbroker::logging;

#[tokio::main]
async fn main() {
    let config = Config::parse();
    logging::init(&config);

    if let Err(e) = termbroker::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
