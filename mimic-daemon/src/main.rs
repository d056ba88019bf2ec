//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod router;

use clap::{App, Arg};
use config::{Config, LoggingFmtStyle};
use router::Router;
use tracing::{error, info};
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("mimic=debug".parse().unwrap())
        .from_env_lossy();

    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(config.show_thread_id)
        .with_file(config.show_source)
        .with_line_number(config.show_source)
        .with_ansi(config.colors);
    let layer = match config.style {
        LoggingFmtStyle::Compact => layer.compact().boxed(),
        LoggingFmtStyle::Full => layer.boxed(),
        LoggingFmtStyle::Json => layer.json().boxed(),
        LoggingFmtStyle::Pretty => layer.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .init();
}

fn main() {
    // Parse command-line parameters.
    let matches = App::new("mimicd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Router control- and data-plane simulator")
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config-file")
                .value_name("FILE")
                .help("Configuration file")
                .default_value("/etc/mimicd.toml"),
        )
        .get_matches();

    // Read and validate the configuration.
    let config_path = matches.value_of("config").unwrap();
    let data = match std::fs::read_to_string(config_path) {
        Ok(data) => data,
        Err(err) => {
            eprintln!("failed to read {config_path}: {err}");
            std::process::exit(3);
        }
    };
    let config = match Config::load(&data) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(3);
        }
    };

    init_tracing(&config.logging);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to start the async runtime");
            std::process::exit(4);
        }
    };

    let code = runtime.block_on(async move {
        let mut router = match Router::new(config) {
            Ok(router) => router,
            Err(err) => {
                error!(%err, "invalid configuration");
                return 3;
            }
        };
        if let Err(err) = router.start().await {
            error!(%err, "failed to start");
            return 4;
        }
        info!("router is running");

        if tokio::signal::ctrl_c().await.is_err() {
            error!("failed to wait for the interrupt signal");
            return 4;
        }
        router.stop().await;
        0
    });
    std::process::exit(code);
}
