// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(clippy::all, clippy::pedantic)]
#![deny(rustdoc::all)]
#![allow(rustdoc::missing_crate_level_docs)]

mod launch;

use args::{CmdArgs, Parser};
use config::AgentConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracectl::{custom_target, get_trace_ctl, trace_target};
use tracing::{error, info, level_filters::LevelFilter};

trace_target!("inframanager", LevelFilter::INFO, &[]);
fn init_logging() {
    let tctl = get_trace_ctl();
    tctl.set_default_level(LevelFilter::INFO);
    custom_target!("tonic", LevelFilter::ERROR, &[]);
    custom_target!("h2", LevelFilter::ERROR, &[]);
    custom_target!("hyper", LevelFilter::ERROR, &[]);
}

fn load_config(args: &CmdArgs) -> Option<AgentConfig> {
    let mut config = match AgentConfig::load(args.config_path().map(PathBuf::as_path)) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return None;
        }
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {e}");
        return None;
    }
    Some(config)
}

fn main() -> ExitCode {
    /* parse cmd line args */
    let args = CmdArgs::parse();

    /* initialize logging */
    init_logging();
    if args.show_tracing_targets() {
        println!("{}", get_trace_ctl().targets_table());
        return ExitCode::SUCCESS;
    }
    if args.tracing_config_generate() {
        println!("{}", get_trace_ctl().as_config_string());
        return ExitCode::SUCCESS;
    }

    let Some(config) = load_config(&args) else {
        return ExitCode::FAILURE;
    };
    if let Some(tracing) = &config.log_level
        && let Err(e) = get_trace_ctl().setup_from_string(tracing)
    {
        error!("Invalid tracing configuration: {e}");
        return ExitCode::FAILURE;
    }
    info!("Starting infra manager...");

    let supervisor = CancellationToken::new();
    let stop = supervisor.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received stop signal");
        stop.cancel();
    }) {
        error!("Failed to set signal handler: {e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("inframanager")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Tokio runtime creation failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(launch::run(config, supervisor)) {
        Ok(()) => {
            info!("Shutting down infra manager");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Infra manager failed: {e}");
            ExitCode::FAILURE
        }
    }
}
