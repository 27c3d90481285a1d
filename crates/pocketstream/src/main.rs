//! PocketStream live: relay an RTMP stream received by ffmpeg to a remote HLS ingest server.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory as _, Parser as _};
use pocketstream_core::{
    DeliveryPoolConfig, ObservabilityConfig, Orchestrator, ReqwestTransport, ToolConfig,
    init_observability,
};
use tracing::{error, warn};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let raw: Vec<_> = std::env::args_os().collect();
    if raw.len() <= 1 {
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }
    dotenvy::dotenv().ok();

    let (args, unrecognized) = cli::normalize_args(raw);
    let cli = Cli::parse_from(args);
    init_observability(&ObservabilityConfig {
        persist_errors: cli.persist_errors,
        error_log_dir: None,
    });
    for argument in unrecognized {
        warn!(
            event = "cli.unrecognized_argument",
            domain = "config",
            argument = %argument,
            "unrecognized flag/argument"
        );
    }

    let transport = match ReqwestTransport::new(Duration::from_secs(cli.http_timeout_secs)) {
        Ok(transport) => Arc::new(transport),
        Err(err) => {
            error!(event = "http.client_failed", domain = "http", error = %err);
            return ExitCode::FAILURE;
        }
    };
    let orchestrator = Orchestrator::new(transport)
        .with_tool(ToolConfig::program(cli.ffmpeg.clone()))
        .with_delivery_pool(DeliveryPoolConfig { workers: cli.upload_workers });

    match orchestrator.run_args(cli.session_args()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR {err}");
            ExitCode::FAILURE
        }
    }
}
