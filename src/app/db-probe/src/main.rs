// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod app;
mod cli;

use std::process::ExitCode;

use clap::Parser;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Cli::parse();

    let logging_config = observability::init::LoggingConfig {
        format: args.log_format.into(),
        ..Default::default()
    };
    if let Err(e) = observability::init::init_logging(&logging_config) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match app::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, error_msg = %e, "Database probe failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
