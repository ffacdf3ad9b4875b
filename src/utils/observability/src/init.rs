// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Directives used when `RUST_LOG` is not set
    pub default_directives: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            default_directives: String::from("info"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Installs the global tracing subscriber. Output goes to stderr so that
/// stdout stays clean for command results.
pub fn init_logging(config: &LoggingConfig) -> Result<(), InitLoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(&config.default_directives)?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }

    tracing::debug!(format = ?config.format, "Logging initialized");

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum InitLoggingError {
    #[error("Invalid log filter directives: {0}")]
    InvalidFilter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Global tracing subscriber is already installed")]
    AlreadyInitialized(#[from] TryInitError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
