// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use database_common::IsolationLevel;
use observability::init::LogFormat;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runs probe transactions against the database configured through the
/// `DB_*` / `DATABASE_URL` environment variables
#[derive(Debug, clap::Parser)]
#[command(name = "db-probe", version)]
pub struct Cli {
    /// Statement executed inside every probe transaction
    #[arg(long, default_value = "SELECT 1")]
    pub query: String,

    /// Number of sequential probe transactions
    #[arg(long, default_value_t = 1)]
    pub iterations: u32,

    #[arg(long, value_enum)]
    pub isolation_level: Option<IsolationLevelArg>,

    #[arg(long)]
    pub read_only: bool,

    /// Keeps the long-running transaction watchdog running for this many
    /// seconds after the probes
    #[arg(long)]
    pub watch_secs: Option<u64>,

    /// Age after which the watchdog reports a transaction
    #[arg(long, default_value_t = 300)]
    pub long_running_threshold_secs: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Summary)]
    pub output: OutputFormat,

    #[arg(long, value_enum, env = "DB_PROBE_LOG_FORMAT", default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum IsolationLevelArg {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl From<IsolationLevelArg> for IsolationLevel {
    fn from(value: IsolationLevelArg) -> Self {
        match value {
            IsolationLevelArg::ReadUncommitted => IsolationLevel::ReadUncommitted,
            IsolationLevelArg::ReadCommitted => IsolationLevel::ReadCommitted,
            IsolationLevelArg::RepeatableRead => IsolationLevel::RepeatableRead,
            IsolationLevelArg::Serializable => IsolationLevel::Serializable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Single human-readable line
    Summary,
    /// Full metrics snapshot
    Json,
    /// Prometheus text exposition
    Prometheus,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
