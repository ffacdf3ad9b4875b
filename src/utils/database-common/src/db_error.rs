// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use thiserror::Error;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error("Timed out after {timeout:?} waiting for a database connection")]
    AcquireTimeout { timeout: Duration },

    #[error("Database connection pool is closed")]
    PoolClosed,

    #[error("Statement '{statement}' failed: {reason}")]
    StatementFailed { statement: String, reason: String },

    #[error(transparent)]
    Configuration(#[from] DatabaseConfigurationError),
}

impl DatabaseError {
    /// Whether the failure means the physical session can no longer be
    /// trusted and must not go back into the pool
    pub fn is_connection_failure(&self) -> bool {
        match self {
            DatabaseError::SqlxError(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::WorkerCrashed
            ),
            DatabaseError::AcquireTimeout { .. }
            | DatabaseError::PoolClosed
            | DatabaseError::StatementFailed { .. }
            | DatabaseError::Configuration(_) => false,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum DatabaseConfigurationError {
    #[error("Environment variable {name} is required")]
    MissingVariable { name: &'static str },

    #[error("Environment variable {name} has invalid value '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unknown database provider '{value}'")]
    UnknownProvider { value: String },

    #[error("Unknown TLS mode '{value}'")]
    UnknownTlsMode { value: String },
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
