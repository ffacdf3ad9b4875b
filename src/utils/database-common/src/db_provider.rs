// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::str::FromStr;

use crate::{DatabaseConfigurationError, IsolationLevel};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DatabaseProvider {
    Postgres,
    MySql,
    MariaDB,
    Sqlite,
}

/// Where the `SET TRANSACTION ...` statements must be issued relative to
/// `BEGIN` for them to affect the transaction being opened
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionSettingsPlacement {
    /// Settings apply to the next transaction started on the session
    BeforeBegin,
    /// Settings apply only inside an open transaction block
    AfterBegin,
    /// Provider has no per-transaction settings statements
    Unsupported,
}

impl DatabaseProvider {
    pub fn default_port(&self) -> u32 {
        match self {
            DatabaseProvider::MariaDB | DatabaseProvider::MySql => 3306,
            DatabaseProvider::Postgres => 5432,
            DatabaseProvider::Sqlite => 0,
        }
    }

    pub fn transaction_settings_placement(&self) -> TransactionSettingsPlacement {
        match self {
            DatabaseProvider::Postgres => TransactionSettingsPlacement::AfterBegin,
            DatabaseProvider::MySql | DatabaseProvider::MariaDB => {
                TransactionSettingsPlacement::BeforeBegin
            }
            DatabaseProvider::Sqlite => TransactionSettingsPlacement::Unsupported,
        }
    }

    pub fn begin_statement(&self) -> &'static str {
        "BEGIN"
    }

    pub fn commit_statement(&self) -> &'static str {
        "COMMIT"
    }

    pub fn rollback_statement(&self) -> &'static str {
        "ROLLBACK"
    }

    pub fn isolation_level_statement(&self, isolation_level: IsolationLevel) -> Option<String> {
        match self.transaction_settings_placement() {
            TransactionSettingsPlacement::Unsupported => None,
            _ => Some(format!(
                "SET TRANSACTION ISOLATION LEVEL {}",
                isolation_level.as_sql()
            )),
        }
    }

    pub fn access_mode_statement(&self, read_only: bool) -> Option<&'static str> {
        match self.transaction_settings_placement() {
            TransactionSettingsPlacement::Unsupported => None,
            _ if read_only => Some("SET TRANSACTION READ ONLY"),
            _ => Some("SET TRANSACTION READ WRITE"),
        }
    }

    /// Guesses the provider from the scheme of a connection URL
    pub fn from_connection_string(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once(':')?;
        scheme.parse().ok()
    }
}

impl std::fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                DatabaseProvider::Postgres => "postgres",
                DatabaseProvider::MySql => "mysql",
                DatabaseProvider::MariaDB => "mariadb",
                DatabaseProvider::Sqlite => "sqlite",
            }
        )
    }
}

impl FromStr for DatabaseProvider {
    type Err = DatabaseConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseProvider::Postgres),
            "mysql" => Ok(DatabaseProvider::MySql),
            "mariadb" => Ok(DatabaseProvider::MariaDB),
            "sqlite" => Ok(DatabaseProvider::Sqlite),
            _ => Err(DatabaseConfigurationError::UnknownProvider {
                value: s.to_string(),
            }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
