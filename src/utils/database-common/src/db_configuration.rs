// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::{DatabaseConfigurationError, DatabaseProvider};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DB_PROVIDER: &str = "DB_PROVIDER";
pub const ENV_DB_HOST: &str = "DB_HOST";
pub const ENV_DB_PORT: &str = "DB_PORT";
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_DB_USER: &str = "DB_USER";
pub const ENV_DB_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_DB_MAX_CONNECTIONS: &str = "DB_MAX_CONNECTIONS";
pub const ENV_DB_IDLE_TIMEOUT_MS: &str = "DB_IDLE_TIMEOUT_MS";
pub const ENV_DB_CONNECT_TIMEOUT_MS: &str = "DB_CONNECT_TIMEOUT_MS";
pub const ENV_DB_SSL_MODE: &str = "DB_SSL_MODE";

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseTlsMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for DatabaseTlsMode {
    type Err = DatabaseConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" | "disabled" => Ok(Self::Disable),
            "prefer" | "preferred" => Ok(Self::Prefer),
            "require" | "required" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" | "verify-identity" => Ok(Self::VerifyFull),
            _ => Err(DatabaseConfigurationError::UnknownTlsMode {
                value: s.to_string(),
            }),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabasePoolConfig {
    pub max_connections: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "idleTimeoutMs")]
    pub idle_timeout: Duration,

    /// Upper bound for waiting on a free connection (and for establishing a
    /// new one)
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connectTimeoutMs")]
    pub connect_timeout: Duration,
}

impl DatabasePoolConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(max_connections: u32) -> Self {
        Self {
            max_connections,
            ..Default::default()
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Describes how to reach the database. Built once at startup and handed to
/// the pool, never mutated afterwards.
#[derive(Debug)]
pub struct DatabaseConfiguration {
    pub provider: DatabaseProvider,
    pub user: String,
    pub password: Option<SecretString>,
    pub database_name: String,
    pub host: String,
    pub port: Option<u32>,
    pub tls_mode: DatabaseTlsMode,
    /// When set, takes precedence over the discrete connection fields
    pub connection_string: Option<SecretString>,
    pub pool: DatabasePoolConfig,
}

impl DatabaseConfiguration {
    pub fn new(
        provider: DatabaseProvider,
        user: String,
        database_name: String,
        host: String,
        port: Option<u32>,
    ) -> Self {
        Self {
            provider,
            user,
            password: None,
            database_name,
            host,
            port,
            tls_mode: DatabaseTlsMode::default(),
            connection_string: None,
            pool: DatabasePoolConfig::default(),
        }
    }

    pub fn local_postgres() -> Self {
        let mut configuration = Self::new(
            DatabaseProvider::Postgres,
            String::from("root"),
            String::from("app"),
            String::from("localhost"),
            None,
        );
        configuration.password = Some(SecretString::from(String::from("root")));
        configuration.tls_mode = DatabaseTlsMode::Disable;
        configuration
    }

    pub fn sqlite(database_path: &str) -> Self {
        Self::new(
            DatabaseProvider::Sqlite,
            String::new(),
            database_path.to_string(),
            String::new(),
            None,
        )
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    pub fn with_pool(mut self, pool: DatabasePoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn port(&self) -> u32 {
        self.port.unwrap_or_else(|| self.provider.default_port())
    }

    /// Connection target without credentials, safe to log
    pub fn display_target(&self) -> String {
        if self.connection_string.is_some() {
            format!("{}://<connection string>", self.provider)
        } else if let DatabaseProvider::Sqlite = self.provider {
            format!("{}://{}", self.provider, self.database_name)
        } else {
            format!(
                "{}://{}@{}:{}/{}",
                self.provider,
                self.user,
                self.host,
                self.port(),
                self.database_name
            )
        }
    }

    pub fn from_env() -> Result<Self, DatabaseConfigurationError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup, which
    /// keeps parsing testable without touching the process environment
    pub fn from_vars<F>(lookup: F) -> Result<Self, DatabaseConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str| lookup(name).filter(|value| !value.trim().is_empty());
        let required = |name: &'static str| {
            var(name).ok_or(DatabaseConfigurationError::MissingVariable { name })
        };

        let connection_string = var(ENV_DATABASE_URL);

        let provider = match var(ENV_DB_PROVIDER) {
            Some(value) => value.parse()?,
            None => connection_string
                .as_deref()
                .and_then(DatabaseProvider::from_connection_string)
                .unwrap_or(DatabaseProvider::Postgres),
        };

        let has_connection_string = connection_string.is_some();
        let is_sqlite = provider == DatabaseProvider::Sqlite;

        let host = if has_connection_string || is_sqlite {
            var(ENV_DB_HOST).unwrap_or_default()
        } else {
            required(ENV_DB_HOST)?
        };
        let database_name = if has_connection_string {
            var(ENV_DB_NAME).unwrap_or_default()
        } else {
            required(ENV_DB_NAME)?
        };
        let user = if has_connection_string || is_sqlite {
            var(ENV_DB_USER).unwrap_or_default()
        } else {
            required(ENV_DB_USER)?
        };

        let port = parse_var::<u32>(ENV_DB_PORT, var(ENV_DB_PORT))?;
        let tls_mode = match var(ENV_DB_SSL_MODE) {
            Some(value) => value.parse()?,
            None => DatabaseTlsMode::default(),
        };

        let mut pool = DatabasePoolConfig::default();
        if let Some(max_connections) =
            parse_var::<u32>(ENV_DB_MAX_CONNECTIONS, var(ENV_DB_MAX_CONNECTIONS))?
        {
            if max_connections == 0 {
                return Err(DatabaseConfigurationError::InvalidValue {
                    name: ENV_DB_MAX_CONNECTIONS,
                    value: max_connections.to_string(),
                    reason: String::from("pool must allow at least one connection"),
                });
            }
            pool.max_connections = max_connections;
        }
        if let Some(idle_timeout_ms) =
            parse_var::<u64>(ENV_DB_IDLE_TIMEOUT_MS, var(ENV_DB_IDLE_TIMEOUT_MS))?
        {
            pool.idle_timeout = Duration::from_millis(idle_timeout_ms);
        }
        if let Some(connect_timeout_ms) =
            parse_var::<u64>(ENV_DB_CONNECT_TIMEOUT_MS, var(ENV_DB_CONNECT_TIMEOUT_MS))?
        {
            if connect_timeout_ms == 0 {
                return Err(DatabaseConfigurationError::InvalidValue {
                    name: ENV_DB_CONNECT_TIMEOUT_MS,
                    value: connect_timeout_ms.to_string(),
                    reason: String::from("acquisition would time out immediately"),
                });
            }
            pool.connect_timeout = Duration::from_millis(connect_timeout_ms);
        }

        Ok(Self {
            provider,
            user,
            password: var(ENV_DB_PASSWORD).map(SecretString::from),
            database_name,
            host,
            port,
            tls_mode,
            connection_string: connection_string.map(SecretString::from),
            pool,
        })
    }
}

fn parse_var<T>(
    name: &'static str,
    value: Option<String>,
) -> Result<Option<T>, DatabaseConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .map_err(|e| DatabaseConfigurationError::InvalidValue {
                    name,
                    value: value.clone(),
                    reason: e.to_string(),
                })
        })
        .transpose()
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
