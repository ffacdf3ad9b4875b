// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::any::Any;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use sqlx::pool::{PoolConnection, PoolOptions};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::sqlite::SqliteConnectOptions;

use crate::{
    DatabaseConfiguration,
    DatabaseConfigurationError,
    DatabaseConnection,
    DatabaseConnectionPool,
    DatabaseError,
    DatabasePoolConfig,
    DatabaseProvider,
    DatabaseTlsMode,
    ENV_DB_PORT,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub struct SqlxConnection<DB: sqlx::Database> {
    connection: PoolConnection<DB>,
    broken: bool,
}

impl<DB: sqlx::Database> SqlxConnection<DB> {
    pub fn new(connection: PoolConnection<DB>) -> Self {
        Self {
            connection,
            broken: false,
        }
    }

    pub fn as_driver_connection_mut(&mut self) -> &mut DB::Connection {
        &mut self.connection
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub struct SqlxConnectionPool<DB: sqlx::Database> {
    pool: sqlx::Pool<DB>,
    provider: DatabaseProvider,
    acquire_timeout: Duration,
}

impl<DB: sqlx::Database> SqlxConnectionPool<DB> {
    pub fn new(pool: sqlx::Pool<DB>, provider: DatabaseProvider, acquire_timeout: Duration) -> Self {
        Self {
            pool,
            provider,
            acquire_timeout,
        }
    }

    pub fn inner(&self) -> &sqlx::Pool<DB> {
        &self.pool
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

macro_rules! impl_sqlx_backend {
    ($db:ty) => {
        #[async_trait::async_trait]
        impl DatabaseConnection for SqlxConnection<$db> {
            async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
                match sqlx::Executor::execute(&mut *self.connection, sqlx::raw_sql(sql)).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        let e = DatabaseError::from(e);
                        if e.is_connection_failure() {
                            self.broken = true;
                        }
                        Err(e)
                    }
                }
            }

            fn is_broken(&self) -> bool {
                self.broken
            }

            fn discard(self: Box<Self>) {
                drop(self.connection.detach());
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        }

        #[async_trait::async_trait]
        impl DatabaseConnectionPool for SqlxConnectionPool<$db> {
            fn provider(&self) -> DatabaseProvider {
                self.provider
            }

            async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, DatabaseError> {
                match self.pool.acquire().await {
                    Ok(connection) => Ok(Box::new(SqlxConnection::new(connection))),
                    Err(sqlx::Error::PoolTimedOut) => Err(DatabaseError::AcquireTimeout {
                        timeout: self.acquire_timeout,
                    }),
                    Err(sqlx::Error::PoolClosed) => Err(DatabaseError::PoolClosed),
                    Err(e) => Err(e.into()),
                }
            }

            async fn close(&self) -> Result<(), DatabaseError> {
                self.pool.close().await;
                Ok(())
            }

            fn size(&self) -> u32 {
                self.pool.size()
            }

            fn num_idle(&self) -> usize {
                self.pool.num_idle()
            }
        }
    };
}

impl_sqlx_backend!(sqlx::Postgres);
impl_sqlx_backend!(sqlx::MySql);
impl_sqlx_backend!(sqlx::Sqlite);

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Creates a lazily connecting pool for the configured provider. No session
/// is opened until the first acquisition. Must be called within a tokio
/// runtime.
pub fn open_connection_pool(
    config: &DatabaseConfiguration,
) -> Result<Arc<dyn DatabaseConnectionPool>, DatabaseError> {
    tracing::info!(
        target = %config.display_target(),
        max_connections = config.pool.max_connections,
        "Opening database connection pool"
    );

    let acquire_timeout = config.pool.connect_timeout;

    match config.provider {
        DatabaseProvider::Postgres => {
            let options = match &config.connection_string {
                Some(url) => PgConnectOptions::from_str(url.expose_secret())?,
                None => {
                    let mut options = PgConnectOptions::new()
                        .host(&config.host)
                        .port(network_port(config)?)
                        .username(&config.user)
                        .database(&config.database_name)
                        .ssl_mode(pg_ssl_mode(config.tls_mode));
                    if let Some(password) = &config.password {
                        options = options.password(password.expose_secret());
                    }
                    options
                }
            };

            let pool = pool_options::<sqlx::Postgres>(&config.pool).connect_lazy_with(options);
            Ok(Arc::new(SqlxConnectionPool::new(
                pool,
                config.provider,
                acquire_timeout,
            )))
        }
        DatabaseProvider::MySql | DatabaseProvider::MariaDB => {
            let options = match &config.connection_string {
                Some(url) => MySqlConnectOptions::from_str(url.expose_secret())?,
                None => {
                    let mut options = MySqlConnectOptions::new()
                        .host(&config.host)
                        .port(network_port(config)?)
                        .username(&config.user)
                        .database(&config.database_name)
                        .ssl_mode(mysql_ssl_mode(config.tls_mode));
                    if let Some(password) = &config.password {
                        options = options.password(password.expose_secret());
                    }
                    options
                }
            };

            let pool = pool_options::<sqlx::MySql>(&config.pool).connect_lazy_with(options);
            Ok(Arc::new(SqlxConnectionPool::new(
                pool,
                config.provider,
                acquire_timeout,
            )))
        }
        DatabaseProvider::Sqlite => {
            let options = match &config.connection_string {
                Some(url) => SqliteConnectOptions::from_str(url.expose_secret())?,
                None => SqliteConnectOptions::new()
                    .filename(&config.database_name)
                    .create_if_missing(true),
            };

            let pool = pool_options::<sqlx::Sqlite>(&config.pool).connect_lazy_with(options);
            Ok(Arc::new(SqlxConnectionPool::new(
                pool,
                config.provider,
                acquire_timeout,
            )))
        }
    }
}

fn pool_options<DB: sqlx::Database>(config: &DatabasePoolConfig) -> PoolOptions<DB> {
    PoolOptions::<DB>::new()
        .max_connections(config.max_connections)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.connect_timeout)
}

fn network_port(config: &DatabaseConfiguration) -> Result<u16, DatabaseConfigurationError> {
    let port = config.port();
    u16::try_from(port).map_err(|e| DatabaseConfigurationError::InvalidValue {
        name: ENV_DB_PORT,
        value: port.to_string(),
        reason: e.to_string(),
    })
}

fn pg_ssl_mode(tls_mode: DatabaseTlsMode) -> PgSslMode {
    match tls_mode {
        DatabaseTlsMode::Disable => PgSslMode::Disable,
        DatabaseTlsMode::Prefer => PgSslMode::Prefer,
        DatabaseTlsMode::Require => PgSslMode::Require,
        DatabaseTlsMode::VerifyCa => PgSslMode::VerifyCa,
        DatabaseTlsMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn mysql_ssl_mode(tls_mode: DatabaseTlsMode) -> MySqlSslMode {
    match tls_mode {
        DatabaseTlsMode::Disable => MySqlSslMode::Disabled,
        DatabaseTlsMode::Prefer => MySqlSslMode::Preferred,
        DatabaseTlsMode::Require => MySqlSslMode::Required,
        DatabaseTlsMode::VerifyCa => MySqlSslMode::VerifyCa,
        DatabaseTlsMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
