// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::any::Any;
use std::sync::Arc;

use crate::{
    ConnectionRemovalReason,
    DatabaseError,
    DatabaseProvider,
    PoolManagerState,
    SqlxConnection,
    TransactionOptions,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// A single physical database session checked out of a pool
#[async_trait::async_trait]
pub trait DatabaseConnection: Send {
    /// Runs a statement without bound parameters, discarding any rows
    async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError>;

    /// Whether the session saw a protocol-level failure
    fn is_broken(&self) -> bool;

    /// Closes the session instead of returning it to the pool
    fn discard(self: Box<Self>);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Connection handed out by [`crate::DatabaseConnectionPoolManager`].
///
/// Must be given back via `release_connection`. A handle that is simply
/// dropped is treated as leaked: its session is closed, not reused.
pub struct PooledConnection {
    connection: Option<Box<dyn DatabaseConnection>>,
    provider: DatabaseProvider,
    settings_applied: bool,
    broken: bool,
    pool_state: Arc<PoolManagerState>,
}

impl PooledConnection {
    pub(crate) fn new(
        connection: Box<dyn DatabaseConnection>,
        provider: DatabaseProvider,
        pool_state: Arc<PoolManagerState>,
    ) -> Self {
        Self {
            connection: Some(connection),
            provider,
            settings_applied: false,
            broken: false,
            pool_state,
        }
    }

    pub fn provider(&self) -> DatabaseProvider {
        self.provider
    }

    pub fn is_broken(&self) -> bool {
        self.broken || self.connection.as_ref().is_some_and(|c| c.is_broken())
    }

    /// Prevents the session from going back into the pool on release
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Whether `SET TRANSACTION` statements were already issued for the
    /// transaction this connection is about to run
    pub fn transaction_settings_applied(&self) -> bool {
        self.settings_applied
    }

    pub async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let connection = self.connection.as_mut().ok_or(DatabaseError::PoolClosed)?;

        tracing::trace!(sql, "Executing statement");

        let res = connection.execute(sql).await;
        if matches!(&res, Err(e) if e.is_connection_failure()) {
            self.broken = true;
        }
        res
    }

    /// Typed access to the underlying driver connection, e.g.
    /// `connection_mut::<sqlx::Postgres>()`. Returns `None` when the pool is
    /// backed by a different driver.
    pub fn connection_mut<DB: sqlx::Database>(&mut self) -> Option<&mut DB::Connection> {
        self.connection
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<SqlxConnection<DB>>()
            .map(SqlxConnection::as_driver_connection_mut)
    }

    pub(crate) async fn apply_transaction_settings(
        &mut self,
        options: &TransactionOptions,
    ) -> Result<(), DatabaseError> {
        let isolation_statement = options
            .isolation_level
            .and_then(|level| self.provider.isolation_level_statement(level));
        if let Some(statement) = isolation_statement {
            self.execute(&statement).await?;
        }

        let access_mode_statement = options
            .read_only
            .and_then(|read_only| self.provider.access_mode_statement(read_only));
        if let Some(statement) = access_mode_statement {
            self.execute(statement).await?;
        }

        self.settings_applied = true;
        Ok(())
    }

    /// Detaches the physical session, leaving this handle empty so that its
    /// `Drop` does nothing
    pub(crate) fn take_connection(&mut self) -> Option<Box<dyn DatabaseConnection>> {
        self.connection.take()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("provider", &self.provider)
            .field("settings_applied", &self.settings_applied)
            .field("broken", &self.is_broken())
            .field("released", &self.connection.is_none())
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            tracing::warn!(
                provider = %self.provider,
                "Database connection dropped without release, closing the session"
            );
            connection.discard();
            self.pool_state
                .on_connection_removed(ConnectionRemovalReason::DroppedWithoutRelease);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
