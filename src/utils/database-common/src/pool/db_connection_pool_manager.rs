// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::{
    ConnectionRemovalReason,
    DatabaseConnectionPool,
    DatabaseError,
    DatabasePoolConfig,
    DatabasePoolEvent,
    DatabasePoolObserver,
    DatabaseProvider,
    PooledConnection,
    TransactionOptions,
    TransactionSettingsPlacement,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabasePoolStatus {
    pub size: u32,
    pub idle: usize,
    pub active: usize,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Process-wide owner of the physical pool. Hands out [`PooledConnection`]s
/// with per-transaction session settings applied and keeps track of how many
/// are checked out.
pub struct DatabaseConnectionPoolManager {
    pool: Arc<dyn DatabaseConnectionPool>,
    config: DatabasePoolConfig,
    state: Arc<PoolManagerState>,
}

impl DatabaseConnectionPoolManager {
    pub fn new(pool: Arc<dyn DatabaseConnectionPool>, config: DatabasePoolConfig) -> Self {
        Self {
            pool,
            config,
            state: Arc::new(PoolManagerState::default()),
        }
    }

    pub fn provider(&self) -> DatabaseProvider {
        self.pool.provider()
    }

    pub fn config(&self) -> &DatabasePoolConfig {
        &self.config
    }

    pub fn subscribe(&self, observer: Arc<dyn DatabasePoolObserver>) {
        self.state.observers.write().unwrap().push(observer);
    }

    /// Acquires a connection, waiting at most `connect_timeout` for a free
    /// slot. Settings from `options` are issued right away on providers that
    /// apply `SET TRANSACTION` to the next transaction; elsewhere they are left
    /// for the transaction manager to issue after `BEGIN`.
    #[tracing::instrument(level = "debug", skip_all, fields(provider = %self.provider()))]
    pub async fn get_connection(
        &self,
        options: Option<&TransactionOptions>,
    ) -> Result<PooledConnection, DatabaseError> {
        if self.state.disposed.load(Ordering::Acquire) {
            return Err(DatabaseError::PoolClosed);
        }

        let timeout = self.config.connect_timeout;
        let raw_connection = match tokio::time::timeout(timeout, self.pool.acquire()).await {
            Ok(Ok(raw_connection)) => raw_connection,
            Ok(Err(e)) => {
                self.report_pool_error(&e);
                return Err(e);
            }
            Err(_) => {
                let e = DatabaseError::AcquireTimeout { timeout };
                self.report_pool_error(&e);
                return Err(e);
            }
        };

        let active_connections = self.state.on_connection_acquired();
        tracing::debug!(active_connections, "Database connection acquired");

        let mut connection =
            PooledConnection::new(raw_connection, self.provider(), self.state.clone());

        let settings_before_begin = self.provider().transaction_settings_placement()
            == TransactionSettingsPlacement::BeforeBegin;

        if let Some(options) = options.filter(|o| o.has_settings() && settings_before_begin) {
            if let Err(e) = connection.apply_transaction_settings(options).await {
                tracing::error!(
                    error = ?e,
                    error_msg = %e,
                    "Failed to apply session settings, discarding connection"
                );
                // Statements that did succeed stay queued for the session's
                // next transaction
                connection.mark_broken();
                self.release_connection(Some(connection));
                return Err(e);
            }
        }

        Ok(connection)
    }

    /// Gives a connection back to the pool. `None` is accepted and ignored.
    /// Broken sessions are closed rather than reused.
    pub fn release_connection(&self, connection: Option<PooledConnection>) {
        let Some(mut connection) = connection else {
            return;
        };

        let broken = connection.is_broken();
        let Some(raw_connection) = connection.take_connection() else {
            return;
        };

        if broken {
            tracing::warn!("Discarding broken database connection");
            raw_connection.discard();
            self.state
                .on_connection_removed(ConnectionRemovalReason::Broken);
        } else {
            drop(raw_connection);
            let active_connections = self.state.on_connection_released();
            tracing::debug!(active_connections, "Database connection released");
        }
    }

    /// Closes the pool. Later acquisitions fail with
    /// [`DatabaseError::PoolClosed`], repeated calls are no-ops once the pool
    /// has closed successfully. A failed close leaves the manager usable.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn dispose(&self) -> Result<(), DatabaseError> {
        if self.state.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Err(e) = self.pool.close().await {
            self.report_pool_error(&e);
            // Not closed yet, a later call retries
            self.state.disposed.store(false, Ordering::Release);
            return Err(e);
        }

        tracing::info!(
            active_connections = self.active_connections(),
            "Database connection pool disposed"
        );
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::Acquire)
    }

    pub fn active_connections(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    pub fn pool_status(&self) -> DatabasePoolStatus {
        DatabasePoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            active: self.active_connections(),
        }
    }

    fn report_pool_error(&self, e: &DatabaseError) {
        tracing::error!(error = ?e, error_msg = %e, "Database pool error");
        self.state.notify(&DatabasePoolEvent::PoolError {
            message: e.to_string(),
        });
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Shared between the manager and every connection it handed out, so that a
/// connection dropped without release still updates the counters
#[derive(Default)]
pub(crate) struct PoolManagerState {
    active: AtomicUsize,
    disposed: AtomicBool,
    observers: RwLock<Vec<Arc<dyn DatabasePoolObserver>>>,
}

impl PoolManagerState {
    fn on_connection_acquired(&self) -> usize {
        let active_connections = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.notify(&DatabasePoolEvent::ConnectionAcquired { active_connections });
        active_connections
    }

    fn on_connection_released(&self) -> usize {
        let active_connections = self.decrement_active();
        self.notify(&DatabasePoolEvent::ConnectionReleased { active_connections });
        active_connections
    }

    pub(crate) fn on_connection_removed(&self, reason: ConnectionRemovalReason) {
        let active_connections = self.decrement_active();
        self.notify(&DatabasePoolEvent::ConnectionRemoved {
            reason,
            active_connections,
        });
    }

    fn decrement_active(&self) -> usize {
        let previous = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or_default();
        previous.saturating_sub(1)
    }

    fn notify(&self, event: &DatabasePoolEvent) {
        let observers = self.observers.read().unwrap();
        for observer in observers.iter() {
            observer.on_pool_event(event);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
