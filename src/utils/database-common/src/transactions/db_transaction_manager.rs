// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use internal_error::ResultIntoInternal;

use crate::{
    DatabaseConnectionPoolManager,
    DatabaseError,
    NoActiveTransactionError,
    PooledConnection,
    TransactionAlreadyInProgressError,
    TransactionError,
    TransactionId,
    TransactionManagerCompletedError,
    TransactionMetrics,
    TransactionMetricsSnapshot,
    TransactionMetricsSummary,
    TransactionOptions,
    TransactionRecord,
    TransactionStatus,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Unit of work over a single pooled connection.
///
/// An instance runs at most one transaction: once it commits, rolls back or
/// fails, it stays in that final status and a new manager is needed for the
/// next transaction. The connection is held only while the transaction is
/// active and is given back to the pool on every exit path.
pub struct DatabaseTransactionManager {
    pool_manager: Arc<DatabaseConnectionPoolManager>,
    metrics: Arc<TransactionMetrics>,
    state: TransactionState,
}

enum TransactionState {
    Inactive,
    Active(ActiveTransaction),
    Completed(TransactionStatus),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TransactionOutcome {
    Commit,
    Rollback,
}

impl DatabaseTransactionManager {
    pub fn new(
        pool_manager: Arc<DatabaseConnectionPoolManager>,
        metrics: Arc<TransactionMetrics>,
    ) -> Self {
        Self {
            pool_manager,
            metrics,
            state: TransactionState::Inactive,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TransactionState::Active(_))
    }

    pub fn status(&self) -> TransactionStatus {
        match &self.state {
            TransactionState::Inactive => TransactionStatus::Inactive,
            TransactionState::Active(_) => TransactionStatus::Active,
            TransactionState::Completed(status) => *status,
        }
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        match &self.state {
            TransactionState::Active(active) => Some(active.record.id),
            TransactionState::Inactive | TransactionState::Completed(_) => None,
        }
    }

    pub fn options(&self) -> Option<&TransactionOptions> {
        match &self.state {
            TransactionState::Active(active) => Some(&active.record.options),
            TransactionState::Inactive | TransactionState::Completed(_) => None,
        }
    }

    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(isolation_level = ?options.isolation_level, read_only = ?options.read_only)
    )]
    pub async fn begin_transaction(
        &mut self,
        options: TransactionOptions,
    ) -> Result<(), TransactionError> {
        match &self.state {
            TransactionState::Inactive => {}
            TransactionState::Active(active) => {
                let err = TransactionAlreadyInProgressError {
                    active_transaction_id: active.record.id,
                };
                tracing::error!(
                    active_transaction_id = %active.record.id,
                    "Transaction already in progress on this manager"
                );
                self.record_begin_failure(options, &err);
                return Err(err.into());
            }
            TransactionState::Completed(status) => {
                return Err(TransactionManagerCompletedError { status: *status }.into());
            }
        }

        let attempted_at = self.metrics.now();
        match Self::open_transaction(&self.pool_manager, &options).await {
            Ok(connection) => {
                let record = TransactionRecord::started(
                    TransactionId::new_random(),
                    options,
                    self.metrics.now(),
                );
                self.metrics.on_transaction_started(&record);

                tracing::debug!(
                    transaction_id = %record.id,
                    active_connections = self.pool_manager.active_connections(),
                    "Transaction started"
                );

                self.state = TransactionState::Active(ActiveTransaction {
                    record,
                    connection: Some(connection),
                    metrics: self.metrics.clone(),
                });
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = ?e, error_msg = %e, "Failed to begin transaction");

                let mut record =
                    TransactionRecord::started(TransactionId::new_random(), options, attempted_at);
                record.finish(
                    TransactionStatus::Failed,
                    self.metrics.now(),
                    Some(e.to_string()),
                );
                self.metrics.on_transaction_begin_failed(record);

                self.state = TransactionState::Completed(TransactionStatus::Failed);
                Err(e.into())
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(transaction_id = ?self.transaction_id()))]
    pub async fn commit(&mut self) -> Result<(), TransactionError> {
        let active = self.take_active("commit")?;
        self.finish(active, TransactionOutcome::Commit).await
    }

    /// Rolling back without an active transaction is a no-op, so that
    /// cleanup paths can call it unconditionally
    #[tracing::instrument(level = "debug", skip_all, fields(transaction_id = ?self.transaction_id()))]
    pub async fn rollback(&mut self) -> Result<(), TransactionError> {
        if !self.is_active() {
            tracing::debug!(
                status = %self.status(),
                "No active transaction to roll back, ignoring"
            );
            return Ok(());
        }

        let active = self.take_active("rollback")?;
        self.finish(active, TransactionOutcome::Rollback).await
    }

    /// Connection of the active transaction. Statements issued through it run
    /// inside the transaction.
    pub fn client(&mut self) -> Result<&mut PooledConnection, TransactionError> {
        match &mut self.state {
            TransactionState::Active(active) => active.connection.as_mut().ok_or_else(|| {
                NoActiveTransactionError {
                    operation: "get client for",
                }
                .into()
            }),
            TransactionState::Inactive | TransactionState::Completed(_) => {
                Err(NoActiveTransactionError {
                    operation: "get client for",
                }
                .into())
            }
        }
    }

    /// Connection from the same pool that is not part of this unit of work.
    /// The caller gives it back with
    /// [`Self::release_standalone_client`].
    pub fn get_standalone_client(
        &self,
    ) -> impl Future<Output = Result<PooledConnection, TransactionError>> + Send + use<> {
        let pool_manager = self.pool_manager.clone();
        async move {
            let connection = pool_manager
                .get_connection(None)
                .await
                .context_int_err("acquiring standalone database connection")?;
            Ok(connection)
        }
    }

    pub fn release_standalone_client(&self, connection: PooledConnection) {
        self.pool_manager.release_connection(Some(connection));
    }

    pub fn metrics(&self) -> TransactionMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics_summary(&self) -> TransactionMetricsSummary {
        self.metrics.summary()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Acquires a connection and opens the transaction on it. Whatever fails
    /// after acquisition, the connection is released (or discarded, if it may
    /// carry queued session settings) before the error is returned.
    async fn open_transaction(
        pool_manager: &DatabaseConnectionPoolManager,
        options: &TransactionOptions,
    ) -> Result<PooledConnection, DatabaseError> {
        let mut connection = pool_manager.get_connection(Some(options)).await?;
        let provider = connection.provider();

        if let Err(e) = connection.execute(provider.begin_statement()).await {
            // Settings issued at acquisition would leak into the next borrower
            if connection.transaction_settings_applied() {
                connection.mark_broken();
            }
            pool_manager.release_connection(Some(connection));
            return Err(e);
        }

        if !connection.transaction_settings_applied() {
            if let Err(e) = connection.apply_transaction_settings(options).await {
                if let Err(rollback_err) = connection.execute(provider.rollback_statement()).await
                {
                    tracing::error!(
                        error = ?rollback_err,
                        error_msg = %rollback_err,
                        "Failed to roll back partially opened transaction"
                    );
                    connection.mark_broken();
                }
                pool_manager.release_connection(Some(connection));
                return Err(e);
            }
        }

        Ok(connection)
    }

    fn take_active(&mut self, operation: &'static str) -> Result<ActiveTransaction, TransactionError> {
        // Until `finish` settles the final status, an interrupted commit or
        // rollback leaves the manager failed
        let placeholder = TransactionState::Completed(TransactionStatus::Failed);
        match std::mem::replace(&mut self.state, placeholder) {
            TransactionState::Active(active) => Ok(active),
            other => {
                self.state = other;
                Err(NoActiveTransactionError { operation }.into())
            }
        }
    }

    async fn finish(
        &mut self,
        mut active: ActiveTransaction,
        outcome: TransactionOutcome,
    ) -> Result<(), TransactionError> {
        let res = match active.connection.as_mut() {
            Some(connection) => {
                let statement = match outcome {
                    TransactionOutcome::Commit => connection.provider().commit_statement(),
                    TransactionOutcome::Rollback => connection.provider().rollback_statement(),
                };
                let res = connection.execute(statement).await;
                if res.is_err() {
                    // Session state is unknown after a failed COMMIT/ROLLBACK
                    connection.mark_broken();
                }
                res
            }
            None => Err(DatabaseError::PoolClosed),
        };

        // The only release point for a transaction's connection
        self.pool_manager
            .release_connection(active.connection.take());

        let status = match (&res, outcome) {
            (Ok(()), TransactionOutcome::Commit) => TransactionStatus::Committed,
            (Ok(()), TransactionOutcome::Rollback) => TransactionStatus::RolledBack,
            (Err(_), _) => TransactionStatus::Failed,
        };

        let mut record = active.record.clone();
        record.finish(
            status,
            self.metrics.now(),
            res.as_ref().err().map(ToString::to_string),
        );
        let transaction_id = record.id;
        let duration = record.duration.unwrap_or_default();
        self.metrics.on_transaction_finished(record);
        self.state = TransactionState::Completed(status);

        match res {
            Ok(()) => {
                tracing::debug!(
                    %transaction_id,
                    %status,
                    duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    "Transaction finished"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    %transaction_id,
                    ?outcome,
                    error = ?e,
                    error_msg = %e,
                    "Transaction failed to finish"
                );
                Err(e.into())
            }
        }
    }

    fn record_begin_failure(&self, options: TransactionOptions, err: &dyn std::error::Error) {
        let now = self.metrics.now();
        let mut record = TransactionRecord::started(TransactionId::new_random(), options, now);
        record.finish(TransactionStatus::Failed, now, Some(err.to_string()));
        self.metrics.on_transaction_begin_failed(record);
    }
}

impl std::fmt::Debug for DatabaseTransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseTransactionManager")
            .field("status", &self.status())
            .field("transaction_id", &self.transaction_id())
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

struct ActiveTransaction {
    record: TransactionRecord,
    /// Present until the transaction is finished through its manager
    connection: Option<PooledConnection>,
    metrics: Arc<TransactionMetrics>,
}

impl Drop for ActiveTransaction {
    fn drop(&mut self) {
        if self.connection.is_none() {
            return;
        }

        tracing::warn!(
            transaction_id = %self.record.id,
            "Transaction abandoned while active, its connection will be closed"
        );

        let mut record = self.record.clone();
        record.finish(
            TransactionStatus::Failed,
            self.metrics.now(),
            Some(String::from("abandoned")),
        );
        self.metrics.on_transaction_finished(record);

        // Dropping the connection closes the session, the server rolls back
        self.connection = None;
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
