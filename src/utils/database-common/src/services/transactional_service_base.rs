// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use crate::{
    DatabaseTransactionManager,
    IsolationLevel,
    TransactionManagerFactory,
    TransactionOptions,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Convenience wrapper for services that can carry on without a transaction.
///
/// Every operation reports failure as `false` after logging it. Callers that
/// need the error itself should use [`DatabaseTransactionManager`] directly.
pub struct TransactionalServiceBase {
    factory: Arc<TransactionManagerFactory>,
    current: Option<DatabaseTransactionManager>,
}

impl TransactionalServiceBase {
    pub fn new(factory: Arc<TransactionManagerFactory>) -> Self {
        Self {
            factory,
            current: None,
        }
    }

    /// Starts a transaction on a fresh manager unless one is already active
    /// on the current manager
    pub async fn begin_transaction(
        &mut self,
        isolation_level: Option<IsolationLevel>,
        read_only: Option<bool>,
    ) -> bool {
        let options = TransactionOptions {
            isolation_level,
            read_only,
        };

        let needs_fresh_manager = self
            .current
            .as_ref()
            .is_none_or(|tm| tm.status().is_terminal());
        if needs_fresh_manager {
            self.current = Some(self.factory.create_transaction_manager());
        }

        let Some(transaction_manager) = self.current.as_mut() else {
            return false;
        };

        match transaction_manager.begin_transaction(options).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = ?e,
                    error_msg = %e,
                    "Could not begin transaction, continuing without one"
                );
                false
            }
        }
    }

    pub async fn commit_transaction(&mut self) -> bool {
        let Some(transaction_manager) = self.current.as_mut() else {
            tracing::warn!("Commit requested but no transaction was ever started");
            return false;
        };

        match transaction_manager.commit().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = ?e, error_msg = %e, "Failed to commit transaction");
                false
            }
        }
    }

    pub async fn rollback_transaction(&mut self) -> bool {
        let Some(transaction_manager) = self.current.as_mut() else {
            return true;
        };

        match transaction_manager.rollback().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = ?e, error_msg = %e, "Failed to roll back transaction");
                false
            }
        }
    }

    pub fn is_transaction_active(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(DatabaseTransactionManager::is_active)
    }

    /// Manager of the most recent transaction, e.g. to reach its client
    pub fn transaction_manager(&mut self) -> Option<&mut DatabaseTransactionManager> {
        self.current.as_mut()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
