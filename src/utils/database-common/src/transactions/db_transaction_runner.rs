// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{
    DatabaseTransactionManager,
    TransactionError,
    TransactionManagerFactory,
    TransactionOptions,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Runs a callback inside a fresh transaction: commits when it succeeds and
/// rolls back when it fails
pub struct DatabaseTransactionRunner {
    factory: Arc<TransactionManagerFactory>,
}

impl DatabaseTransactionRunner {
    pub fn new(factory: Arc<TransactionManagerFactory>) -> Self {
        Self { factory }
    }

    /// A failing rollback is only logged, the callback's own error is what the
    /// caller receives
    pub async fn transactional<F, T, E>(
        &self,
        options: TransactionOptions,
        callback: F,
    ) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut DatabaseTransactionManager) -> BoxFuture<'a, Result<T, E>>,
        E: From<TransactionError> + std::fmt::Display,
    {
        let mut transaction_manager = self.factory.create_transaction_manager();
        transaction_manager.begin_transaction(options).await?;

        match callback(&mut transaction_manager).await {
            Ok(value) => {
                transaction_manager.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = transaction_manager.rollback().await {
                    tracing::error!(
                        error = ?rollback_err,
                        error_msg = %rollback_err,
                        primary_error = %e,
                        "Rollback failed after transactional operation error"
                    );
                }
                Err(e)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
