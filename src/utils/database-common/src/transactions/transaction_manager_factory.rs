// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;

use dill::*;

use crate::{DatabaseConnectionPoolManager, DatabaseTransactionManager, TransactionMetrics};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Process-scoped source of [`DatabaseTransactionManager`]s. Every manager it
/// creates shares the same pool and metrics aggregate.
pub struct TransactionManagerFactory {
    pool_manager: Arc<DatabaseConnectionPoolManager>,
    metrics: Arc<TransactionMetrics>,
}

#[component(pub)]
#[scope(Singleton)]
impl TransactionManagerFactory {
    pub fn new(
        pool_manager: Arc<DatabaseConnectionPoolManager>,
        metrics: Arc<TransactionMetrics>,
    ) -> Self {
        pool_manager.subscribe(metrics.clone());

        Self {
            pool_manager,
            metrics,
        }
    }
}

impl TransactionManagerFactory {
    pub fn create_transaction_manager(&self) -> DatabaseTransactionManager {
        DatabaseTransactionManager::new(self.pool_manager.clone(), self.metrics.clone())
    }

    pub fn pool_manager(&self) -> &Arc<DatabaseConnectionPoolManager> {
        &self.pool_manager
    }

    pub fn metrics(&self) -> &Arc<TransactionMetrics> {
        &self.metrics
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
