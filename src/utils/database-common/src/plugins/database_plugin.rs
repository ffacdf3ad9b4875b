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

use crate::*;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Registers the transactional data-access components in a catalog. The
/// catalog is expected to provide a `SystemTimeSource` on its own.
pub struct DatabasePlugin {}

#[component(pub)]
impl DatabasePlugin {
    pub fn new() -> Self {
        Self {}
    }

    pub fn init_database_components(
        catalog_builder: &mut CatalogBuilder,
        db_configuration: &DatabaseConfiguration,
        watchdog_config: TransactionWatchdogConfig,
    ) -> Result<(), DatabaseError> {
        let pool = open_connection_pool(db_configuration)?;

        Self::init_database_components_with_pool(
            catalog_builder,
            pool,
            db_configuration.pool.clone(),
            watchdog_config,
        );

        Ok(())
    }

    /// Same as [`Self::init_database_components`] over an already opened pool
    pub fn init_database_components_with_pool(
        catalog_builder: &mut CatalogBuilder,
        pool: Arc<dyn DatabaseConnectionPool>,
        pool_config: DatabasePoolConfig,
        watchdog_config: TransactionWatchdogConfig,
    ) {
        catalog_builder.add::<Self>();
        catalog_builder.add_value(DatabaseConnectionPoolManager::new(pool, pool_config));
        catalog_builder.add::<TransactionMetrics>();
        catalog_builder.add::<TransactionManagerFactory>();
        catalog_builder.add_value(watchdog_config);
        catalog_builder.add::<LongRunningTransactionWatchdog>();
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
