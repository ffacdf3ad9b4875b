// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use crate::{DatabaseConnection, DatabaseError, DatabaseProvider};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Physical pool of database sessions. Queueing, backpressure and concurrency
/// safety of acquire/return are the implementation's responsibility.
#[async_trait::async_trait]
pub trait DatabaseConnectionPool: Send + Sync {
    fn provider(&self) -> DatabaseProvider;

    /// Waits for a free session. Dropping the returned connection hands it
    /// back to the pool.
    async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, DatabaseError>;

    async fn close(&self) -> Result<(), DatabaseError>;

    /// Number of sessions currently open, idle or in use
    fn size(&self) -> u32;

    fn num_idle(&self) -> usize;
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
