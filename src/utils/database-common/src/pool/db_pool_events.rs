// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionRemovalReason {
    /// Session failed at the protocol level or left a transaction in an
    /// unknown state
    Broken,
    /// Handle was dropped instead of being released through the pool manager
    DroppedWithoutRelease,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabasePoolEvent {
    ConnectionAcquired {
        active_connections: usize,
    },
    ConnectionReleased {
        active_connections: usize,
    },
    ConnectionRemoved {
        reason: ConnectionRemovalReason,
        active_connections: usize,
    },
    PoolError {
        message: String,
    },
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Receives pool health notifications. Called synchronously on the task that
/// caused the event, so implementations must not block.
pub trait DatabasePoolObserver: Send + Sync {
    fn on_pool_event(&self, event: &DatabasePoolEvent);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
