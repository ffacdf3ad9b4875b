// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use database_common::*;
use pretty_assertions::assert_eq;

use crate::harness::DatabaseHarness;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_begin_and_commit() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let mut service = TransactionalServiceBase::new(harness.factory());

    assert!(!service.is_transaction_active());
    assert!(
        service
            .begin_transaction(Some(IsolationLevel::ReadCommitted), Some(false))
            .await
    );
    assert!(service.is_transaction_active());

    service
        .transaction_manager()
        .unwrap()
        .client()
        .unwrap()
        .execute("UPDATE accounts SET balance = 0")
        .await
        .unwrap();

    assert!(service.commit_transaction().await);
    assert!(!service.is_transaction_active());

    assert_eq!(
        harness.pool.statement_texts(),
        vec![
            "BEGIN",
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            "SET TRANSACTION READ WRITE",
            "UPDATE accounts SET balance = 0",
            "COMMIT",
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_fresh_manager_per_transaction() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let mut service = TransactionalServiceBase::new(harness.factory());

    assert!(service.begin_transaction(None, None).await);
    assert!(service.commit_transaction().await);

    assert!(service.begin_transaction(None, None).await);
    assert!(service.rollback_transaction().await);

    let snapshot = harness.metrics().snapshot();
    assert_eq!(snapshot.committed_transactions, 1);
    assert_eq!(snapshot.rolled_back_transactions, 1);
    assert_eq!(harness.released_connections(), 2);
}

#[test_log::test(tokio::test)]
async fn test_begin_while_active_returns_false() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let mut service = TransactionalServiceBase::new(harness.factory());

    assert!(service.begin_transaction(None, None).await);
    let transaction_id = service.transaction_manager().unwrap().transaction_id();

    assert!(!service.begin_transaction(None, None).await);
    assert!(service.is_transaction_active());
    assert_eq!(
        service.transaction_manager().unwrap().transaction_id(),
        transaction_id
    );

    assert!(service.commit_transaction().await);
    assert_eq!(harness.pool.stats().acquired, 1);
}

#[test_log::test(tokio::test)]
async fn test_commit_without_transaction_returns_false() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let mut service = TransactionalServiceBase::new(harness.factory());

    assert!(!service.commit_transaction().await);

    assert!(service.begin_transaction(None, None).await);
    assert!(service.commit_transaction().await);
    assert!(!service.commit_transaction().await);
}

#[test_log::test(tokio::test)]
async fn test_rollback_without_transaction_returns_true() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let mut service = TransactionalServiceBase::new(harness.factory());

    assert!(service.rollback_transaction().await);
    assert_eq!(harness.pool.stats().acquired, 0);
}

#[test_log::test(tokio::test)]
async fn test_failures_are_reported_as_false() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let mut service = TransactionalServiceBase::new(harness.factory());

    harness.pool.fail_statements_starting_with("BEGIN");
    assert!(!service.begin_transaction(None, None).await);
    assert!(!service.is_transaction_active());

    harness.pool.clear_failures();
    harness.pool.fail_statements_starting_with("COMMIT");
    assert!(service.begin_transaction(None, None).await);
    assert!(!service.commit_transaction().await);
    assert!(!service.is_transaction_active());

    harness.pool.clear_failures();
    harness.pool.fail_statements_starting_with("ROLLBACK");
    assert!(service.begin_transaction(None, None).await);
    assert!(!service.rollback_transaction().await);

    assert_eq!(harness.pool.stats().checked_out, 0);
    assert_eq!(harness.pool_manager().active_connections(), 0);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
