// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::atomic::{AtomicBool, Ordering};

use database_common::*;
use futures::FutureExt;
use pretty_assertions::assert_eq;

use crate::harness::DatabaseHarness;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, thiserror::Error)]
enum TransferError {
    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test_log::test(tokio::test)]
async fn test_commits_on_success() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let runner = DatabaseTransactionRunner::new(harness.factory());

    let res: Result<u32, TransferError> = runner
        .transactional(TransactionOptions::default(), |tm| {
            async move {
                tm.client()?.execute("UPDATE accounts SET balance = 1").await?;
                Ok::<_, TransferError>(42)
            }
            .boxed()
        })
        .await;

    assert_eq!(res.unwrap(), 42);
    assert_eq!(
        harness.pool.statement_texts(),
        vec!["BEGIN", "UPDATE accounts SET balance = 1", "COMMIT"]
    );
    assert_eq!(harness.metrics().snapshot().committed_transactions, 1);
    assert_eq!(harness.released_connections(), 1);
}

#[test_log::test(tokio::test)]
async fn test_rolls_back_on_error() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    let runner = DatabaseTransactionRunner::new(harness.factory());

    let res: Result<(), TransferError> = runner
        .transactional(TransactionOptions::default(), |tm| {
            async move {
                tm.client()?.execute("UPDATE accounts SET balance = 1").await?;
                Err(TransferError::InsufficientFunds)
            }
            .boxed()
        })
        .await;

    assert!(
        matches!(res, Err(TransferError::InsufficientFunds)),
        "{res:?}"
    );
    assert_eq!(
        harness.pool.statement_texts(),
        vec!["BEGIN", "UPDATE accounts SET balance = 1", "ROLLBACK"]
    );
    assert_eq!(harness.metrics().snapshot().rolled_back_transactions, 1);
    assert_eq!(harness.released_connections(), 1);
}

#[test_log::test(tokio::test)]
async fn test_rollback_failure_keeps_original_error() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    harness.pool.fail_statements_starting_with("ROLLBACK");
    let runner = DatabaseTransactionRunner::new(harness.factory());

    let res: Result<(), TransferError> = runner
        .transactional(TransactionOptions::default(), |_| {
            async move { Err(TransferError::InsufficientFunds) }.boxed()
        })
        .await;

    assert!(
        matches!(res, Err(TransferError::InsufficientFunds)),
        "{res:?}"
    );
    assert_eq!(harness.metrics().snapshot().failed_transactions, 1);
    assert_eq!(harness.pool.stats().discarded, 1);
}

#[test_log::test(tokio::test)]
async fn test_begin_failure_skips_callback() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    harness.pool.fail_statements_starting_with("BEGIN");
    let runner = DatabaseTransactionRunner::new(harness.factory());
    let callback_invoked = AtomicBool::new(false);

    let res: Result<(), TransferError> = runner
        .transactional(TransactionOptions::default(), |_| {
            callback_invoked.store(true, Ordering::SeqCst);
            async move { Ok(()) }.boxed()
        })
        .await;

    assert!(!callback_invoked.load(Ordering::SeqCst));

    assert!(
        matches!(res, Err(TransferError::Transaction(TransactionError::Database(_)))),
        "{res:?}"
    );
    assert_eq!(harness.pool.statement_texts(), vec!["BEGIN"]);
    assert_eq!(harness.released_connections(), 1);
}

#[test_log::test(tokio::test)]
async fn test_commit_failure_is_returned() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);
    harness.pool.fail_statements_starting_with("COMMIT");
    let runner = DatabaseTransactionRunner::new(harness.factory());

    let res: Result<(), TransferError> = runner
        .transactional(TransactionOptions::default(), |_| async move { Ok(()) }.boxed())
        .await;

    assert!(
        matches!(res, Err(TransferError::Transaction(TransactionError::Database(_)))),
        "{res:?}"
    );
    assert_eq!(harness.metrics().snapshot().failed_transactions, 1);
    assert_eq!(harness.released_connections(), 1);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
