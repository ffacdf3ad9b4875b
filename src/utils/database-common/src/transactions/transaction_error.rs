// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use internal_error::InternalError;
use thiserror::Error;

use crate::{DatabaseError, TransactionId, TransactionStatus};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error(transparent)]
    AlreadyInProgress(#[from] TransactionAlreadyInProgressError),

    #[error(transparent)]
    NoActiveTransaction(#[from] NoActiveTransactionError),

    #[error(transparent)]
    ManagerCompleted(#[from] TransactionManagerCompletedError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl TransactionError {
    /// Misuse of the unit-of-work protocol by the caller. Never worth
    /// retrying, the call site has to be fixed.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            TransactionError::AlreadyInProgress(_)
                | TransactionError::NoActiveTransaction(_)
                | TransactionError::ManagerCompleted(_)
        )
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
#[error("Internal server error: transaction already in progress ({active_transaction_id})")]
pub struct TransactionAlreadyInProgressError {
    pub active_transaction_id: TransactionId,
}

#[derive(Error, Debug)]
#[error("Internal server error: no active transaction to {operation}")]
pub struct NoActiveTransactionError {
    pub operation: &'static str,
}

#[derive(Error, Debug)]
#[error("Internal server error: transaction manager already completed with status {status}")]
pub struct TransactionManagerCompletedError {
    pub status: TransactionStatus,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
