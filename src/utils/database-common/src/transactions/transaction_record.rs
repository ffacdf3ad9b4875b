// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use uuid::Uuid;

use crate::TransactionOptions;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Inactive,
    Active,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::RolledBack | TransactionStatus::Failed
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransactionStatus::Inactive => "inactive",
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::Failed => "failed",
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    pub duration: Option<Duration>,
    pub options: TransactionOptions,
    pub error: Option<String>,
}

impl TransactionRecord {
    pub fn started(id: TransactionId, options: TransactionOptions, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TransactionStatus::Active,
            started_at,
            ended_at: None,
            duration: None,
            options,
            error: None,
        }
    }

    /// Moves the record into a terminal status. Clock skew never produces a
    /// negative duration.
    pub fn finish(
        &mut self,
        status: TransactionStatus,
        ended_at: DateTime<Utc>,
        error: Option<String>,
    ) {
        self.status = status;
        self.ended_at = Some(ended_at);
        self.duration = Some(elapsed_between(self.started_at, ended_at));
        self.error = error;
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        self.duration
            .unwrap_or_else(|| elapsed_between(self.started_at, now))
    }
}

pub(crate) fn elapsed_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
