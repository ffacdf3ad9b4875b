// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dill::*;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tokio::task::JoinHandle;

use crate::{LongRunningTransaction, TransactionMetrics};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransactionWatchdogConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "scanIntervalMs")]
    pub scan_interval: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "longRunningThresholdMs")]
    pub long_running_threshold: Duration,
}

impl TransactionWatchdogConfig {
    pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
    pub const DEFAULT_LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(5 * 60);
}

impl Default for TransactionWatchdogConfig {
    fn default() -> Self {
        Self {
            scan_interval: Self::DEFAULT_SCAN_INTERVAL,
            long_running_threshold: Self::DEFAULT_LONG_RUNNING_THRESHOLD,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Periodically reports transactions that stay active for too long. Only
/// observes: a stuck transaction is never cancelled or forced to release its
/// connection.
pub struct LongRunningTransactionWatchdog {
    metrics: Arc<TransactionMetrics>,
    config: Arc<TransactionWatchdogConfig>,
    last_report: Mutex<Vec<LongRunningTransaction>>,
}

#[component(pub)]
#[scope(Singleton)]
impl LongRunningTransactionWatchdog {
    pub fn new(metrics: Arc<TransactionMetrics>, config: Arc<TransactionWatchdogConfig>) -> Self {
        Self {
            metrics,
            config,
            last_report: Mutex::new(Vec::new()),
        }
    }
}

impl LongRunningTransactionWatchdog {
    pub fn config(&self) -> &TransactionWatchdogConfig {
        &self.config
    }

    /// Single pass over the active transactions
    pub fn scan(&self) -> Vec<LongRunningTransaction> {
        let long_running = self
            .metrics
            .long_running_transactions(self.config.long_running_threshold);

        for tx in &long_running {
            tracing::warn!(
                transaction_id = %tx.id,
                elapsed_minutes = tx.duration.as_secs() / 60,
                elapsed_ms = u64::try_from(tx.duration.as_millis()).unwrap_or(u64::MAX),
                isolation_level = ?tx.isolation_level,
                read_only = tx.read_only,
                "Long-running database transaction detected"
            );
        }

        if long_running.is_empty() {
            tracing::trace!("No long-running database transactions");
        }

        (*self.last_report.lock().unwrap()).clone_from(&long_running);
        long_running
    }

    /// Result of the most recent scan
    pub fn last_report(&self) -> Vec<LongRunningTransaction> {
        self.last_report.lock().unwrap().clone()
    }

    /// Starts the periodic scan loop on the current tokio runtime. The first
    /// scan happens one interval after start.
    pub fn spawn(self: Arc<Self>) -> TransactionWatchdogHandle {
        let scan_interval = self.config.scan_interval;

        tracing::info!(
            scan_interval_ms = u64::try_from(scan_interval.as_millis()).unwrap_or(u64::MAX),
            threshold_ms =
                u64::try_from(self.config.long_running_threshold.as_millis()).unwrap_or(u64::MAX),
            "Starting long-running transaction watchdog"
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(
                tokio::time::Instant::now() + scan_interval,
                scan_interval,
            );
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.scan();
            }
        });

        TransactionWatchdogHandle { task: Some(task) }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Stops the watchdog loop when stopped explicitly or dropped
pub struct TransactionWatchdogHandle {
    task: Option<JoinHandle<()>>,
}

impl TransactionWatchdogHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Cancellation is the expected outcome
            let _ = task.await;
            tracing::info!("Long-running transaction watchdog stopped");
        }
    }
}

impl Drop for TransactionWatchdogHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
