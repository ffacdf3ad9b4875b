// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dill::*;
use observability::metrics::MetricsProvider;
use serde::Serialize;
use serde_with::{DurationMilliSeconds, serde_as};
use time_source::SystemTimeSource;

use crate::{
    ConnectionRemovalReason,
    DatabasePoolEvent,
    DatabasePoolObserver,
    IsolationLevel,
    RingBuffer,
    TransactionId,
    TransactionRecord,
    TransactionStatus,
};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub const TRANSACTION_HISTORY_CAPACITY: usize = 1000;
pub const TRANSACTION_DURATION_SAMPLES_CAPACITY: usize = 1000;

/// Age after which an active transaction is listed in metric snapshots
pub const LONG_RUNNING_TRANSACTION_THRESHOLD: Duration = Duration::from_secs(30);

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// Process-wide aggregate of transaction outcomes, fed by every transaction
/// manager. Also keeps prometheus collectors in sync.
pub struct TransactionMetrics {
    time_source: Arc<dyn SystemTimeSource>,
    state: Mutex<State>,

    pub transactions_started_num_total: prometheus::IntCounter,
    pub transactions_finished_num_total: prometheus::IntCounterVec,
    pub transactions_active_num: prometheus::IntGauge,
    pub transaction_duration_s_hist: prometheus::Histogram,
    pub pool_active_connections_num: prometheus::IntGauge,
    pub pool_errors_num_total: prometheus::IntCounter,
    pub pool_connections_removed_num_total: prometheus::IntCounterVec,
}

struct State {
    counters: TransactionCounters,
    pool_errors: u64,
    active: HashMap<TransactionId, TransactionRecord>,
    history: RingBuffer<TransactionRecord>,
    durations: RingBuffer<Duration>,
    last_reset_at: Option<DateTime<Utc>>,
}

impl State {
    fn new() -> Self {
        Self {
            counters: TransactionCounters::default(),
            pool_errors: 0,
            active: HashMap::new(),
            history: RingBuffer::new(TRANSACTION_HISTORY_CAPACITY),
            durations: RingBuffer::new(TRANSACTION_DURATION_SAMPLES_CAPACITY),
            last_reset_at: None,
        }
    }
}

#[component(pub)]
#[interface(dyn MetricsProvider)]
#[scope(Singleton)]
impl TransactionMetrics {
    pub fn new(time_source: Arc<dyn SystemTimeSource>) -> Self {
        use prometheus::*;

        Self {
            time_source,
            state: Mutex::new(State::new()),
            transactions_started_num_total: IntCounter::new(
                "db_transactions_started_num_total",
                "Number of database transactions that were successfully begun",
            )
            .unwrap(),
            transactions_finished_num_total: IntCounterVec::new(
                Opts::new(
                    "db_transactions_finished_num_total",
                    "Number of database transactions that reached a final status, by status",
                ),
                &["status"],
            )
            .unwrap(),
            transactions_active_num: IntGauge::new(
                "db_transactions_active_num",
                "Number of database transactions currently in progress",
            )
            .unwrap(),
            transaction_duration_s_hist: Histogram::with_opts(HistogramOpts::new(
                "db_transaction_duration_s_hist",
                "Histogram of database transaction durations (in seconds) from BEGIN until \
                 COMMIT or ROLLBACK",
            ))
            .unwrap(),
            pool_active_connections_num: IntGauge::new(
                "db_pool_active_connections_num",
                "Number of connections currently checked out of the database pool",
            )
            .unwrap(),
            pool_errors_num_total: IntCounter::new(
                "db_pool_errors_num_total",
                "Number of database pool acquisition and disposal errors",
            )
            .unwrap(),
            pool_connections_removed_num_total: IntCounterVec::new(
                Opts::new(
                    "db_pool_connections_removed_num_total",
                    "Number of connections closed instead of being returned to the pool, by \
                     reason",
                ),
                &["reason"],
            )
            .unwrap(),
        }
    }
}

impl TransactionMetrics {
    pub fn now(&self) -> DateTime<Utc> {
        self.time_source.now()
    }

    /// Transaction became active
    pub fn on_transaction_started(&self, record: &TransactionRecord) {
        let mut state = self.state.lock().unwrap();
        state.counters.total += 1;
        state.counters.active += 1;
        state.active.insert(record.id, record.clone());

        self.transactions_started_num_total.inc();
        self.transactions_active_num.set(gauge_value(state.active.len()));
    }

    /// Active transaction reached a terminal status
    pub fn on_transaction_finished(&self, record: TransactionRecord) {
        let mut state = self.state.lock().unwrap();

        if state.active.remove(&record.id).is_some() {
            state.counters.active = state.counters.active.saturating_sub(1);
        }
        state.counters.completed += 1;
        match record.status {
            TransactionStatus::Committed => state.counters.committed += 1,
            TransactionStatus::RolledBack => state.counters.rolled_back += 1,
            TransactionStatus::Failed => state.counters.failed += 1,
            TransactionStatus::Inactive | TransactionStatus::Active => {
                tracing::warn!(
                    transaction_id = %record.id,
                    status = %record.status,
                    "Finished transaction reported with non-final status"
                );
            }
        }

        if let Some(duration) = record.duration {
            state.durations.push(duration);
            self.transaction_duration_s_hist
                .observe(duration.as_secs_f64());
        }

        self.transactions_finished_num_total
            .with_label_values(&[record.status.to_string().as_str()])
            .inc();
        self.transactions_active_num.set(gauge_value(state.active.len()));

        state.history.push(record);
    }

    /// A begin attempt that never produced an active transaction, either
    /// because setup failed or because another transaction was in progress
    pub fn on_transaction_begin_failed(&self, record: TransactionRecord) {
        let mut state = self.state.lock().unwrap();
        state.counters.total += 1;
        state.counters.failed += 1;

        self.transactions_finished_num_total
            .with_label_values(&[TransactionStatus::Failed.to_string().as_str()])
            .inc();

        state.history.push(record);
    }

    pub fn snapshot(&self) -> TransactionMetricsSnapshot {
        let now = self.now();
        let state = self.state.lock().unwrap();

        let duration_samples = state.durations.len();
        let (min_duration, max_duration) = state
            .durations
            .iter()
            .fold((None, None), |(min, max): (Option<Duration>, Option<Duration>), d| {
                (
                    Some(min.map_or(*d, |m| m.min(*d))),
                    Some(max.map_or(*d, |m| m.max(*d))),
                )
            });
        let average_duration = u32::try_from(duration_samples)
            .ok()
            .filter(|n| *n > 0)
            .map(|n| state.durations.iter().sum::<Duration>() / n);

        TransactionMetricsSnapshot {
            total_transactions: state.counters.total,
            active_transactions: state.counters.active,
            committed_transactions: state.counters.committed,
            rolled_back_transactions: state.counters.rolled_back,
            failed_transactions: state.counters.failed,
            completed_transactions: state.counters.completed,
            pool_errors: state.pool_errors,
            duration_samples,
            average_duration,
            min_duration,
            max_duration,
            long_running_transactions: Self::collect_long_running(
                &state,
                now,
                LONG_RUNNING_TRANSACTION_THRESHOLD,
            ),
            last_reset_at: state.last_reset_at,
        }
    }

    pub fn summary(&self) -> TransactionMetricsSummary {
        TransactionMetricsSummary::from(&self.snapshot())
    }

    /// Active transactions whose age exceeds the threshold, oldest first
    pub fn long_running_transactions(&self, threshold: Duration) -> Vec<LongRunningTransaction> {
        let now = self.now();
        let state = self.state.lock().unwrap();
        Self::collect_long_running(&state, now, threshold)
    }

    /// Recently finished transactions, oldest first
    pub fn recent_transactions(&self) -> Vec<TransactionRecord> {
        let state = self.state.lock().unwrap();
        state.history.iter().cloned().collect()
    }

    /// Zeroes counters and samples. Transactions still in progress stay
    /// tracked and are counted as the new baseline.
    pub fn reset(&self) {
        let now = self.now();
        let mut state = self.state.lock().unwrap();

        let active = state.active.len() as u64;
        state.counters = TransactionCounters {
            total: active,
            active,
            ..TransactionCounters::default()
        };
        state.pool_errors = 0;
        state.history.clear();
        state.durations.clear();
        state.last_reset_at = Some(now);

        tracing::info!(active_transactions = active, "Transaction metrics reset");
    }

    fn collect_long_running(
        state: &State,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Vec<LongRunningTransaction> {
        let mut res: Vec<_> = state
            .active
            .values()
            .filter_map(|record| {
                let duration = record.elapsed(now);
                (duration > threshold).then(|| LongRunningTransaction {
                    id: record.id,
                    started_at: record.started_at,
                    duration,
                    isolation_level: record.options.isolation_level,
                    read_only: record.options.is_read_only(),
                })
            })
            .collect();

        res.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        res
    }
}

fn gauge_value(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl MetricsProvider for TransactionMetrics {
    fn register(&self, reg: &prometheus::Registry) -> prometheus::Result<()> {
        reg.register(Box::new(self.transactions_started_num_total.clone()))?;
        reg.register(Box::new(self.transactions_finished_num_total.clone()))?;
        reg.register(Box::new(self.transactions_active_num.clone()))?;
        reg.register(Box::new(self.transaction_duration_s_hist.clone()))?;
        reg.register(Box::new(self.pool_active_connections_num.clone()))?;
        reg.register(Box::new(self.pool_errors_num_total.clone()))?;
        reg.register(Box::new(
            self.pool_connections_removed_num_total.clone(),
        ))?;

        Ok(())
    }
}

impl DatabasePoolObserver for TransactionMetrics {
    fn on_pool_event(&self, event: &DatabasePoolEvent) {
        match event {
            DatabasePoolEvent::ConnectionAcquired { active_connections }
            | DatabasePoolEvent::ConnectionReleased { active_connections } => {
                self.pool_active_connections_num
                    .set(gauge_value(*active_connections));
            }
            DatabasePoolEvent::ConnectionRemoved {
                reason,
                active_connections,
            } => {
                self.pool_active_connections_num
                    .set(gauge_value(*active_connections));
                let reason = match reason {
                    ConnectionRemovalReason::Broken => "broken",
                    ConnectionRemovalReason::DroppedWithoutRelease => "dropped_without_release",
                };
                self.pool_connections_removed_num_total
                    .with_label_values(&[reason])
                    .inc();
            }
            DatabasePoolEvent::PoolError { .. } => {
                self.state.lock().unwrap().pool_errors += 1;
                self.pool_errors_num_total.inc();
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCounters {
    pub total: u64,
    pub active: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub failed: u64,
    pub completed: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LongRunningTransaction {
    pub id: TransactionId,
    pub started_at: DateTime<Utc>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "durationMs")]
    pub duration: Duration,
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: bool,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetricsSnapshot {
    pub total_transactions: u64,
    pub active_transactions: u64,
    pub committed_transactions: u64,
    pub rolled_back_transactions: u64,
    pub failed_transactions: u64,
    pub completed_transactions: u64,
    pub pool_errors: u64,
    pub duration_samples: usize,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "averageDurationMs")]
    pub average_duration: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "minDurationMs")]
    pub min_duration: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "maxDurationMs")]
    pub max_duration: Option<Duration>,
    pub long_running_transactions: Vec<LongRunningTransaction>,
    pub last_reset_at: Option<DateTime<Utc>>,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMetricsSummary {
    pub total: u64,
    pub active: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub failed: u64,
    /// Share of finished transactions that committed, `None` until one
    /// finishes
    pub success_rate: Option<f64>,
    pub average_duration_ms: Option<u64>,
    pub long_running: usize,
}

impl From<&TransactionMetricsSnapshot> for TransactionMetricsSummary {
    fn from(value: &TransactionMetricsSnapshot) -> Self {
        let finished = value.committed_transactions
            + value.rolled_back_transactions
            + value.failed_transactions;

        #[allow(clippy::cast_precision_loss)]
        let success_rate =
            (finished > 0).then(|| value.committed_transactions as f64 / finished as f64);

        Self {
            total: value.total_transactions,
            active: value.active_transactions,
            committed: value.committed_transactions,
            rolled_back: value.rolled_back_transactions,
            failed: value.failed_transactions,
            success_rate,
            average_duration_ms: value
                .average_duration
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            long_running: value.long_running_transactions.len(),
        }
    }
}

impl std::fmt::Display for TransactionMetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} active={} committed={} rolled_back={} failed={}",
            self.total, self.active, self.committed, self.rolled_back, self.failed
        )?;
        if let Some(success_rate) = self.success_rate {
            write!(f, " success_rate={:.1}%", success_rate * 100.0)?;
        }
        if let Some(average_duration_ms) = self.average_duration_ms {
            write!(f, " avg_duration={average_duration_ms}ms")?;
        }
        write!(f, " long_running={}", self.long_running)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
