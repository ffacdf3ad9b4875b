// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use database_common::*;
use observability::metrics::MetricsProvider;
use pretty_assertions::assert_eq;
use time_source::SystemTimeSourceStub;

use crate::harness::DatabaseHarness;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn finished_record(
    metrics: &TransactionMetrics,
    time_source: &SystemTimeSourceStub,
    status: TransactionStatus,
    duration: Duration,
) -> TransactionRecord {
    let record = TransactionRecord::started(
        TransactionId::new_random(),
        TransactionOptions::default(),
        metrics.now(),
    );
    metrics.on_transaction_started(&record);

    time_source.advance(chrono::Duration::from_std(duration).unwrap());

    let mut record = record;
    record.finish(status, metrics.now(), None);
    metrics.on_transaction_finished(record.clone());
    record
}

fn new_metrics() -> (TransactionMetrics, SystemTimeSourceStub) {
    let time_source = SystemTimeSourceStub::new();
    let metrics = TransactionMetrics::new(Arc::new(time_source.clone()));
    (metrics, time_source)
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test]
fn test_empty_snapshot() {
    let (metrics, _) = new_metrics();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_transactions, 0);
    assert_eq!(snapshot.duration_samples, 0);
    assert_eq!(snapshot.average_duration, None);
    assert_eq!(snapshot.min_duration, None);
    assert_eq!(snapshot.max_duration, None);
    assert_eq!(snapshot.long_running_transactions, vec![]);
    assert_eq!(snapshot.last_reset_at, None);

    let summary = metrics.summary();
    assert_eq!(summary.success_rate, None);
    assert_eq!(
        summary.to_string(),
        "total=0 active=0 committed=0 rolled_back=0 failed=0 long_running=0"
    );
}

#[test]
fn test_duration_statistics() {
    let (metrics, time_source) = new_metrics();

    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::Committed,
        Duration::from_millis(100),
    );
    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::RolledBack,
        Duration::from_millis(300),
    );
    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::Failed,
        Duration::from_millis(200),
    );

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_transactions, 3);
    assert_eq!(snapshot.active_transactions, 0);
    assert_eq!(snapshot.committed_transactions, 1);
    assert_eq!(snapshot.rolled_back_transactions, 1);
    assert_eq!(snapshot.failed_transactions, 1);
    assert_eq!(snapshot.completed_transactions, 3);
    assert_eq!(snapshot.duration_samples, 3);
    assert_eq!(snapshot.min_duration, Some(Duration::from_millis(100)));
    assert_eq!(snapshot.max_duration, Some(Duration::from_millis(300)));
    assert_eq!(snapshot.average_duration, Some(Duration::from_millis(200)));

    assert_eq!(metrics.transactions_started_num_total.get(), 3);
    assert_eq!(metrics.transaction_duration_s_hist.get_sample_count(), 3);
    assert_eq!(
        metrics
            .transactions_finished_num_total
            .with_label_values(&["committed"])
            .get(),
        1
    );
}

#[test]
fn test_repeated_snapshots_are_stable() {
    let (metrics, time_source) = new_metrics();
    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::Committed,
        Duration::from_millis(15),
    );

    assert_eq!(metrics.snapshot(), metrics.snapshot());
}

#[test]
fn test_summary_success_rate() {
    let (metrics, time_source) = new_metrics();

    for status in [
        TransactionStatus::Committed,
        TransactionStatus::Committed,
        TransactionStatus::Committed,
        TransactionStatus::RolledBack,
    ] {
        finished_record(&metrics, &time_source, status, Duration::from_millis(40));
    }

    let summary = metrics.summary();
    assert_eq!(
        summary,
        TransactionMetricsSummary {
            total: 4,
            active: 0,
            committed: 3,
            rolled_back: 1,
            failed: 0,
            success_rate: Some(0.75),
            average_duration_ms: Some(40),
            long_running: 0,
        }
    );
    assert_eq!(
        summary.to_string(),
        "total=4 active=0 committed=3 rolled_back=1 failed=0 success_rate=75.0% \
         avg_duration=40ms long_running=0"
    );
}

#[test]
fn test_long_running_uses_strict_threshold() {
    let (metrics, time_source) = new_metrics();

    let record = TransactionRecord::started(
        TransactionId::new_random(),
        TransactionOptions::new()
            .with_isolation_level(IsolationLevel::RepeatableRead)
            .with_read_only(true),
        metrics.now(),
    );
    metrics.on_transaction_started(&record);

    time_source.advance(chrono::Duration::seconds(30));
    assert_eq!(metrics.snapshot().long_running_transactions, vec![]);

    time_source.advance(chrono::Duration::milliseconds(1));
    assert_eq!(
        metrics.snapshot().long_running_transactions,
        vec![LongRunningTransaction {
            id: record.id,
            started_at: record.started_at,
            duration: Duration::from_millis(30_001),
            isolation_level: Some(IsolationLevel::RepeatableRead),
            read_only: true,
        }]
    );
    assert_eq!(metrics.summary().long_running, 1);

    // Custom thresholds for the watchdog
    assert_eq!(
        metrics
            .long_running_transactions(Duration::from_secs(60))
            .len(),
        0
    );
}

#[test]
fn test_long_running_sorted_oldest_first() {
    let (metrics, time_source) = new_metrics();

    let older =
        TransactionRecord::started(TransactionId::new_random(), TransactionOptions::default(), metrics.now());
    metrics.on_transaction_started(&older);

    time_source.advance(chrono::Duration::seconds(10));
    let newer =
        TransactionRecord::started(TransactionId::new_random(), TransactionOptions::default(), metrics.now());
    metrics.on_transaction_started(&newer);

    time_source.advance(chrono::Duration::minutes(1));

    let ids: Vec<_> = metrics
        .snapshot()
        .long_running_transactions
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![older.id, newer.id]);
}

#[test]
fn test_reset_keeps_active_transactions() {
    let (metrics, time_source) = new_metrics();

    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::Committed,
        Duration::from_millis(10),
    );
    let in_flight =
        TransactionRecord::started(TransactionId::new_random(), TransactionOptions::default(), metrics.now());
    metrics.on_transaction_started(&in_flight);
    metrics.on_pool_event(&DatabasePoolEvent::PoolError {
        message: String::from("boom"),
    });

    let reset_at = time_source.advance(chrono::Duration::seconds(1));
    metrics.reset();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_transactions, 1);
    assert_eq!(snapshot.active_transactions, 1);
    assert_eq!(snapshot.committed_transactions, 0);
    assert_eq!(snapshot.completed_transactions, 0);
    assert_eq!(snapshot.pool_errors, 0);
    assert_eq!(snapshot.duration_samples, 0);
    assert_eq!(snapshot.last_reset_at, Some(reset_at));
    assert_eq!(metrics.recent_transactions(), vec![]);

    // The in-flight transaction still finishes normally
    time_source.advance(chrono::Duration::milliseconds(5));
    let mut in_flight = in_flight;
    in_flight.finish(TransactionStatus::Committed, metrics.now(), None);
    metrics.on_transaction_finished(in_flight);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_transactions, 1);
    assert_eq!(snapshot.active_transactions, 0);
    assert_eq!(snapshot.committed_transactions, 1);
    assert_eq!(snapshot.duration_samples, 1);
}

#[test]
fn test_history_is_bounded() {
    let (metrics, time_source) = new_metrics();

    let mut first = None;
    for _ in 0..=TRANSACTION_HISTORY_CAPACITY {
        let record = finished_record(
            &metrics,
            &time_source,
            TransactionStatus::Committed,
            Duration::from_millis(1),
        );
        first.get_or_insert(record.id);
    }

    let recent = metrics.recent_transactions();
    assert_eq!(recent.len(), TRANSACTION_HISTORY_CAPACITY);
    assert!(recent.iter().all(|r| Some(r.id) != first));
    assert_eq!(
        metrics.snapshot().duration_samples,
        TRANSACTION_DURATION_SAMPLES_CAPACITY
    );
    assert_eq!(
        metrics.snapshot().committed_transactions,
        u64::try_from(TRANSACTION_HISTORY_CAPACITY).unwrap() + 1
    );
}

#[test]
fn test_pool_events_update_collectors() {
    let (metrics, _) = new_metrics();

    metrics.on_pool_event(&DatabasePoolEvent::ConnectionAcquired {
        active_connections: 3,
    });
    assert_eq!(metrics.pool_active_connections_num.get(), 3);

    metrics.on_pool_event(&DatabasePoolEvent::ConnectionRemoved {
        reason: ConnectionRemovalReason::Broken,
        active_connections: 2,
    });
    assert_eq!(metrics.pool_active_connections_num.get(), 2);
    assert_eq!(
        metrics
            .pool_connections_removed_num_total
            .with_label_values(&["broken"])
            .get(),
        1
    );

    metrics.on_pool_event(&DatabasePoolEvent::PoolError {
        message: String::from("timeout"),
    });
    assert_eq!(metrics.snapshot().pool_errors, 1);
    assert_eq!(metrics.pool_errors_num_total.get(), 1);
}

#[test]
fn test_registers_with_prometheus() {
    let (metrics, time_source) = new_metrics();
    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::Committed,
        Duration::from_millis(10),
    );

    let registry = prometheus::Registry::new();
    metrics.register(&registry).unwrap();

    let names: Vec<_> = registry
        .gather()
        .iter()
        .map(|f| f.get_name().to_string())
        .collect();
    assert!(
        names.contains(&String::from("db_transactions_started_num_total")),
        "{names:?}"
    );
    assert!(
        names.contains(&String::from("db_transaction_duration_s_hist")),
        "{names:?}"
    );
}

#[test]
fn test_summary_serializes_camel_case() {
    let (metrics, time_source) = new_metrics();
    finished_record(
        &metrics,
        &time_source,
        TransactionStatus::Committed,
        Duration::from_millis(120),
    );

    let json = serde_json::to_value(metrics.summary()).unwrap();
    assert_eq!(json["committed"], 1);
    assert_eq!(json["averageDurationMs"], 120);
    assert_eq!(json["successRate"], 1.0);
}

#[test_log::test(tokio::test)]
async fn test_manager_exposes_metrics() {
    let harness = DatabaseHarness::new(DatabaseProvider::Postgres);

    let mut tm = harness.transaction_manager();
    tm.begin_transaction(TransactionOptions::default())
        .await
        .unwrap();
    harness.advance_time(Duration::from_millis(75));
    tm.commit().await.unwrap();

    let tm = harness.transaction_manager();
    assert_eq!(tm.metrics().committed_transactions, 1);
    assert_eq!(tm.metrics_summary().average_duration_ms, Some(75));

    tm.reset_metrics();
    assert_eq!(tm.metrics().total_transactions, 0);
    assert_eq!(harness.metrics().snapshot().committed_transactions, 0);
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
