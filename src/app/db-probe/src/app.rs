// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::{Duration, Instant};

use database_common::*;
use dill::CatalogBuilder;
use futures::FutureExt;
use internal_error::{InternalError, ResultIntoInternal};
use observability::metrics::MetricsProvider;
use time_source::SystemTimeSourceDefault;

use crate::cli::{Cli, OutputFormat};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Configuration(#[from] DatabaseConfigurationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

pub async fn run(args: Cli) -> Result<(), ProbeError> {
    let db_configuration = DatabaseConfiguration::from_env()?;
    let watchdog_config = TransactionWatchdogConfig {
        long_running_threshold: Duration::from_secs(args.long_running_threshold_secs),
        ..Default::default()
    };

    let mut b = CatalogBuilder::new();
    b.add::<SystemTimeSourceDefault>();
    DatabasePlugin::init_database_components(&mut b, &db_configuration, watchdog_config)?;
    let catalog = b.build();

    let factory = catalog.get_one::<TransactionManagerFactory>().int_err()?;
    let pool_manager = factory.pool_manager().clone();

    let options = TransactionOptions {
        isolation_level: args.isolation_level.map(Into::into),
        read_only: args.read_only.then_some(true),
    };

    dispose_after(&pool_manager, async {
        let probe_res = run_probes(&factory, options, &args).await;
        let report_res = report(&catalog, &factory, &args).await;
        probe_res.and(report_res)
    })
    .await
}

/// Awaits `work`, then closes the pool whatever the outcome. An error from
/// `work` takes precedence over a failure to close.
async fn dispose_after<T>(
    pool_manager: &DatabaseConnectionPoolManager,
    work: impl Future<Output = Result<T, ProbeError>>,
) -> Result<T, ProbeError> {
    let res = work.await;

    match (res, pool_manager.dispose().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), dispose_res) => {
            if let Err(dispose_err) = dispose_res {
                tracing::error!(
                    error = ?dispose_err,
                    error_msg = %dispose_err,
                    "Failed to dispose database pool"
                );
            }
            Err(e)
        }
    }
}

async fn report(
    catalog: &dill::Catalog,
    factory: &TransactionManagerFactory,
    args: &Cli,
) -> Result<(), ProbeError> {
    if let Some(watch_secs) = args.watch_secs {
        let watchdog = catalog
            .get_one::<LongRunningTransactionWatchdog>()
            .int_err()?;
        let handle = watchdog.spawn();
        tokio::time::sleep(Duration::from_secs(watch_secs)).await;
        handle.stop().await;
    }

    print_metrics(catalog, factory.metrics(), args.output)
}

async fn run_probes(
    factory: &Arc<TransactionManagerFactory>,
    options: TransactionOptions,
    args: &Cli,
) -> Result<(), ProbeError> {
    let runner = DatabaseTransactionRunner::new(factory.clone());

    for iteration in 1..=args.iterations {
        let query = args.query.clone();
        let started = Instant::now();

        runner
            .transactional(options, move |tm| {
                async move {
                    tm.client()?.execute(&query).await?;
                    Ok::<_, ProbeError>(())
                }
                .boxed()
            })
            .await?;

        tracing::info!(
            iteration,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            pool_status = ?factory.pool_manager().pool_status(),
            "Probe transaction committed"
        );
    }

    Ok(())
}

fn print_metrics(
    catalog: &dill::Catalog,
    metrics: &TransactionMetrics,
    output: OutputFormat,
) -> Result<(), ProbeError> {
    match output {
        OutputFormat::Summary => println!("{}", metrics.summary()),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&metrics.snapshot()).int_err()?;
            println!("{json}");
        }
        OutputFormat::Prometheus => {
            let providers = catalog
                .get::<dill::AllOf<dyn MetricsProvider>>()
                .int_err()?;
            let registry = observability::metrics::register_all(&providers).int_err()?;
            print!(
                "{}",
                observability::metrics::render_text(&registry).int_err()?
            );
        }
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////


////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
