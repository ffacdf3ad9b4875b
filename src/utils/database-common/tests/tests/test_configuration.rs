// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::HashMap;
use std::time::Duration;

use database_common::*;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

fn from_vars(vars: &[(&str, &str)]) -> Result<DatabaseConfiguration, DatabaseConfigurationError> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    DatabaseConfiguration::from_vars(|name| vars.get(name).cloned())
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[test]
fn test_discrete_postgres_variables_with_defaults() {
    let config = from_vars(&[
        ("DB_HOST", "db.internal"),
        ("DB_NAME", "accounts"),
        ("DB_USER", "svc"),
        ("DB_PASSWORD", "s3cr3t"),
    ])
    .unwrap();

    assert_eq!(config.provider, DatabaseProvider::Postgres);
    assert_eq!(config.host, "db.internal");
    assert_eq!(config.database_name, "accounts");
    assert_eq!(config.user, "svc");
    assert_eq!(config.port(), 5432);
    assert_eq!(config.tls_mode, DatabaseTlsMode::Prefer);
    assert_eq!(config.pool, DatabasePoolConfig::default());
    assert_eq!(config.pool.max_connections, 10);
    assert_eq!(config.pool.idle_timeout, Duration::from_secs(30));
    assert_eq!(config.pool.connect_timeout, Duration::from_secs(5));
    assert_eq!(
        config.password.as_ref().map(|p| p.expose_secret().to_string()),
        Some(String::from("s3cr3t"))
    );
    assert!(config.connection_string.is_none());
}

#[test]
fn test_pool_and_tls_overrides() {
    let config = from_vars(&[
        ("DB_PROVIDER", "mariadb"),
        ("DB_HOST", "localhost"),
        ("DB_PORT", "3307"),
        ("DB_NAME", "app"),
        ("DB_USER", "root"),
        ("DB_MAX_CONNECTIONS", "25"),
        ("DB_IDLE_TIMEOUT_MS", "1500"),
        ("DB_CONNECT_TIMEOUT_MS", "250"),
        ("DB_SSL_MODE", "verify-full"),
    ])
    .unwrap();

    assert_eq!(config.provider, DatabaseProvider::MariaDB);
    assert_eq!(config.port(), 3307);
    assert_eq!(config.tls_mode, DatabaseTlsMode::VerifyFull);
    assert_eq!(
        config.pool,
        DatabasePoolConfig::new(25)
            .with_idle_timeout(Duration::from_millis(1500))
            .with_connect_timeout(Duration::from_millis(250))
    );
}

#[test]
fn test_connection_string_replaces_discrete_fields() {
    let config = from_vars(&[("DATABASE_URL", "mysql://root:pw@localhost:3306/app")]).unwrap();

    assert_eq!(config.provider, DatabaseProvider::MySql);
    assert_eq!(config.host, "");
    assert_eq!(
        config
            .connection_string
            .as_ref()
            .map(|s| s.expose_secret().to_string()),
        Some(String::from("mysql://root:pw@localhost:3306/app"))
    );
    assert_eq!(config.display_target(), "mysql://<connection string>");
}

#[test]
fn test_sqlite_needs_only_database_name() {
    let config = from_vars(&[("DB_PROVIDER", "sqlite"), ("DB_NAME", "/tmp/app.db")]).unwrap();

    assert_eq!(config.provider, DatabaseProvider::Sqlite);
    assert_eq!(config.display_target(), "sqlite:///tmp/app.db");
}

#[test]
fn test_missing_required_variable() {
    let res = from_vars(&[("DB_NAME", "app"), ("DB_USER", "svc")]);

    assert!(
        matches!(
            res,
            Err(DatabaseConfigurationError::MissingVariable { name: "DB_HOST" })
        ),
        "{res:?}"
    );
}

#[test]
fn test_blank_variable_counts_as_missing() {
    let res = from_vars(&[("DB_HOST", "  "), ("DB_NAME", "app"), ("DB_USER", "svc")]);

    assert!(
        matches!(
            res,
            Err(DatabaseConfigurationError::MissingVariable { name: "DB_HOST" })
        ),
        "{res:?}"
    );
}

#[test]
fn test_invalid_values_name_the_variable() {
    let base = [("DB_HOST", "h"), ("DB_NAME", "n"), ("DB_USER", "u")];

    let res = from_vars(&[&base[..], &[("DB_MAX_CONNECTIONS", "0")]].concat());
    assert!(
        matches!(
            res,
            Err(DatabaseConfigurationError::InvalidValue {
                name: "DB_MAX_CONNECTIONS",
                ..
            })
        ),
        "{res:?}"
    );

    let res = from_vars(&[&base[..], &[("DB_CONNECT_TIMEOUT_MS", "soon")]].concat());
    assert!(
        matches!(
            res,
            Err(DatabaseConfigurationError::InvalidValue {
                name: "DB_CONNECT_TIMEOUT_MS",
                ..
            })
        ),
        "{res:?}"
    );

    let res = from_vars(&[&base[..], &[("DB_CONNECT_TIMEOUT_MS", "0")]].concat());
    match res {
        Err(DatabaseConfigurationError::InvalidValue { name, value, .. }) => {
            assert_eq!(name, "DB_CONNECT_TIMEOUT_MS");
            assert_eq!(value, "0");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let res = from_vars(&[&base[..], &[("DB_PROVIDER", "oracle")]].concat());
    assert!(
        matches!(res, Err(DatabaseConfigurationError::UnknownProvider { .. })),
        "{res:?}"
    );

    let res = from_vars(&[&base[..], &[("DB_SSL_MODE", "sometimes")]].concat());
    assert!(
        matches!(res, Err(DatabaseConfigurationError::UnknownTlsMode { .. })),
        "{res:?}"
    );
}

#[test]
fn test_display_target_hides_password() {
    let config = DatabaseConfiguration::local_postgres();

    let target = config.display_target();
    assert_eq!(target, "postgres://root@localhost:5432/app");
    assert!(format!("{config:?}").contains("REDACTED"));
}

#[test]
fn test_pool_config_deserializes_milliseconds() {
    let config: DatabasePoolConfig = serde_json::from_str(
        r#"{
            "maxConnections": 3,
            "connectTimeoutMs": 1200
        }"#,
    )
    .unwrap();

    assert_eq!(
        config,
        DatabasePoolConfig::new(3).with_connect_timeout(Duration::from_millis(1200))
    );
}

#[test]
fn test_provider_statements() {
    assert_eq!(
        DatabaseProvider::Postgres.transaction_settings_placement(),
        TransactionSettingsPlacement::AfterBegin
    );
    assert_eq!(
        DatabaseProvider::MySql.transaction_settings_placement(),
        TransactionSettingsPlacement::BeforeBegin
    );
    assert_eq!(
        DatabaseProvider::Postgres.isolation_level_statement(IsolationLevel::RepeatableRead),
        Some(String::from("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ"))
    );
    assert_eq!(
        DatabaseProvider::MariaDB.access_mode_statement(false),
        Some("SET TRANSACTION READ WRITE")
    );
    assert_eq!(
        DatabaseProvider::Sqlite.isolation_level_statement(IsolationLevel::Serializable),
        None
    );
    assert_eq!(
        DatabaseProvider::from_connection_string("postgresql://u@h/db"),
        Some(DatabaseProvider::Postgres)
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
