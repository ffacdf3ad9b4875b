// Copyright Kamu Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::any::Any;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{DatabaseConnection, DatabaseConnectionPool, DatabaseError, DatabaseProvider};

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub connection_id: u64,
    pub sql: String,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct FakeConnectionPoolStats {
    /// Successful acquisitions
    pub acquired: usize,
    /// Connections handed back for reuse
    pub returned: usize,
    /// Connections closed instead of being reused
    pub discarded: usize,
    pub checked_out: usize,
    pub max_checked_out: usize,
    /// Sessions ever opened
    pub opened: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum InjectedFailure {
    StatementError,
    ConnectionLost,
}

#[derive(Default)]
struct State {
    next_connection_id: u64,
    idle: Vec<u64>,
    statements: Vec<RecordedStatement>,
    failures: Vec<(String, InjectedFailure)>,
    failing_acquires: usize,
    failing_closes: usize,
    stats: FakeConnectionPoolStats,
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

/// In-memory pool bounded by a semaphore. Records every statement it is asked
/// to run and can be told to fail statements or acquisitions.
pub struct FakeConnectionPool {
    provider: DatabaseProvider,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<State>>,
}

impl FakeConnectionPool {
    pub fn new(provider: DatabaseProvider, max_size: usize) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(max_size)),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Statements starting with `prefix` (case-insensitive) fail with a
    /// regular statement error, the session stays usable
    pub fn fail_statements_starting_with(&self, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_uppercase(), InjectedFailure::StatementError));
    }

    /// Statements starting with `prefix` (case-insensitive) fail as if the
    /// network connection dropped
    pub fn lose_connection_on_statements_starting_with(&self, prefix: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_uppercase(), InjectedFailure::ConnectionLost));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn fail_next_acquire(&self) {
        self.state.lock().unwrap().failing_acquires += 1;
    }

    /// The next `close` fails and leaves the pool open
    pub fn fail_next_close(&self) {
        self.state.lock().unwrap().failing_closes += 1;
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn statement_texts(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .statements
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    pub fn clear_statements(&self) {
        self.state.lock().unwrap().statements.clear();
    }

    pub fn stats(&self) -> FakeConnectionPoolStats {
        self.state.lock().unwrap().stats
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait::async_trait]
impl DatabaseConnectionPool for FakeConnectionPool {
    fn provider(&self) -> DatabaseProvider {
        self.provider
    }

    async fn acquire(&self) -> Result<Box<dyn DatabaseConnection>, DatabaseError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DatabaseError::PoolClosed)?;

        let mut state = self.state.lock().unwrap();
        if state.failing_acquires > 0 {
            state.failing_acquires -= 1;
            return Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "injected acquisition failure",
            ))
            .into());
        }

        let connection_id = if let Some(id) = state.idle.pop() {
            id
        } else {
            state.next_connection_id += 1;
            state.stats.opened += 1;
            state.next_connection_id
        };

        state.stats.acquired += 1;
        state.stats.checked_out += 1;
        state.stats.max_checked_out = state.stats.max_checked_out.max(state.stats.checked_out);

        Ok(Box::new(FakeConnection {
            connection_id,
            state: self.state.clone(),
            broken: false,
            discarded: false,
            _permit: permit,
        }))
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_closes > 0 {
            state.failing_closes -= 1;
            return Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "injected close failure",
            ))
            .into());
        }

        self.semaphore.close();
        state.idle.clear();
        Ok(())
    }

    fn size(&self) -> u32 {
        let state = self.state.lock().unwrap();
        u32::try_from(state.stats.checked_out + state.idle.len()).unwrap_or(u32::MAX)
    }

    fn num_idle(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////

struct FakeConnection {
    connection_id: u64,
    state: Arc<Mutex<State>>,
    broken: bool,
    discarded: bool,
    // Slot is given back to the pool together with the connection
    _permit: OwnedSemaphorePermit,
}

#[async_trait::async_trait]
impl DatabaseConnection for FakeConnection {
    async fn execute(&mut self, sql: &str) -> Result<(), DatabaseError> {
        // Statements suspend like real network I/O would
        tokio::task::yield_now().await;

        let failure = {
            let mut state = self.state.lock().unwrap();
            state.statements.push(RecordedStatement {
                connection_id: self.connection_id,
                sql: sql.to_string(),
            });

            let normalized = sql.trim_start().to_uppercase();
            state
                .failures
                .iter()
                .find(|(prefix, _)| normalized.starts_with(prefix.as_str()))
                .map(|(_, failure)| *failure)
        };

        match failure {
            None => Ok(()),
            Some(InjectedFailure::StatementError) => Err(DatabaseError::StatementFailed {
                statement: sql.to_string(),
                reason: String::from("injected statement failure"),
            }),
            Some(InjectedFailure::ConnectionLost) => {
                self.broken = true;
                Err(sqlx::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "injected connection loss",
                ))
                .into())
            }
        }
    }

    fn is_broken(&self) -> bool {
        self.broken
    }

    fn discard(mut self: Box<Self>) {
        self.discarded = true;
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stats.checked_out -= 1;
        if self.discarded {
            state.stats.discarded += 1;
        } else {
            state.stats.returned += 1;
            state.idle.push(self.connection_id);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
