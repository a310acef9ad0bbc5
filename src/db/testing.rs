//! In-memory stand-in for the procedure store, used by unit tests.

use r2d2::ManageConnection;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

use super::{PoolSettings, ProcArg, ProcedureConnection, StoreRow, TransactionRunner};

#[derive(Error, Debug, Clone)]
#[error("mock store error: {0}")]
pub struct MockError(pub String);

#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub isolation_sets: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub calls: Vec<(String, Vec<ProcArg>)>,
}

#[derive(Default)]
struct MockState {
    log: MockLog,
    responses: HashMap<String, Result<Vec<StoreRow>, String>>,
}

/// Scripted procedure responses plus a record of every transaction action.
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<MockState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, procedure: &str, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|v| v.as_object().cloned().expect("mock rows must be JSON objects"))
            .collect();
        self.lock()
            .responses
            .insert(procedure.to_string(), Ok(rows));
    }

    pub fn fail(&self, procedure: &str, message: &str) {
        self.lock()
            .responses
            .insert(procedure.to_string(), Err(message.to_string()));
    }

    /// Snapshot of everything recorded so far.
    pub fn log(&self) -> MockLog {
        self.lock().log.clone()
    }

    pub fn manager(&self) -> MockManager {
        MockManager {
            store: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock store poisoned")
    }
}

pub struct MockManager {
    store: MockStore,
}

pub struct MockConnection {
    store: MockStore,
}

impl ManageConnection for MockManager {
    type Connection = MockConnection;
    type Error = MockError;

    fn connect(&self) -> Result<MockConnection, MockError> {
        Ok(MockConnection {
            store: self.store.clone(),
        })
    }

    fn is_valid(&self, _conn: &mut MockConnection) -> Result<(), MockError> {
        Ok(())
    }

    fn has_broken(&self, _conn: &mut MockConnection) -> bool {
        false
    }
}

impl ProcedureConnection for MockConnection {
    type Error = MockError;

    fn set_serializable(&mut self) -> Result<(), MockError> {
        self.store.lock().log.isolation_sets += 1;
        Ok(())
    }

    fn begin(&mut self) -> Result<(), MockError> {
        self.store.lock().log.begins += 1;
        Ok(())
    }

    fn call_procedure(
        &mut self,
        procedure: &str,
        args: &[ProcArg],
    ) -> Result<Vec<StoreRow>, MockError> {
        let mut state = self.store.lock();
        state
            .log
            .calls
            .push((procedure.to_string(), args.to_vec()));
        match state.responses.get(procedure) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(message)) => Err(MockError(message.clone())),
            None => Ok(Vec::new()),
        }
    }

    fn commit(&mut self) -> Result<(), MockError> {
        self.store.lock().log.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), MockError> {
        self.store.lock().log.rollbacks += 1;
        Ok(())
    }
}

pub fn mock_runner(store: &MockStore, max_size: u32) -> TransactionRunner<MockManager> {
    let settings = PoolSettings {
        min_size: 0,
        max_size,
        acquire_timeout: Duration::from_millis(200),
    };
    TransactionRunner::new(store.manager(), &settings).expect("mock pool")
}
