use lazy_static::lazy_static;
use r2d2::{ManageConnection, Pool, PooledConnection};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{DataAccessError, ProcArg, StoreRow};

lazy_static! {
    static ref PROCEDURE_NAME: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap();
}

/// The operations the runner needs from a pooled store connection.
pub trait ProcedureConnection {
    type Error: std::error::Error + Send + Sync + 'static;

    fn set_serializable(&mut self) -> Result<(), Self::Error>;
    fn begin(&mut self) -> Result<(), Self::Error>;
    fn call_procedure(&mut self, procedure: &str, args: &[ProcArg])
        -> Result<Vec<StoreRow>, Self::Error>;
    fn commit(&mut self) -> Result<(), Self::Error>;
    fn rollback(&mut self) -> Result<(), Self::Error>;
}

/// Pool bounds and the acquisition policy.
///
/// Checkout waits at most `acquire_timeout` for a free connection and then fails
/// with [`DataAccessError::Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_size: u32,
    pub max_size: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 10,
            max_size: 100,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// An exclusively held store connection.
///
/// The first procedure call opens a transaction which stays open until
/// [`commit`](Self::commit) or [`rollback`](Self::rollback). Dropping the guard
/// rolls back anything still open and returns the connection to the pool.
pub struct StoreConnection<M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    conn: PooledConnection<M>,
    in_transaction: bool,
}

impl<M> StoreConnection<M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    pub(crate) fn call(
        &mut self,
        procedure: &str,
        args: &[ProcArg],
    ) -> Result<Vec<StoreRow>, DataAccessError> {
        if !self.in_transaction {
            self.conn
                .begin()
                .map_err(|e| DataAccessError::procedure(procedure, e))?;
            self.in_transaction = true;
        }
        self.conn
            .call_procedure(procedure, args)
            .map_err(|e| DataAccessError::procedure(procedure, e))
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn commit(&mut self) -> Result<(), DataAccessError> {
        self.in_transaction = false;
        self.conn.commit().map_err(|e| DataAccessError::Transaction {
            action: "commit",
            source: Box::new(e),
        })
    }

    pub fn rollback(&mut self) -> Result<(), DataAccessError> {
        self.in_transaction = false;
        self.conn.rollback().map_err(|e| DataAccessError::Transaction {
            action: "roll back",
            source: Box::new(e),
        })
    }
}

impl<M> Drop for StoreConnection<M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    fn drop(&mut self) {
        if self.in_transaction {
            warn!("Connection released with an open transaction; rolling back.");
            if let Err(e) = self.conn.rollback() {
                error!(error = %e, "Rollback on release failed.");
            }
        }
    }
}

/// Runs stored procedures over a bounded connection pool.
pub struct TransactionRunner<M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    pool: Pool<M>,
}

impl<M> TransactionRunner<M>
where
    M: ManageConnection,
    M::Connection: ProcedureConnection,
{
    pub fn new(manager: M, settings: &PoolSettings) -> Result<Self, DataAccessError> {
        if settings.max_size == 0 || settings.min_size > settings.max_size {
            return Err(DataAccessError::InvalidPoolBounds {
                min: settings.min_size,
                max: settings.max_size,
            });
        }
        let pool = Pool::builder()
            .min_idle(Some(settings.min_size))
            .max_size(settings.max_size)
            .connection_timeout(settings.acquire_timeout)
            .build(manager)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: Pool<M>) -> Self {
        Self { pool }
    }

    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }

    /// Checks out a connection and sets serializable isolation on it.
    pub fn acquire(&self) -> Result<StoreConnection<M>, DataAccessError> {
        let mut conn = self.pool.get()?;
        conn.set_serializable()
            .map_err(|e| DataAccessError::Isolation(Box::new(e)))?;
        Ok(StoreConnection {
            conn,
            in_transaction: false,
        })
    }

    /// Returns a connection to the pool whatever state its transaction is in.
    pub fn release(&self, conn: StoreConnection<M>) {
        drop(conn);
    }

    pub fn fetch_one(
        &self,
        procedure: &str,
        args: &[ProcArg],
        existing: Option<&mut StoreConnection<M>>,
    ) -> Result<Option<StoreRow>, DataAccessError> {
        Ok(self.run(procedure, args, existing)?.into_iter().next())
    }

    pub fn fetch_all(
        &self,
        procedure: &str,
        args: &[ProcArg],
        existing: Option<&mut StoreConnection<M>>,
    ) -> Result<Vec<StoreRow>, DataAccessError> {
        self.run(procedure, args, existing)
    }

    /// Runs `work` inside one transaction on a freshly acquired connection,
    /// committing on `Ok` and rolling back on `Err`.
    pub fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut StoreConnection<M>) -> Result<T, E>,
        E: From<DataAccessError>,
    {
        let mut conn = self.acquire()?;
        match work(&mut conn) {
            Ok(value) => {
                conn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback() {
                    error!(error = %rollback_err, "Rollback after failed unit of work failed.");
                }
                Err(e)
            }
        }
    }

    /// Calls `procedure` either in the caller's transaction or in one of its own.
    ///
    /// With an existing connection the call joins the caller's transaction and is
    /// never committed or rolled back here. Otherwise a connection is acquired,
    /// committed on success or rolled back on failure, and always released.
    fn run(
        &self,
        procedure: &str,
        args: &[ProcArg],
        existing: Option<&mut StoreConnection<M>>,
    ) -> Result<Vec<StoreRow>, DataAccessError> {
        if !PROCEDURE_NAME.is_match(procedure) {
            return Err(DataAccessError::InvalidProcedureName(procedure.to_string()));
        }

        if let Some(conn) = existing {
            debug!(procedure, "Calling procedure in caller transaction.");
            return conn.call(procedure, args);
        }

        let mut conn = self.acquire()?;
        debug!(procedure, "Calling procedure in own transaction.");
        match conn.call(procedure, args) {
            Ok(rows) => {
                conn.commit().map_err(|e| e.for_procedure(procedure))?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback() {
                    error!(procedure, error = %rollback_err, "Rollback failed.");
                }
                warn!(procedure, error = %e, "Procedure failed; transaction rolled back.");
                Err(e)
            }
        }
    }
}
