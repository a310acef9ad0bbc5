pub mod args;
pub mod models;
pub mod postgres;
pub mod row;
pub mod runner;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use args::ProcArg;
pub use row::StoreRow;
pub use runner::{PoolSettings, ProcedureConnection, StoreConnection, TransactionRunner};

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Invalid pool bounds: min {min}, max {max}")]
    InvalidPoolBounds { min: u32, max: u32 },
    #[error("Invalid database configuration: {0}")]
    Configuration(String),
    #[error("Invalid procedure name: {0}")]
    InvalidProcedureName(String),
    #[error("Failed to set serializable isolation on checkout: {0}")]
    Isolation(#[source] BoxError),
    #[error("Procedure {procedure} failed: {source}")]
    Procedure {
        procedure: String,
        #[source]
        source: BoxError,
    },
    #[error("Failed to {action} transaction: {source}")]
    Transaction {
        action: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Procedure {procedure} returned no rows")]
    NoRows { procedure: String },
    #[error("Failed to decode `{field}` from {procedure}: {reason}")]
    Decode {
        procedure: String,
        field: String,
        reason: String,
    },
    #[error("Argument `{argument}` for {procedure} is out of range")]
    ArgumentOutOfRange {
        procedure: String,
        argument: &'static str,
    },
}

impl DataAccessError {
    pub(crate) fn procedure<E>(procedure: &str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DataAccessError::Procedure {
            procedure: procedure.to_string(),
            source: Box::new(source),
        }
    }

    /// Re-labels a transaction-level failure with the procedure whose
    /// unit of work it ended.
    pub(crate) fn for_procedure(self, procedure: &str) -> Self {
        match self {
            DataAccessError::Transaction { source, .. } => DataAccessError::Procedure {
                procedure: procedure.to_string(),
                source,
            },
            other => other,
        }
    }

    /// Name of the stored procedure involved, when the failure happened inside one.
    pub fn procedure_name(&self) -> Option<&str> {
        match self {
            DataAccessError::Procedure { procedure, .. }
            | DataAccessError::NoRows { procedure }
            | DataAccessError::Decode { procedure, .. }
            | DataAccessError::ArgumentOutOfRange { procedure, .. } => Some(procedure),
            _ => None,
        }
    }
}
