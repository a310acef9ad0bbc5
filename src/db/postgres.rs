//! Postgres backend for the procedure runner.

use bytes::{BufMut, BytesMut};
use postgres::types::{to_sql_checked, Format, IsNull, ToSql, Type};
use postgres::{Client, NoTls};
use r2d2_postgres::PostgresConnectionManager;
use serde_json::Value;
use std::error::Error;

use super::{DataAccessError, PoolSettings, ProcArg, ProcedureConnection, StoreRow, TransactionRunner};

pub type PgManager = PostgresConnectionManager<NoTls>;
pub type PgRunner = TransactionRunner<PgManager>;

pub fn connect_runner(database_url: &str, settings: &PoolSettings) -> Result<PgRunner, DataAccessError> {
    let config: postgres::Config = database_url
        .parse()
        .map_err(|e: postgres::Error| DataAccessError::Configuration(e.to_string()))?;
    TransactionRunner::new(PostgresConnectionManager::new(config, NoTls), settings)
}

/// Builds the call for `procedure`, returning each result row as one jsonb object
/// keyed by column name. The subquery keeps scalar and void procedures working.
pub fn procedure_call_sql(procedure: &str, arg_count: usize) -> String {
    let placeholders: Vec<String> = (1..=arg_count).map(|i| format!("${i}")).collect();
    format!(
        "SELECT to_jsonb(r) FROM (SELECT * FROM {procedure}({})) AS r",
        placeholders.join(", ")
    )
}

// Arguments go over the wire in text format; the server coerces them to the
// parameter types of the procedure signature.
impl ToSql for ProcArg {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self.as_text() {
            None => Ok(IsNull::Yes),
            Some(text) => {
                out.put_slice(text.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

impl ProcedureConnection for Client {
    type Error = postgres::Error;

    fn set_serializable(&mut self) -> Result<(), postgres::Error> {
        self.batch_execute("SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL SERIALIZABLE")
    }

    fn begin(&mut self) -> Result<(), postgres::Error> {
        self.batch_execute("BEGIN")
    }

    fn call_procedure(&mut self, procedure: &str, args: &[ProcArg]) -> Result<Vec<StoreRow>, postgres::Error> {
        let sql = procedure_call_sql(procedure, args.len());
        let params: Vec<&(dyn ToSql + Sync)> = args.iter().map(|a| a as &(dyn ToSql + Sync)).collect();
        let rows = self.query(sql.as_str(), &params)?;

        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            let value: Option<Value> = row.try_get(0)?;
            decoded.push(match value {
                Some(Value::Object(map)) => map,
                _ => StoreRow::new(),
            });
        }
        Ok(decoded)
    }

    fn commit(&mut self) -> Result<(), postgres::Error> {
        self.batch_execute("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), postgres::Error> {
        self.batch_execute("ROLLBACK")
    }
}
