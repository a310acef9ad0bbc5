use serde_json::{Map, Value};
use std::net::IpAddr;

use super::DataAccessError;

/// A raw store row: column name to value, as returned by a procedure call.
pub type StoreRow = Map<String, Value>;

/// Field-level decode failure, labelled with the procedure by [`decode_rows`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait RowExt {
    fn opt_str(&self, field: &str) -> Result<Option<String>, FieldError>;
    fn str_field(&self, field: &str) -> Result<String, FieldError>;
    fn i64_field(&self, field: &str) -> Result<i64, FieldError>;
    fn u64_field(&self, field: &str) -> Result<u64, FieldError>;
    fn ip_field(&self, field: &str) -> Result<IpAddr, FieldError>;
}

impl RowExt for StoreRow {
    fn opt_str(&self, field: &str) -> Result<Option<String>, FieldError> {
        match self.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(FieldError::new(field, format!("expected text, found {other}"))),
        }
    }

    fn str_field(&self, field: &str) -> Result<String, FieldError> {
        self.opt_str(field)?
            .ok_or_else(|| FieldError::new(field, "missing or null"))
    }

    fn i64_field(&self, field: &str) -> Result<i64, FieldError> {
        match self.get(field) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| fits_i64(*f)).map(|f| f as i64))
                .ok_or_else(|| FieldError::new(field, format!("{n} is not an integer"))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| FieldError::new(field, format!("{s:?} is not an integer"))),
            None | Some(Value::Null) => Err(FieldError::new(field, "missing or null")),
            Some(other) => Err(FieldError::new(field, format!("expected integer, found {other}"))),
        }
    }

    fn u64_field(&self, field: &str) -> Result<u64, FieldError> {
        let value = self.i64_field(field)?;
        u64::try_from(value).map_err(|_| FieldError::new(field, format!("{value} is negative")))
    }

    fn ip_field(&self, field: &str) -> Result<IpAddr, FieldError> {
        let text = self.str_field(field)?;
        // inet columns may carry a prefix length
        let address = text.split('/').next().unwrap_or_default();
        address
            .parse()
            .map_err(|_| FieldError::new(field, format!("{text:?} is not a network address")))
    }
}

// Whole floats that convert to i64 without saturating.
fn fits_i64(f: f64) -> bool {
    f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64
}

/// Runs the decode step for every row of one procedure's result set.
pub fn decode_rows<T>(
    procedure: &str,
    rows: &[StoreRow],
    decode: fn(&StoreRow) -> Result<T, FieldError>,
) -> Result<Vec<T>, DataAccessError> {
    rows.iter()
        .map(|row| decode_row(procedure, row, decode))
        .collect()
}

pub fn decode_row<T>(
    procedure: &str,
    row: &StoreRow,
    decode: fn(&StoreRow) -> Result<T, FieldError>,
) -> Result<T, DataAccessError> {
    decode(row).map_err(|e| DataAccessError::Decode {
        procedure: procedure.to_string(),
        field: e.field,
        reason: e.reason,
    })
}
