use chrono::{DateTime, Utc};
use std::net::IpAddr;

/// A positional stored-procedure argument.
///
/// Every value travels to the store as text and is coerced by the server to the
/// type declared in the procedure signature, so the variants only describe how
/// the value is encoded: network addresses in their canonical text form,
/// timestamps as integer seconds, enumerations as integer codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcArg {
    Null,
    Int(i64),
    Text(String),
}

impl ProcArg {
    pub fn timestamp(value: DateTime<Utc>) -> Self {
        ProcArg::Int(value.timestamp())
    }

    pub fn inet(address: IpAddr) -> Self {
        ProcArg::Text(address.to_string())
    }

    /// Text form sent over the wire, `None` for SQL NULL.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ProcArg::Null => None,
            ProcArg::Int(value) => Some(value.to_string()),
            ProcArg::Text(value) => Some(value.clone()),
        }
    }
}

impl From<i64> for ProcArg {
    fn from(value: i64) -> Self {
        ProcArg::Int(value)
    }
}

impl From<i32> for ProcArg {
    fn from(value: i32) -> Self {
        ProcArg::Int(i64::from(value))
    }
}

impl From<u16> for ProcArg {
    fn from(value: u16) -> Self {
        ProcArg::Int(i64::from(value))
    }
}

impl From<&str> for ProcArg {
    fn from(value: &str) -> Self {
        ProcArg::Text(value.to_string())
    }
}

impl From<String> for ProcArg {
    fn from(value: String) -> Self {
        ProcArg::Text(value)
    }
}

impl From<IpAddr> for ProcArg {
    fn from(value: IpAddr) -> Self {
        ProcArg::inet(value)
    }
}

impl From<DateTime<Utc>> for ProcArg {
    fn from(value: DateTime<Utc>) -> Self {
        ProcArg::timestamp(value)
    }
}

impl<T: Into<ProcArg>> From<Option<T>> for ProcArg {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ProcArg::Null)
    }
}
