pub mod candidate;
pub mod consistency;
pub mod dependents;
pub mod history;
pub mod patient;

pub use candidate::*;
pub use consistency::*;
pub use dependents::*;
pub use history::*;
pub use patient::*;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::DatabaseError;

pub(crate) const TS_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub(crate) fn ts_to_sql(ts: &NaiveDateTime) -> String {
    ts.format(TS_FMT).to_string()
}

pub(crate) fn ts_from_sql(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TS_FMT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .unwrap_or_default()
}

pub(crate) fn date_from_sql(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

pub(crate) fn uuid_from_sql(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::InvalidPayload(format!("bad uuid {s}: {e}")))
}
