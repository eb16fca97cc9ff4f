//! Repository layer: table-scoped database operations.
//!
//! Free functions over a borrowed `Connection`; `SqliteCatalog` composes them.

mod images;
mod processed;

use chrono::NaiveDateTime;

pub use images::*;
pub use processed::*;

/// Parse a timestamp written by `NaiveDateTime::to_string()`.
/// Unparseable values fall back to the epoch rather than failing the read.
pub(crate) fn parse_timestamp(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .unwrap_or_default()
}
