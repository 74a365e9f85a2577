//! Usage history sources.

use std::future::Future;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::files::read_to_string_ambient;

/// One billed stretch of usage.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct UsageRecord {
    /// Instance type label.
    #[serde(alias = "type", alias = "instanceType")]
    pub instance_type: String,
    /// Elapsed time, in the catalog's price unit.
    #[serde(alias = "time")]
    pub elapsed: Decimal,
}

impl UsageRecord {
    /// Creates a usage record.
    #[must_use]
    pub fn new(instance_type: impl Into<String>, elapsed: Decimal) -> Self {
        Self {
            instance_type: instance_type.into(),
            elapsed,
        }
    }
}

/// Errors surfaced by a usage history source.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HistoryError {
    /// Raised when the source cannot be reached or read.
    #[error("usage history unavailable: {0}")]
    Unavailable(String),
    /// Raised when the source returns malformed data.
    #[error("malformed usage history: {0}")]
    Malformed(String),
    /// Raised when billing the history exceeds the decimal range.
    #[error("usage cost overflows: {0}")]
    Overflow(String),
}

/// Future returned by usage history lookups.
pub type HistoryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<UsageRecord>, HistoryError>> + Send + 'a>>;

/// Supplies a user's usage records for one backend.
pub trait UsageHistory: Send + Sync {
    /// Returns the ordered usage records recorded against `backend`.
    fn history<'a>(&'a self, backend: &'a str) -> HistoryFuture<'a>;
}

/// Fixed in-memory history, returned regardless of backend.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FixedUsageHistory {
    records: Vec<UsageRecord>,
}

impl FixedUsageHistory {
    /// Wraps a list of records.
    #[must_use]
    pub const fn new(records: Vec<UsageRecord>) -> Self {
        Self { records }
    }
}

impl UsageHistory for FixedUsageHistory {
    fn history<'a>(&'a self, _backend: &'a str) -> HistoryFuture<'a> {
        Box::pin(async move { Ok(self.records.clone()) })
    }
}

/// Reads a JSON array of usage records from disk on every lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JsonUsageHistory {
    path: Utf8PathBuf,
}

impl JsonUsageHistory {
    /// Points the source at a JSON file.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl UsageHistory for JsonUsageHistory {
    fn history<'a>(&'a self, _backend: &'a str) -> HistoryFuture<'a> {
        Box::pin(async move {
            let contents = read_to_string_ambient(&self.path)
                .map_err(|message| HistoryError::Unavailable(format!("{}: {message}", self.path)))?;
            serde_json::from_str(&contents)
                .map_err(|err| HistoryError::Malformed(format!("{}: {err}", self.path)))
        })
    }
}
