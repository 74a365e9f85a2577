//! Usage-based billing.
//!
//! A user's cost is the sum, over their usage records, of elapsed time
//! multiplied by the unit price of the first catalog entry whose instance
//! type matches. Records with no priced instance type contribute nothing.
//! The total is rounded to four decimal places, midpoint away from zero.

mod catalog;
mod history;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::warn;

pub use catalog::{CatalogError, PriceCatalog, PriceCatalogEntry, STUB_SKU};
pub use history::{
    FixedUsageHistory, HistoryError, HistoryFuture, JsonUsageHistory, UsageHistory, UsageRecord,
};

/// Decimal places kept in a billed total.
pub const COST_DECIMAL_PLACES: u32 = 4;

/// Computes the total cost of `records` against `catalog`.
///
/// # Errors
///
/// Returns [`HistoryError::Overflow`] when a record's cost or the running
/// total leaves the decimal range.
pub fn total_cost(
    records: &[UsageRecord],
    catalog: &PriceCatalog,
) -> Result<Decimal, HistoryError> {
    let total = records.iter().try_fold(Decimal::ZERO, |total, record| {
        let cost = record_cost(record, catalog)?;
        total.checked_add(cost).ok_or_else(|| {
            HistoryError::Overflow(format!(
                "total exceeds the decimal range after {} usage",
                record.instance_type
            ))
        })
    })?;
    let mut rounded =
        total.round_dp_with_strategy(COST_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(COST_DECIMAL_PLACES);
    Ok(rounded)
}

fn record_cost(record: &UsageRecord, catalog: &PriceCatalog) -> Result<Decimal, HistoryError> {
    let Some(entry) = catalog.entry_for_instance_type(&record.instance_type) else {
        warn!(
            instance_type = %record.instance_type,
            "no catalog price for instance type; usage not billed"
        );
        return Ok(Decimal::ZERO);
    };
    if record.elapsed.is_sign_negative() {
        warn!(
            instance_type = %record.instance_type,
            elapsed = %record.elapsed,
            "negative elapsed time ignored"
        );
        return Ok(Decimal::ZERO);
    }
    record.elapsed.checked_mul(entry.price).ok_or_else(|| {
        HistoryError::Overflow(format!(
            "{} elapsed {} at price {}",
            record.instance_type, record.elapsed, entry.price
        ))
    })
}

/// Fetches `backend` usage from `history` and bills it against `catalog`.
///
/// # Errors
///
/// Propagates the history source's error unchanged, and returns
/// [`HistoryError::Overflow`] when the bill leaves the decimal range.
pub async fn user_cost(
    history: &dyn UsageHistory,
    backend: &str,
    catalog: &PriceCatalog,
) -> Result<Decimal, HistoryError> {
    let records = history.history(backend).await?;
    total_cost(&records, catalog)
}
