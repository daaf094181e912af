use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::db;
use crate::error::PersistenceError;
use crate::record::CanonicalRecord;

/// Remove repeats of (title, address, price) inside one batch. First wins.
///
/// A missing address compares equal to another missing address, so a batch
/// without addresses is keyed on (title, price) alone.
pub fn dedup_batch(records: Vec<CanonicalRecord>) -> Vec<CanonicalRecord> {
    let mut seen = HashSet::new();
    let before = records.len();
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.title.clone(),
                r.address.clone(),
                r.price_amount.to_bits(),
            ))
        })
        .collect();
    if kept.len() < before {
        debug!(removed = before - kept.len(), "Dropped in-batch duplicates");
    }
    kept
}

/// Outcome of filtering a batch by link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkFiltered {
    pub records: Vec<CanonicalRecord>,
    /// Dropped because the link is already stored.
    pub persisted: usize,
    /// Dropped because an earlier record in the batch has the same link.
    pub repeated: usize,
}

/// Remove records whose link is already stored. Records without a link always
/// pass; a repeated link later in the same batch is dropped too.
pub fn drop_persisted(
    conn: &Connection,
    table: &str,
    records: Vec<CanonicalRecord>,
) -> Result<LinkFiltered, PersistenceError> {
    if records.iter().all(|r| r.link.is_none()) {
        return Ok(LinkFiltered {
            records,
            persisted: 0,
            repeated: 0,
        });
    }

    let existing = db::existing_links(conn, table)?;
    Ok(filter_known_links(records, &existing))
}

/// Drop records whose link is in `stored` or repeats an earlier one in the
/// batch. Pass an empty set to enforce link uniqueness within the batch only.
pub fn filter_known_links(
    records: Vec<CanonicalRecord>,
    stored: &HashSet<String>,
) -> LinkFiltered {
    let mut seen = HashSet::new();
    let mut persisted = 0;
    let mut repeated = 0;
    let kept: Vec<_> = records
        .into_iter()
        .filter(|r| match &r.link {
            Some(link) if stored.contains(link) => {
                persisted += 1;
                false
            }
            Some(link) if !seen.insert(link.clone()) => {
                repeated += 1;
                false
            }
            _ => true,
        })
        .collect();

    if persisted > 0 {
        info!(removed = persisted, "Filtered records already persisted (by link)");
    }
    if repeated > 0 {
        debug!(removed = repeated, "Dropped repeated links within the batch");
    }
    LinkFiltered {
        records: kept,
        persisted,
        repeated,
    }
}
