//! Range allocation against the shared store counter.

use super::{IdError, IdScheme};
use crate::store::{Store, counter_value, set_counter};
use rusqlite::Connection;
use std::ops::Range;
use tracing::debug;

/// Key of the allocation counter in the `state` table.
pub const COUNTER_KEY: &str = "counter";

/// Reserve `count` states inside an already-open immediate transaction.
///
/// Use this when the reserved ids must be written in the same transaction
/// (see [`issue_links`](crate::links::issue_links)); on error the caller's
/// transaction rolls back and the counter stays where it was.
pub fn reserve_range(
    conn: &Connection,
    scheme: &IdScheme,
    count: u64,
) -> Result<Range<u64>, IdError> {
    let start = counter_value(conn, COUNTER_KEY)?;
    let end = start
        .checked_add(count)
        .filter(|end| *end <= scheme.limit())
        .ok_or(IdError::Exhausted {
            limit: scheme.limit(),
        })?;
    set_counter(conn, COUNTER_KEY, end)?;
    debug!(start, end, "reserved id states");
    Ok(start..end)
}

/// Atomically reserve `count` consecutive states.
///
/// Concurrent callers, in this process or any other sharing the database,
/// get disjoint ranges whose union is every state handed out so far.
/// Fails with [`IdError::Exhausted`] if any state in the range would reach
/// `2^bits_state`; nothing is consumed in that case.
pub fn allocate_range(store: &Store, scheme: &IdScheme, count: u64) -> Result<Range<u64>, IdError> {
    store.transaction(|tx| reserve_range(tx, scheme, count))
}

/// Reserve `count` states and encode each into a public id.
pub fn allocate_ids(store: &Store, scheme: &IdScheme, count: u64) -> Result<Vec<String>, IdError> {
    allocate_range(store, scheme, count)?
        .map(|state| scheme.encode(state))
        .collect()
}
