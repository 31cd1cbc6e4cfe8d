//! Link id allocation.
//!
//! | Piece | Role |
//! |---|---|
//! | [`IdScheme`] | Seeded, immutable mapping from counter states to public ids |
//! | [`allocate_range`] | Reserves a block of states from the shared store counter |
//! | [`allocate_ids`] | Reserves a block and encodes every state in it |
//!
//! States come from one counter row that only ever grows, so ranges handed
//! to concurrent callers (threads or processes) never overlap and together
//! cover every state consumed so far.

mod allocator;
mod scheme;

pub use allocator::{COUNTER_KEY, allocate_ids, allocate_range, reserve_range};
pub use scheme::{IdScheme, MAX_TOTAL_BITS, SchemeError, SwizzleBit};

use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdError {
    /// The state space is used up. Not recoverable: stop issuing ids.
    #[error("id space exhausted: no states left below {limit}")]
    Exhausted { limit: u64 },
    #[error("malformed link id: {0:?}")]
    InvalidId(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
