//! # Archive Share
//!
//! The core of a personal file-sharing gallery. Files under configured
//! mounts are shared through short-lived links with unguessable ids, and
//! every image or video gets a cached thumbnail.
//!
//! # Architecture: Two Hard Parts
//!
//! ```text
//! ids        counter in SQLite  →  swizzled, noised, base-N public id
//! thumbnail  (salt, scale, variant, path)  →  hash-named file made by ffmpeg
//! ```
//!
//! Everything else is thin plumbing around them: [`links`] issues, opens and
//! edits rows in the [`store`], and [`sweep`] expires rows and old cache
//! files. HTTP routing, HTML, and authentication live elsewhere and call
//! into this crate.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `archive-share.toml` loading, merging over stock defaults, validation |
//! | [`store`] | SQLite database: named counters and link rows, one connection per operation |
//! | [`ids`] | Id scheme (alphabet, swizzle, inverter) and atomic range allocation |
//! | [`links`] | Issue, open, and edit links; resolve a link's thumbnail through its mount |
//! | [`thumbnail`] | Content-addressed thumbnail cache with per-file locking and ffmpeg tools |
//! | [`sweep`] | Expired link deletion and stale cache-file deletion |
//! | [`paths`] | Byte-exact path conversion for non-UTF-8 filenames |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Ids Are a Bijection Plus Noise
//!
//! A link id encodes a unique counter state. The state is XORed with a
//! secret inverter, its bits are scattered among random noise bits by a
//! seeded permutation, and the result is written in a shuffled alphabet.
//! Uniqueness comes from the counter, not from randomness, so there is no
//! collision check and no retry loop. The noise makes consecutive ids look
//! unrelated and makes guessing a live id impractical.
//!
//! ## The Counter Lives in the Database
//!
//! Several server processes may issue links at once. Every allocation is a
//! read-and-advance inside an immediate SQLite transaction, so the database
//! lock is the only coordination between them. Ranges never overlap, and a
//! batch that would run past the end of the state space is rolled back.
//!
//! ## The Cache File Is Its Own Lock
//!
//! A thumbnail is created by opening its final cache file without truncation
//! and taking an exclusive `flock` on it. Whoever holds the lock and finds
//! the file empty runs the conversion; everyone else waits and then finds it
//! full. No lock files, no rename dance, and it works across processes on
//! the same host. A zero-length file is never served.
//!
//! ## Failures Degrade
//!
//! A missing thumbnail is not an error page. [`thumbnail::ThumbnailCache::resolve`]
//! and [`links::link_thumbnail`] return [`thumbnail::Thumbnail::Unavailable`]
//! with the reason, and log it, instead of propagating.

pub mod config;
pub mod ids;
pub mod links;
pub mod output;
pub mod paths;
pub mod store;
pub mod sweep;
pub mod thumbnail;

#[cfg(test)]
pub(crate) mod test_helpers;
