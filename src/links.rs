//! Link lifecycle: issue, open, edit, and thumbnail lookup.
//!
//! A link is one row in the store mapping a public id to a file under a
//! named mount. Links are issued in batches when a directory is listed,
//! opened (counted) on every download, and edited by their owner to extend
//! or shorten their lifetime or switch between inline and attachment
//! disposition. Expired rows are removed by [`sweep`](crate::sweep).
//!
//! Every operation validates ids syntactically against the [`IdScheme`]
//! before touching the store.

use crate::ids::{IdError, IdScheme, reserve_range};
use crate::store::{LinkRow, Store, StoreError, insert_link, update_link};
use crate::thumbnail::{
    MediaTools, Thumbnail, ThumbnailCache, ThumbnailError, parse_parameter,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("bad or expired link: {0}")]
    NotFound(String),
    #[error("path escapes its mount: {0}")]
    InvalidPath(PathBuf),
}

/// Files to issue links for, all under one mount.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueRequest {
    pub owner: String,
    pub mount: String,
    /// Paths relative to the mount root.
    pub paths: Vec<PathBuf>,
}

/// Result of [`edit_links`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditReport {
    /// Rows after the edit, sorted case-insensitively by id.
    pub updated: Vec<LinkRow>,
    /// Well-formed ids with no row.
    pub unknown: Vec<String>,
    /// Ids rejected without a lookup.
    pub invalid: Vec<String>,
}

/// Issue one link per path, all expiring at `now + delay`.
///
/// The ids are reserved and every row inserted in a single transaction: on
/// any failure, including exhaustion, no row is written and the counter is
/// left untouched.
pub fn issue_links(
    store: &Store,
    scheme: &IdScheme,
    request: &IssueRequest,
    now: i64,
    delay: i64,
) -> Result<Vec<LinkRow>, LinkError> {
    for path in &request.paths {
        check_relative(path)?;
    }
    let expires = now.saturating_add(delay);
    let rows = store.transaction(|tx| {
        let states = reserve_range(tx, scheme, request.paths.len() as u64)?;
        let mut rows = Vec::with_capacity(request.paths.len());
        for (state, path) in states.zip(&request.paths) {
            let row = LinkRow {
                id: scheme.encode(state)?,
                expires,
                owner: request.owner.clone(),
                download: false,
                hits: 0,
                mount: request.mount.clone(),
                path: path.clone(),
            };
            insert_link(tx, &row)?;
            rows.push(row);
        }
        Ok::<_, LinkError>(rows)
    })?;
    debug!(count = rows.len(), mount = %request.mount, "issued links");
    Ok(rows)
}

/// Count a download and return the link, if it is well-formed and alive.
pub fn open_link(store: &Store, scheme: &IdScheme, id: &str, now: i64) -> Result<LinkRow, LinkError> {
    if !scheme.validate(id) {
        return Err(IdError::InvalidId(id.to_string()).into());
    }
    store
        .record_hit(id, now)?
        .ok_or_else(|| LinkError::NotFound(id.to_string()))
}

/// Shift expiry by `delay` seconds (clamped at zero) and optionally set the
/// download disposition, for every id in one transaction.
///
/// Each id is edited once however often it is given. Malformed ids are
/// skipped and unknown ids reported; neither aborts the batch. Expired but not yet swept links can still be edited back to life.
pub fn edit_links(
    store: &Store,
    scheme: &IdScheme,
    ids: &[String],
    delay: i64,
    download: Option<bool>,
) -> Result<EditReport, LinkError> {
    let mut report = EditReport::default();
    let mut unique = BTreeSet::new();
    for id in ids {
        if scheme.validate(id) {
            unique.insert(id.as_str());
        } else if !report.invalid.contains(id) {
            report.invalid.push(id.clone());
        }
    }
    if unique.is_empty() {
        return Ok(report);
    }
    let mut valid: Vec<&str> = unique.into_iter().collect();
    valid.sort_by_key(|id| id.to_lowercase());

    store.transaction(|tx| {
        for id in &valid {
            match update_link(tx, id, delay, download)? {
                Some(row) => report.updated.push(row),
                None => report.unknown.push(id.to_string()),
            }
        }
        Ok::<_, LinkError>(())
    })?;
    debug!(
        updated = report.updated.len(),
        unknown = report.unknown.len(),
        delay,
        "edited links"
    );
    Ok(report)
}

/// Extract candidate ids from pasted text, one per line.
///
/// Lines may be full download URLs starting with `prefix`. Anything that
/// does not validate is dropped. The result is deduplicated and sorted
/// case-insensitively.
pub fn ids_from_text(scheme: &IdScheme, text: &str, prefix: &str) -> Vec<String> {
    let unique: BTreeSet<&str> = text
        .lines()
        .map(str::trim)
        .map(|line| {
            if prefix.is_empty() {
                line
            } else {
                line.strip_prefix(prefix).unwrap_or(line)
            }
        })
        .filter(|id| scheme.validate(id))
        .collect();
    let mut ids: Vec<String> = unique.into_iter().map(String::from).collect();
    ids.sort_by_key(|id| id.to_lowercase());
    ids
}

/// Resolve the thumbnail for a link parameter such as `"k3Xa9@2x"`.
///
/// Every failure degrades to [`Thumbnail::Unavailable`] and is logged.
pub fn link_thumbnail<T: MediaTools>(
    store: &Store,
    scheme: &IdScheme,
    cache: &ThumbnailCache<T>,
    mounts: &BTreeMap<String, PathBuf>,
    parameter: &str,
    animated: bool,
    now: i64,
) -> Thumbnail {
    let result = try_link_thumbnail(store, scheme, cache, mounts, parameter, animated, now);
    if let Err(e) = &result {
        warn!(parameter, animated, "link thumbnail unavailable: {e}");
    }
    result.into()
}

/// [`link_thumbnail`] with the failure reason exposed.
pub fn try_link_thumbnail<T: MediaTools>(
    store: &Store,
    scheme: &IdScheme,
    cache: &ThumbnailCache<T>,
    mounts: &BTreeMap<String, PathBuf>,
    parameter: &str,
    animated: bool,
    now: i64,
) -> Result<String, ThumbnailError> {
    let (id, scale) = parse_parameter(parameter)
        .ok_or_else(|| ThumbnailError::InvalidRequest(format!("bad scale in {parameter:?}")))?;
    if !scheme.validate(id) {
        return Err(ThumbnailError::InvalidRequest(format!("bad id {id:?}")));
    }
    let row = store
        .live_link(id, now)?
        .ok_or_else(|| ThumbnailError::UnknownLink(id.to_string()))?;
    let root = mounts
        .get(&row.mount)
        .ok_or_else(|| ThumbnailError::UnknownMount(row.mount.clone()))?;
    if check_relative(&row.path).is_err() {
        return Err(ThumbnailError::InvalidRequest(format!(
            "path escapes mount: {}",
            row.path.display()
        )));
    }
    cache.try_resolve(&root.join(&row.path), scale, animated)
}

/// Link paths must stay below their mount root.
fn check_relative(path: &Path) -> Result<(), LinkError> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || path.as_os_str().is_empty() {
        return Err(LinkError::InvalidPath(path.to_path_buf()));
    }
    Ok(())
}
