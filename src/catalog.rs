//! Game catalog import.
//!
//! The catalog file is a JSON array of `{externalId, title, referenceUrl}`.
//! `external_id` is the natural key: re-syncing refreshes title and URL in
//! place. Two ids sharing a URL are both kept and reported.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::store::UpsertOutcome;
use crate::db::SqliteStore;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub external_id: String,
    pub title: String,
    pub reference_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub inserted: u64,
    pub updated: u64,
    pub url_collisions: u64,
    /// Entries with a blank id, title or URL.
    pub skipped: u64,
}

pub async fn load_catalog_file(path: impl AsRef<Path>) -> Result<Vec<CatalogEntry>> {
    let raw = tokio::fs::read_to_string(path.as_ref()).await?;
    Ok(serde_json::from_str(&raw)?)
}

pub async fn sync_catalog(store: &SqliteStore, entries: &[CatalogEntry]) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for entry in entries {
        let external_id = entry.external_id.trim();
        let title = entry.title.trim();
        let reference_url = entry.reference_url.trim();
        if external_id.is_empty() || title.is_empty() || reference_url.is_empty() {
            warn!("[CATALOG] skipping incomplete entry: {entry:?}");
            report.skipped += 1;
            continue;
        }

        let sharing = store.games_sharing_url(reference_url, external_id).await?;
        if !sharing.is_empty() {
            let others: Vec<&str> = sharing.iter().map(|g| g.external_id.as_str()).collect();
            warn!(
                external_id,
                reference_url,
                "[CATALOG] URL already used by {others:?}; keeping both"
            );
            report.url_collisions += 1;
        }

        match store.upsert_game(external_id, title, reference_url).await? {
            UpsertOutcome::Inserted(_) => report.inserted += 1,
            UpsertOutcome::Updated(_) => report.updated += 1,
        }
    }

    info!(
        "[CATALOG] sync complete: {} inserted, {} updated, {} URL collisions, {} skipped",
        report.inserted, report.updated, report.url_collisions, report.skipped
    );
    Ok(report)
}
