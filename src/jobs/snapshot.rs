use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::Error;

use super::Status;

/// The read-side of a job, serialized into the snapshot sidecar.
///
/// Live handles (cancellation token, completion signal, backend client)
/// are deliberately absent; restored jobs only answer queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub process_id: String,
    pub process_version: String,
    pub status: Status,
    pub updated: DateTime<Utc>,
    pub cmd: Vec<String>,
    pub image: String,
    pub provider_id: Option<String>,
    pub api_log: Vec<String>,
    pub container_log: Vec<String>,
}

/// Write the snapshot atomically: serialize, write a temp sibling, rename.
pub async fn save(path: &Path, records: &[JobRecord]) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let encoded = bincode::serialize(records)?;
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, &encoded).await?;
    tokio::fs::rename(&tmp, path).await?;

    tracing::info!(
        "Saved {} terminal jobs to snapshot at {}",
        records.len(),
        path.display()
    );
    Ok(())
}

/// Load the snapshot if present.
///
/// `Ok(None)` means there is nothing to restore. Any other failure is an
/// error the caller must treat as fatal: starting with a half-empty cache
/// would overwrite the on-disk snapshot at the next shutdown.
pub async fn load(path: &Path) -> Result<Option<Vec<JobRecord>>, Error> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await?;
    let records: Vec<JobRecord> = bincode::deserialize(&bytes)?;
    Ok(Some(records))
}
