use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use pulse_core::{Report, StorageError};
use uuid::Uuid;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "report_";
const FILE_SUFFIX: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A report file found in the archive, keyed by the timestamp in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedReport {
    pub path: PathBuf,
    pub generated_at: DateTime<Utc>,
}

/// Directory of JSON reports named `report_YYYYMMDD_HHMMSS_mmm_<id>.json`.
///
/// The id is the report's uuid, so two runs within the same millisecond
/// still land in different files.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name_for(generated_at: DateTime<Utc>, id: Uuid) -> String {
        format!(
            "{}{}_{:03}_{}{}",
            FILE_PREFIX,
            generated_at.format(STAMP_FORMAT),
            generated_at.timestamp_subsec_millis(),
            id.simple(),
            FILE_SUFFIX
        )
    }

    /// Writes the report next to its final name and renames it into place,
    /// so readers never see a half-written file.
    pub async fn save(&self, report: &Report) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| archive_error(&self.dir, e))?;

        let name = Self::file_name_for(report.generated_at(), report.id());
        let path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!(".{}.tmp", name));

        let json = serde_json::to_vec_pretty(report).map_err(|e| archive_error(&path, e))?;
        tokio::fs::write(&tmp_path, json)
            .await
            .map_err(|e| archive_error(&tmp_path, e))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| archive_error(&path, e))?;

        info!("Saved report {} to {}", report.id(), path.display());
        Ok(path)
    }

    /// Archived reports, oldest first. A missing directory is an empty archive.
    pub async fn list(&self) -> Result<Vec<ArchivedReport>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(archive_error(&self.dir, e)),
        };

        let mut reports = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| archive_error(&self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            match parse_report_timestamp(name) {
                Some(generated_at) => reports.push(ArchivedReport {
                    path: entry.path(),
                    generated_at,
                }),
                None => debug!("Ignoring non-report file {}", name),
            }
        }

        reports.sort_by(|a, b| a.generated_at.cmp(&b.generated_at).then(a.path.cmp(&b.path)));
        Ok(reports)
    }

    pub async fn load(&self, path: &Path) -> Result<Report, StorageError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| archive_error(path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| archive_error(path, e))
    }

    pub async fn latest(&self) -> Result<Option<Report>, StorageError> {
        match self.list().await?.pop() {
            Some(archived) => self.load(&archived.path).await.map(Some),
            None => Ok(None),
        }
    }

    /// Deletes every report generated before `cutoff`, returning how many went.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut removed = 0;

        for archived in self.list().await? {
            if archived.generated_at >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&archived.path).await {
                Ok(()) => {
                    debug!("Deleted report {}", archived.path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Report {} vanished before deletion", archived.path.display());
                }
                Err(e) => return Err(archive_error(&archived.path, e)),
            }
        }

        if removed > 0 {
            info!("Removed {} reports generated before {}", removed, cutoff);
        }
        Ok(removed)
    }
}

/// Timestamp encoded in a report file name, to the millisecond, if the name
/// is one of ours. Older second-resolution names are still accepted.
pub fn parse_report_timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?;

    let mut parts = stamp.splitn(4, '_');
    let date = parts.next()?;
    let time = parts.next()?;
    let naive = NaiveDateTime::parse_from_str(&format!("{}_{}", date, time), STAMP_FORMAT).ok()?;

    let millis = match parts.next() {
        None => 0,
        Some(ms) if ms.len() == 3 => ms.parse::<i64>().ok()?,
        Some(_) => return None,
    };
    if let Some(id) = parts.next() {
        Uuid::parse_str(id).ok()?;
    }

    Some(Utc.from_utc_datetime(&naive) + Duration::milliseconds(millis))
}

fn archive_error(path: &Path, error: impl std::fmt::Display) -> StorageError {
    StorageError::Archive {
        path: path.display().to_string(),
        reason: error.to_string(),
    }
}
