//! Flattened CSV snapshot and database backups.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

use super::LibraryError;
use super::record::SnapshotRow;

const CSV_HEADER: [&str; 16] = [
    "id",
    "date",
    "title",
    "description",
    "url",
    "direct_url",
    "filename",
    "extractor",
    "artist",
    "collection_url",
    "collection_title",
    "reddit_url",
    "subreddit",
    "reddit_created",
    "upvotes",
    "flair",
];

const BACKUP_PREFIX: &str = "gwarip_db_";
const BACKUP_EXT: &str = ".sqlite";

/// Quotes a CSV field when it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(row: &SnapshotRow) -> String {
    let opt = |v: &Option<String>| csv_field(v.as_deref().unwrap_or(""));
    [
        row.id.to_string(),
        csv_field(&row.date),
        opt(&row.title),
        opt(&row.description),
        csv_field(&row.url),
        opt(&row.direct_url),
        csv_field(&row.filename),
        csv_field(&row.extractor),
        opt(&row.artist),
        opt(&row.collection_url),
        opt(&row.collection_title),
        opt(&row.reddit_url),
        opt(&row.subreddit),
        opt(&row.reddit_created),
        row.upvotes.map(|u| u.to_string()).unwrap_or_default(),
        opt(&row.flair),
    ]
    .join(",")
}

/// Writes every audio file, joined with its artist, collection and reddit
/// context, as one CSV file. Returns the number of data rows.
///
/// The file is written next to `path` and renamed into place.
///
/// # Errors
///
/// Query failures and IO errors writing the file.
#[instrument(skip(pool), fields(path = %path.display()))]
pub async fn export_flattened_snapshot(pool: &SqlitePool, path: &Path) -> Result<usize, LibraryError> {
    let rows: Vec<SnapshotRow> = sqlx::query_as(
        r"SELECT a.id, a.date, a.title, a.description, a.url, a.direct_url, a.filename,
                 a.extractor, al.name AS artist,
                 c.url AS collection_url, c.title AS collection_title,
                 r.permalink AS reddit_url, r.subreddit, r.created_utc AS reddit_created,
                 r.upvotes, r.flair
          FROM audio_file a
          LEFT JOIN alias al ON al.id = a.alias_id
          LEFT JOIN file_collection c ON c.id = a.collection_id
          LEFT JOIN file_collection pc ON pc.id = c.parent_id
          LEFT JOIN reddit_info r ON r.id = COALESCE(c.reddit_info_id, pc.reddit_info_id)
          ORDER BY a.id",
    )
    .fetch_all(pool)
    .await?;

    let mut out = CSV_HEADER.join(",");
    out.push('\n');
    for row in &rows {
        out.push_str(&csv_line(row));
        out.push('\n');
    }

    let tmp = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp, out)
        .await
        .map_err(|e| LibraryError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| LibraryError::io(path, e))?;
    info!(rows = rows.len(), "exported library snapshot");
    Ok(rows.len())
}

/// Modification time of the newest backup in `dir`, if any.
async fn newest_backup(dir: &Path) -> Result<Option<SystemTime>, LibraryError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LibraryError::io(dir, e)),
    };
    let mut newest = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| LibraryError::io(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_EXT)) {
            continue;
        }
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        if newest.is_none_or(|n| modified > n) {
            newest = Some(modified);
        }
    }
    Ok(newest)
}

/// Copies the database into `dir` unless the newest backup there is younger
/// than `frequency`. Returns the path of the new backup.
///
/// # Errors
///
/// IO errors on `dir` and a failing `VACUUM INTO`.
#[instrument(skip(pool), fields(dir = %dir.display()))]
pub async fn backup(
    pool: &SqlitePool,
    dir: &Path,
    frequency: Duration,
) -> Result<Option<PathBuf>, LibraryError> {
    if let Some(newest) = newest_backup(dir).await? {
        let age = SystemTime::now()
            .duration_since(newest)
            .unwrap_or(Duration::ZERO);
        if age < frequency {
            debug!(age_secs = age.as_secs(), "recent backup exists, skipping");
            return Ok(None);
        }
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| LibraryError::io(dir, e))?;
    let target = dir.join(format!(
        "{BACKUP_PREFIX}{}{BACKUP_EXT}",
        Local::now().format("%Y-%m-%d_%H%M%S")
    ));
    sqlx::query("VACUUM INTO ?")
        .bind(target.to_string_lossy().into_owned())
        .execute(pool)
        .await?;
    info!(path = %target.display(), "database backed up");
    Ok(Some(target))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn test_csv_line_has_one_field_per_header() {
        let row = SnapshotRow {
            id: 7,
            date: "2024-01-01".to_string(),
            title: Some("[F4M] a, b".to_string()),
            description: None,
            url: "https://soundgasm.net/u/a/b".to_string(),
            direct_url: None,
            filename: "a/b.m4a".to_string(),
            extractor: "sgasm".to_string(),
            artist: Some("a".to_string()),
            collection_url: None,
            collection_title: None,
            reddit_url: None,
            subreddit: None,
            reddit_created: None,
            upvotes: Some(12),
            flair: None,
        };
        let line = csv_line(&row);
        assert!(line.starts_with("7,2024-01-01,\"[F4M] a, b\","));
        assert!(line.contains(",12,"));
    }
}
