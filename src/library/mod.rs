//! Persistent record of everything that was downloaded.
//!
//! All row-level operations take a `&mut SqliteConnection` so the caller
//! decides the transaction scope: pass a pool connection for autocommit, or a
//! [`Transaction`](sqlx::Transaction) (dereferenced) to group writes with a
//! transfer and roll them back when it fails.
//!
//! # Overview
//!
//! - [`url_or_direct_url_exists`] / [`find_audio_by_urls`] - dedup lookups
//! - [`insert_audio_file`] / [`insert_collection`] - rows for new downloads
//! - [`delete_collection_tree`] - drops a submission that kept no audio
//! - [`update_missing_reddit_fields`] - backfill of reddit context
//! - [`export_flattened_snapshot`] / [`backup`] - end-of-run housekeeping

mod error;
mod export;
mod record;

pub use error::{LibraryDbErrorKind, LibraryError};
pub use export::{backup, export_flattened_snapshot};
pub use record::{ExistingAudio, MissingRedditFields, SnapshotRow};

use std::collections::HashSet;

use sqlx::{Connection, Row, SqliteConnection};
use tracing::{debug, instrument};

use crate::content::{ContentTree, FileInfo, NodeId, RedditInfo};

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Which of `urls` are already recorded, as page url or as direct url.
///
/// # Errors
///
/// [`LibraryError::Database`] if the query fails.
#[instrument(level = "debug", skip(conn, urls), fields(count = urls.len()))]
pub async fn url_or_direct_url_exists(
    conn: &mut SqliteConnection,
    urls: &[&str],
) -> Result<HashSet<String>, LibraryError> {
    if urls.is_empty() {
        return Ok(HashSet::new());
    }
    let marks = placeholders(urls.len());
    let sql = format!(
        "SELECT url, direct_url FROM audio_file WHERE url IN ({marks}) OR direct_url IN ({marks})"
    );
    let mut query = sqlx::query(&sql);
    for url in urls.iter().chain(urls.iter()) {
        query = query.bind(*url);
    }
    let rows = query.fetch_all(&mut *conn).await?;

    let mut stored = HashSet::new();
    for row in rows {
        stored.insert(row.get::<String, _>("url"));
        if let Some(direct) = row.get::<Option<String>, _>("direct_url") {
            stored.insert(direct);
        }
    }
    Ok(urls
        .iter()
        .filter(|u| stored.contains(**u))
        .map(|u| (*u).to_string())
        .collect())
}

/// The stored audio row matching either url, oldest first.
///
/// # Errors
///
/// [`LibraryError::Database`] if the query fails.
#[instrument(level = "debug", skip(conn))]
pub async fn find_audio_by_urls(
    conn: &mut SqliteConnection,
    page_url: &str,
    direct_url: &str,
) -> Result<Option<ExistingAudio>, LibraryError> {
    let found = sqlx::query_as::<_, ExistingAudio>(
        r"SELECT id, url, direct_url, filename, collection_id, extractor
          FROM audio_file
          WHERE url IN (?, ?) OR direct_url IN (?, ?)
          ORDER BY id
          LIMIT 1",
    )
    .bind(page_url)
    .bind(direct_url)
    .bind(page_url)
    .bind(direct_url)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(found)
}

/// Id and stored spelling of an artist, creating the row on first sight.
///
/// Names are matched case-insensitively; the first spelling seen wins.
async fn get_or_create_alias(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<(i64, String), LibraryError> {
    sqlx::query("INSERT INTO alias (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    let row = sqlx::query("SELECT id, name FROM alias WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok((row.get("id"), row.get("name")))
}

/// Stored spelling of `name`, or `name` itself when it is new.
///
/// # Errors
///
/// [`LibraryError::Database`] if the query fails.
pub async fn resolve_alias(conn: &mut SqliteConnection, name: &str) -> Result<String, LibraryError> {
    let stored: Option<(String,)> = sqlx::query_as("SELECT name FROM alias WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(stored.map_or_else(|| name.to_string(), |(n,)| n))
}

/// Records a downloaded audio file. Returns the new row id.
///
/// `filename` is the path relative to the library root.
///
/// # Errors
///
/// [`LibraryError::Database`], including a constraint violation when the
/// page url is already stored.
#[instrument(skip(conn, info), fields(url = %info.page_url))]
pub async fn insert_audio_file(
    conn: &mut SqliteConnection,
    info: &FileInfo,
    collection_id: Option<i64>,
    filename: &str,
    author: &str,
) -> Result<i64, LibraryError> {
    let (alias_id, _) = get_or_create_alias(conn, author).await?;
    let row = sqlx::query(
        r"INSERT INTO audio_file (
              url, direct_url, filename, title, description, id_on_page,
              extractor, alias_id, collection_id, downloaded_with_collection
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
          RETURNING id",
    )
    .bind(&info.page_url)
    .bind(&info.direct_url)
    .bind(filename)
    .bind(info.title.as_deref())
    .bind(info.descr.as_deref())
    .bind(info.id.as_deref())
    .bind(info.extractor.name())
    .bind(alias_id)
    .bind(collection_id)
    .bind(collection_id.is_some())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get("id"))
}

async fn insert_reddit_info(
    conn: &mut SqliteConnection,
    info: &RedditInfo,
) -> Result<i64, LibraryError> {
    sqlx::query(
        r"INSERT INTO reddit_info (
              permalink, selftext, created_utc, subreddit, r_post_url, upvotes, flair
          )
          VALUES (?, ?, ?, ?, ?, ?, ?)
          ON CONFLICT(permalink) DO NOTHING",
    )
    .bind(&info.permalink)
    .bind(info.selftext.as_deref())
    .bind(info.created_utc.to_rfc3339())
    .bind(&info.subreddit)
    .bind(&info.r_post_url)
    .bind(info.upvotes)
    .bind(info.flair.as_deref())
    .execute(&mut *conn)
    .await?;
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM reddit_info WHERE permalink = ?")
        .bind(&info.permalink)
        .fetch_one(&mut *conn)
        .await?;
    Ok(id)
}

/// Records the collection `node` (and its reddit submission, if any).
///
/// Idempotent on the collection url: a second call returns the existing row.
/// Returns the row id and the author spelling to use for directories, which
/// is the stored alias when the artist is already known under another case.
///
/// # Errors
///
/// [`LibraryError::MissingData`] when `node` is not a collection, otherwise
/// [`LibraryError::Database`].
#[instrument(skip(conn, tree), fields(url = %tree.url(node)))]
pub async fn insert_collection(
    conn: &mut SqliteConnection,
    tree: &ContentTree,
    node: NodeId,
    author: &str,
    parent_id: Option<i64>,
) -> Result<(i64, String), LibraryError> {
    let coll = tree.collection(node).ok_or_else(|| LibraryError::MissingData {
        url: tree.url(node).to_string(),
        reason: "not a collection".to_string(),
    })?;

    let existing = sqlx::query(
        r"SELECT c.id, al.name AS alias
          FROM file_collection c
          LEFT JOIN alias al ON al.id = c.alias_id
          WHERE c.url = ?",
    )
    .bind(&coll.url)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(row) = existing {
        debug!("collection already recorded");
        let alias: Option<String> = row.get("alias");
        return Ok((row.get("id"), alias.unwrap_or_else(|| author.to_string())));
    }

    let (alias_id, resolved_author) = get_or_create_alias(conn, author).await?;
    let reddit_info_id = match &coll.reddit {
        Some(info) => Some(insert_reddit_info(conn, info).await?),
        None => None,
    };

    let row = sqlx::query(
        r"INSERT INTO file_collection (
              url, id_on_page, title, subpath, extractor, alias_id, parent_id, reddit_info_id
          )
          VALUES (?, ?, ?, ?, ?, ?, ?, ?)
          RETURNING id",
    )
    .bind(&coll.url)
    .bind(coll.id.as_deref())
    .bind(coll.title.as_deref())
    .bind(tree.subpath(node))
    .bind(coll.extractor.name())
    .bind(alias_id)
    .bind(parent_id)
    .bind(reddit_info_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok((row.get("id"), resolved_author))
}

/// Row id of the collection stored under `url`.
///
/// # Errors
///
/// [`LibraryError::Database`] if the query fails.
pub async fn find_collection_id(
    conn: &mut SqliteConnection,
    url: &str,
) -> Result<Option<i64>, LibraryError> {
    let found: Option<(i64,)> = sqlx::query_as("SELECT id FROM file_collection WHERE url = ?")
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.map(|(id,)| id))
}

/// Removes collection `collection_id`, every collection nested below it and
/// the reddit rows no remaining collection refers to. Returns the number of
/// collection rows removed.
///
/// Fails with a foreign key violation, and removes nothing, while an audio
/// row still belongs to one of the collections.
///
/// # Errors
///
/// [`LibraryError::Database`] if a statement fails.
#[instrument(skip(conn))]
pub async fn delete_collection_tree(
    conn: &mut SqliteConnection,
    collection_id: i64,
) -> Result<u64, LibraryError> {
    const SUBTREE: &str = r"WITH RECURSIVE subtree(id) AS (
              SELECT ?
              UNION ALL
              SELECT c.id FROM file_collection c JOIN subtree s ON c.parent_id = s.id
          )";

    let mut tx = conn.begin().await?;
    let reddit_ids: Vec<(i64,)> = sqlx::query_as(&format!(
        "{SUBTREE} SELECT reddit_info_id FROM file_collection
          WHERE id IN (SELECT id FROM subtree) AND reddit_info_id IS NOT NULL"
    ))
    .bind(collection_id)
    .fetch_all(&mut *tx)
    .await?;

    let removed = sqlx::query(&format!(
        "{SUBTREE} DELETE FROM file_collection WHERE id IN (SELECT id FROM subtree)"
    ))
    .bind(collection_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if !reddit_ids.is_empty() {
        let sql = format!(
            r"DELETE FROM reddit_info
              WHERE id IN ({})
                AND NOT EXISTS (
                    SELECT 1 FROM file_collection c WHERE c.reddit_info_id = reddit_info.id
                )",
            placeholders(reddit_ids.len())
        );
        let mut query = sqlx::query(&sql);
        for (id,) in &reddit_ids {
            query = query.bind(*id);
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;
    debug!(removed, "collection rows removed");
    Ok(removed)
}

/// Fills the NULL columns of audio row `audio_id` from `fields`.
/// Returns whether the row exists.
///
/// # Errors
///
/// [`LibraryError::Database`] if the update fails.
#[instrument(skip(conn, fields))]
pub async fn update_missing_reddit_fields(
    conn: &mut SqliteConnection,
    audio_id: i64,
    fields: &MissingRedditFields<'_>,
) -> Result<bool, LibraryError> {
    let result = sqlx::query(
        r"UPDATE audio_file
          SET collection_id = COALESCE(collection_id, ?),
              title = COALESCE(title, ?),
              description = COALESCE(description, ?)
          WHERE id = ?",
    )
    .bind(fields.collection_id)
    .bind(fields.title)
    .bind(fields.description)
    .bind(audio_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use sqlx::Connection;

    use super::*;
    use crate::Database;
    use crate::content::FileCollection;
    use crate::extractor::ExtractorType;

    fn audio(page: &str, direct: &str) -> FileInfo {
        FileInfo::new(ExtractorType::Soundgasm, true, "m4a", page, direct)
            .with_title(Some("A title".to_string()))
    }

    fn reddit_collection(tree: &mut ContentTree, permalink: &str, author: &str) -> NodeId {
        tree.add_collection(
            FileCollection::new(ExtractorType::Reddit, permalink)
                .with_author(Some(author.to_string()))
                .with_reddit(RedditInfo {
                    permalink: permalink.to_string(),
                    selftext: Some("text".to_string()),
                    created_utc: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
                    subreddit: "gonewildaudio".to_string(),
                    r_post_url: permalink.to_string(),
                    upvotes: Some(5),
                    flair: None,
                }),
        )
    }

    #[tokio::test]
    async fn test_exists_matches_page_or_direct_url() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        insert_audio_file(&mut conn, &audio("https://p/1", "https://d/1"), None, "a/1.m4a", "a")
            .await
            .unwrap();

        let found = url_or_direct_url_exists(&mut conn, &["https://d/1", "https://p/2"])
            .await
            .unwrap();
        assert_eq!(found, HashSet::from(["https://d/1".to_string()]));

        // lookups don't change state
        let again = url_or_direct_url_exists(&mut conn, &["https://d/1", "https://p/2"])
            .await
            .unwrap();
        assert_eq!(found, again);
        assert!(url_or_direct_url_exists(&mut conn, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_audio_by_swapped_urls() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let id = insert_audio_file(&mut conn, &audio("https://p/1", "https://d/1"), None, "a/1.m4a", "a")
            .await
            .unwrap();

        let by_direct = find_audio_by_urls(&mut conn, "https://p/other", "https://d/1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_direct.id, id);
        assert!(by_direct.is_standalone());
        assert_eq!(by_direct.extractor, "sgasm");
        assert!(
            find_audio_by_urls(&mut conn, "https://p/x", "https://d/x")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_insert_collection_is_idempotent_and_merges_alias_case() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut tree = ContentTree::new();

        let first = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/a/", "SomeVoice");
        let (id, author) = insert_collection(&mut conn, &tree, first, "SomeVoice", None)
            .await
            .unwrap();
        assert_eq!(author, "SomeVoice");

        let (again, _) = insert_collection(&mut conn, &tree, first, "SomeVoice", None)
            .await
            .unwrap();
        assert_eq!(id, again);

        let second = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/b/", "somevoice");
        let (other, author) = insert_collection(&mut conn, &tree, second, "somevoice", None)
            .await
            .unwrap();
        assert_ne!(id, other);
        assert_eq!(author, "SomeVoice");
        assert_eq!(resolve_alias(&mut conn, "SOMEVOICE").await.unwrap(), "SomeVoice");

        let (aliases,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alias")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(aliases, 1);
        let (infos,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reddit_info")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(infos, 2);
    }

    #[tokio::test]
    async fn test_insert_collection_rejects_file_node() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut tree = ContentTree::new();
        let file = tree.add_file(audio("https://p/1", "https://d/1"));
        let err = insert_collection(&mut conn, &tree, file, "a", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::MissingData { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_fills_only_nulls() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut tree = ContentTree::new();
        let coll = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/c/", "a");
        let (coll_id, _) = insert_collection(&mut conn, &tree, coll, "a", None).await.unwrap();

        let info = audio("https://p/1", "https://d/1");
        let audio_id = insert_audio_file(&mut conn, &info, None, "a/1.m4a", "a").await.unwrap();

        let fields = MissingRedditFields {
            collection_id: coll_id,
            title: Some("New title"),
            description: Some("New description"),
        };
        assert!(update_missing_reddit_fields(&mut conn, audio_id, &fields).await.unwrap());

        let row = sqlx::query("SELECT collection_id, title, description FROM audio_file WHERE id = ?")
            .bind(audio_id)
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(row.get::<Option<i64>, _>("collection_id"), Some(coll_id));
        assert_eq!(row.get::<String, _>("title"), "A title");
        assert_eq!(row.get::<String, _>("description"), "New description");

        assert!(!update_missing_reddit_fields(&mut conn, 9999, &fields).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_collection_tree_removes_nested_rows() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut tree = ContentTree::new();
        let post = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/e/", "a");
        let album = tree.add_collection(FileCollection::new(ExtractorType::ImgurAlbum, "https://imgur.com/a/x"));
        let kept = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/f/", "a");

        let (post_id, _) = insert_collection(&mut conn, &tree, post, "a", None).await.unwrap();
        insert_collection(&mut conn, &tree, album, "a", Some(post_id)).await.unwrap();
        let (kept_id, _) = insert_collection(&mut conn, &tree, kept, "a", None).await.unwrap();
        assert_eq!(
            find_collection_id(&mut conn, "https://imgur.com/a/x").await.unwrap().map(|id| id > post_id),
            Some(true)
        );

        assert_eq!(delete_collection_tree(&mut conn, post_id).await.unwrap(), 2);
        assert!(find_collection_id(&mut conn, "https://imgur.com/a/x").await.unwrap().is_none());
        assert_eq!(
            find_collection_id(&mut conn, "https://www.reddit.com/r/g/comments/f/").await.unwrap(),
            Some(kept_id)
        );
        let (infos,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reddit_info")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(infos, 1);
    }

    #[tokio::test]
    async fn test_delete_collection_tree_keeps_collections_with_audio() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut tree = ContentTree::new();
        let post = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/g/", "a");
        let (post_id, _) = insert_collection(&mut conn, &tree, post, "a", None).await.unwrap();
        insert_audio_file(&mut conn, &audio("https://p/1", "https://d/1"), Some(post_id), "a/1.m4a", "a")
            .await
            .unwrap();

        assert!(delete_collection_tree(&mut conn, post_id).await.is_err());
        assert_eq!(
            find_collection_id(&mut conn, "https://www.reddit.com/r/g/comments/g/").await.unwrap(),
            Some(post_id)
        );
    }

    #[tokio::test]
    async fn test_rolled_back_savepoint_discards_rows() {
        let db = Database::new_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let mut tree = ContentTree::new();
        let coll = reddit_collection(&mut tree, "https://www.reddit.com/r/g/comments/d/", "a");

        let mut outer = conn.begin().await.unwrap();
        insert_collection(&mut outer, &tree, coll, "a", None).await.unwrap();
        {
            let mut inner = outer.begin().await.unwrap();
            insert_audio_file(&mut inner, &audio("https://p/1", "https://d/1"), None, "f", "a")
                .await
                .unwrap();
            inner.rollback().await.unwrap();
        }
        outer.rollback().await.unwrap();

        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM reddit_info")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(n, 0);
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audio_file")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_export_and_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("gwarip_db.sqlite")).await.unwrap();
        {
            let mut conn = db.pool().acquire().await.unwrap();
            insert_audio_file(&mut conn, &audio("https://p/1", "https://d/1"), None, "a/1.m4a", "a")
                .await
                .unwrap();
        }

        let csv = dir.path().join("_db-autocsv.csv");
        assert_eq!(export_flattened_snapshot(db.pool(), &csv).await.unwrap(), 1);
        let text = std::fs::read_to_string(&csv).unwrap();
        assert!(text.starts_with("id,date,title"));
        assert!(text.contains("https://p/1"));

        let bu_dir = dir.path().join("_db-bu");
        let first = backup(db.pool(), &bu_dir, std::time::Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(first.unwrap().exists());
        let second = backup(db.pool(), &bu_dir, std::time::Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(second.is_none(), "fresh backup should gate the next one");
        db.close().await;
    }
}
