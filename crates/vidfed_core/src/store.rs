/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Clone)]
pub struct FederationDb {
    path: PathBuf,
    busy_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Person,
    Group,
    Application,
    Service,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Person => "Person",
            ActorKind::Group => "Group",
            ActorKind::Application => "Application",
            ActorKind::Service => "Service",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim() {
            "Person" => Some(Self::Person),
            "Group" => Some(Self::Group),
            "Application" => Some(Self::Application),
            "Service" => Some(Self::Service),
            _ => None,
        }
    }

    /// Only human-controlled identities own an account.
    pub fn owns_account(&self) -> bool {
        matches!(self, ActorKind::Person)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub id: i64,
    pub url: String,
    pub kind: ActorKind,
    pub inbox_url: String,
    pub shared_inbox_url: Option<String>,
    pub account_id: Option<i64>,
    pub is_local: bool,
}

impl Actor {
    pub fn delivery_inbox(&self) -> &str {
        self.shared_inbox_url.as_deref().unwrap_or(&self.inbox_url)
    }
}

#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privacy {
    Public = 1,
    Unlisted = 2,
    Private = 3,
}

impl Privacy {
    pub fn from_audience(to: &[String], cc: &[String]) -> Self {
        if vidfed_protocol::is_public(to) {
            Privacy::Public
        } else if vidfed_protocol::is_public(cc) {
            Privacy::Unlisted
        } else {
            Privacy::Private
        }
    }

    fn from_i64(v: i64) -> Self {
        match v {
            1 => Privacy::Public,
            2 => Privacy::Unlisted,
            _ => Privacy::Private,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: i64,
    pub uuid: String,
    pub url: String,
    pub name: String,
    pub channel_actor_id: Option<i64>,
    pub account_actor_id: Option<i64>,
    pub is_owned: bool,
    pub privacy: Privacy,
    pub nsfw: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFile {
    pub video_id: i64,
    pub resolution: u32,
    pub url: String,
    pub media_type: String,
    pub size: Option<i64>,
    pub fps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: i64,
    pub url: String,
    pub video_id: i64,
    pub account_id: Option<i64>,
    pub in_reply_to_comment_id: Option<i64>,
    pub origin_comment_id: Option<i64>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheFile {
    pub id: i64,
    pub url: String,
    pub video_id: i64,
    pub actor_id: i64,
    pub resolution: u32,
    pub file_url: String,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_account_id: i64,
    pub privacy: Privacy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub position: u32,
    pub video_id: i64,
    pub start_timestamp: Option<u32>,
    pub stop_timestamp: Option<u32>,
}

/// A resolver result. `created` is decided by the same statement that persisted the row.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub entity: T,
    pub created: bool,
}

impl<T> Resolved<T> {
    pub fn created(entity: T) -> Self {
        Self { entity, created: true }
    }

    pub fn existing(entity: T) -> Self {
        Self { entity, created: false }
    }
}

impl FederationDb {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir: {}", parent.display()))?;
        }
        let conn = Connection::open(&path).with_context(|| format!("open db: {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS accounts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS actors (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL UNIQUE,
              kind TEXT NOT NULL,
              inbox_url TEXT NOT NULL,
              shared_inbox_url TEXT NULL,
              account_id INTEGER NULL REFERENCES accounts(id),
              is_local INTEGER NOT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS videos (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              uuid TEXT NOT NULL UNIQUE,
              url TEXT NOT NULL UNIQUE,
              name TEXT NOT NULL,
              channel_actor_id INTEGER NULL REFERENCES actors(id),
              account_actor_id INTEGER NULL REFERENCES actors(id),
              is_owned INTEGER NOT NULL,
              privacy INTEGER NOT NULL,
              nsfw INTEGER NOT NULL,
              published_at TEXT NULL,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS video_files (
              video_id INTEGER NOT NULL REFERENCES videos(id),
              resolution INTEGER NOT NULL,
              url TEXT NOT NULL,
              media_type TEXT NOT NULL,
              size INTEGER NULL,
              fps INTEGER NULL,
              PRIMARY KEY(video_id, resolution)
            );

            CREATE TABLE IF NOT EXISTS comments (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL UNIQUE,
              video_id INTEGER NOT NULL REFERENCES videos(id),
              account_id INTEGER NULL REFERENCES accounts(id),
              in_reply_to_comment_id INTEGER NULL REFERENCES comments(id),
              origin_comment_id INTEGER NULL REFERENCES comments(id),
              text TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_comments_video ON comments(video_id);

            CREATE TABLE IF NOT EXISTS cache_files (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL,
              video_id INTEGER NOT NULL REFERENCES videos(id),
              actor_id INTEGER NOT NULL REFERENCES actors(id),
              resolution INTEGER NOT NULL,
              file_url TEXT NOT NULL,
              expires_at TEXT NULL,
              updated_at_ms INTEGER NOT NULL,
              UNIQUE(video_id, actor_id, resolution)
            );

            CREATE TABLE IF NOT EXISTS playlists (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              url TEXT NOT NULL UNIQUE,
              name TEXT NOT NULL,
              description TEXT NULL,
              owner_account_id INTEGER NOT NULL REFERENCES accounts(id),
              privacy INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS playlist_elements (
              playlist_id INTEGER NOT NULL REFERENCES playlists(id),
              position INTEGER NOT NULL,
              video_id INTEGER NOT NULL REFERENCES videos(id),
              start_timestamp INTEGER NULL,
              stop_timestamp INTEGER NULL,
              PRIMARY KEY(playlist_id, position)
            );

            CREATE TABLE IF NOT EXISTS follows (
              follower_actor_id INTEGER NOT NULL REFERENCES actors(id),
              target_actor_id INTEGER NOT NULL REFERENCES actors(id),
              created_at_ms INTEGER NOT NULL,
              PRIMARY KEY(follower_actor_id, target_actor_id)
            );
            CREATE INDEX IF NOT EXISTS idx_follows_target ON follows(target_actor_id);
            "#,
        )?;
        Ok(Self { path, busy_timeout })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open db: {}", self.path.display()))?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Runs `work` inside one `BEGIN IMMEDIATE` transaction. Any error rolls every write back.
    pub fn transact_blocking<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = work(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub async fn transact<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.transact_blocking(work)).await?
    }

    pub async fn read<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.connect()?;
            work(&conn)
        })
        .await?
    }

    pub fn get_actor(&self, actor_id: i64) -> Result<Option<Actor>> {
        actor_by_id(&self.connect()?, actor_id)
    }

    pub fn find_video_by_url(&self, url: &str) -> Result<Option<Video>> {
        video_by_url(&self.connect()?, url)
    }

    pub fn find_video_by_uuid(&self, uuid: &str) -> Result<Option<Video>> {
        video_by_uuid(&self.connect()?, uuid)
    }

    pub fn find_comment_by_url(&self, url: &str) -> Result<Option<Comment>> {
        comment_by_url(&self.connect()?, url)
    }

    pub fn list_video_files(&self, video_id: i64) -> Result<Vec<VideoFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT video_id, resolution, url, media_type, size, fps FROM video_files WHERE video_id=?1 ORDER BY resolution DESC",
        )?;
        let rows = stmt
            .query_map(params![video_id], |r| {
                Ok(VideoFile {
                    video_id: r.get(0)?,
                    resolution: r.get(1)?,
                    url: r.get(2)?,
                    media_type: r.get(3)?,
                    size: r.get(4)?,
                    fps: r.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_comments_for_video(&self, video_id: i64) -> Result<Vec<Comment>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("{COMMENT_COLUMNS} WHERE video_id=?1 ORDER BY id ASC"))?;
        let rows = stmt
            .query_map(params![video_id], map_comment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn list_cache_files(&self, video_id: i64) -> Result<Vec<CacheFile>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, url, video_id, actor_id, resolution, file_url, expires_at FROM cache_files WHERE video_id=?1 ORDER BY resolution DESC",
        )?;
        let rows = stmt
            .query_map(params![video_id], map_cache_file)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn find_playlist_by_url(&self, url: &str) -> Result<Option<Playlist>> {
        playlist_by_url(&self.connect()?, url)
    }

    pub fn list_playlist_entries(&self, playlist_id: i64) -> Result<Vec<PlaylistEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT position, video_id, start_timestamp, stop_timestamp FROM playlist_elements WHERE playlist_id=?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![playlist_id], |r| {
                Ok(PlaylistEntry {
                    position: r.get(0)?,
                    video_id: r.get(1)?,
                    start_timestamp: r.get(2)?,
                    stop_timestamp: r.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn add_follow(&self, follower_actor_id: i64, target_actor_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR IGNORE INTO follows(follower_actor_id, target_actor_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![follower_actor_id, target_actor_id, now_ms()],
        )?;
        Ok(())
    }

    /// Distinct followers of any of `target_actor_ids`.
    pub fn list_followers_of(&self, target_actor_ids: &[i64]) -> Result<Vec<Actor>> {
        if target_actor_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let placeholders = vec!["?"; target_actor_ids.len()].join(",");
        let sql = format!(
            r#"
            SELECT DISTINCT a.id, a.url, a.kind, a.inbox_url, a.shared_inbox_url, a.account_id, a.is_local
            FROM follows f JOIN actors a ON a.id = f.follower_actor_id
            WHERE f.target_actor_id IN ({placeholders})
            ORDER BY a.id ASC
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(target_actor_ids.iter()), map_actor)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_rows(&self, table: StoredKind) -> Result<u64> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.table()), [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }
}

/// Tables callers may count, e.g. to assert a rejected activity wrote nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredKind {
    Actors,
    Accounts,
    Videos,
    Comments,
    CacheFiles,
    Playlists,
    PlaylistElements,
}

impl StoredKind {
    fn table(&self) -> &'static str {
        match self {
            StoredKind::Actors => "actors",
            StoredKind::Accounts => "accounts",
            StoredKind::Videos => "videos",
            StoredKind::Comments => "comments",
            StoredKind::CacheFiles => "cache_files",
            StoredKind::Playlists => "playlists",
            StoredKind::PlaylistElements => "playlist_elements",
        }
    }
}

const ACTOR_COLUMNS: &str =
    "SELECT id, url, kind, inbox_url, shared_inbox_url, account_id, is_local FROM actors";
const VIDEO_COLUMNS: &str =
    "SELECT id, uuid, url, name, channel_actor_id, account_actor_id, is_owned, privacy, nsfw FROM videos";
const COMMENT_COLUMNS: &str =
    "SELECT id, url, video_id, account_id, in_reply_to_comment_id, origin_comment_id, text FROM comments";

fn map_actor(r: &Row<'_>) -> rusqlite::Result<Actor> {
    let kind: String = r.get(2)?;
    let is_local: i64 = r.get(6)?;
    Ok(Actor {
        id: r.get(0)?,
        url: r.get(1)?,
        kind: ActorKind::from_str(&kind).unwrap_or(ActorKind::Application),
        inbox_url: r.get(3)?,
        shared_inbox_url: r.get(4)?,
        account_id: r.get(5)?,
        is_local: is_local != 0,
    })
}

fn map_video(r: &Row<'_>) -> rusqlite::Result<Video> {
    let is_owned: i64 = r.get(6)?;
    let privacy: i64 = r.get(7)?;
    let nsfw: i64 = r.get(8)?;
    Ok(Video {
        id: r.get(0)?,
        uuid: r.get(1)?,
        url: r.get(2)?,
        name: r.get(3)?,
        channel_actor_id: r.get(4)?,
        account_actor_id: r.get(5)?,
        is_owned: is_owned != 0,
        privacy: Privacy::from_i64(privacy),
        nsfw: nsfw != 0,
    })
}

fn map_comment(r: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: r.get(0)?,
        url: r.get(1)?,
        video_id: r.get(2)?,
        account_id: r.get(3)?,
        in_reply_to_comment_id: r.get(4)?,
        origin_comment_id: r.get(5)?,
        text: r.get(6)?,
    })
}

fn map_cache_file(r: &Row<'_>) -> rusqlite::Result<CacheFile> {
    Ok(CacheFile {
        id: r.get(0)?,
        url: r.get(1)?,
        video_id: r.get(2)?,
        actor_id: r.get(3)?,
        resolution: r.get(4)?,
        file_url: r.get(5)?,
        expires_at: r.get(6)?,
    })
}

pub(crate) fn actor_by_id(conn: &Connection, actor_id: i64) -> Result<Option<Actor>> {
    conn.query_row(&format!("{ACTOR_COLUMNS} WHERE id=?1"), params![actor_id], map_actor)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn actor_by_url(conn: &Connection, url: &str) -> Result<Option<Actor>> {
    conn.query_row(&format!("{ACTOR_COLUMNS} WHERE url=?1"), params![url], map_actor)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn video_by_id(conn: &Connection, video_id: i64) -> Result<Option<Video>> {
    conn.query_row(&format!("{VIDEO_COLUMNS} WHERE id=?1"), params![video_id], map_video)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn video_by_url(conn: &Connection, url: &str) -> Result<Option<Video>> {
    conn.query_row(&format!("{VIDEO_COLUMNS} WHERE url=?1"), params![url], map_video)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn video_by_uuid(conn: &Connection, uuid: &str) -> Result<Option<Video>> {
    conn.query_row(&format!("{VIDEO_COLUMNS} WHERE uuid=?1"), params![uuid], map_video)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn comment_by_url(conn: &Connection, url: &str) -> Result<Option<Comment>> {
    conn.query_row(&format!("{COMMENT_COLUMNS} WHERE url=?1"), params![url], map_comment)
        .optional()
        .map_err(Into::into)
}

pub(crate) fn cache_file_by_key(
    conn: &Connection,
    video_id: i64,
    actor_id: i64,
    resolution: u32,
) -> Result<Option<CacheFile>> {
    conn.query_row(
        "SELECT id, url, video_id, actor_id, resolution, file_url, expires_at FROM cache_files WHERE video_id=?1 AND actor_id=?2 AND resolution=?3",
        params![video_id, actor_id, resolution],
        map_cache_file,
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn playlist_by_url(conn: &Connection, url: &str) -> Result<Option<Playlist>> {
    conn.query_row(
        "SELECT id, url, name, description, owner_account_id, privacy FROM playlists WHERE url=?1",
        params![url],
        |r| {
            let privacy: i64 = r.get(5)?;
            Ok(Playlist {
                id: r.get(0)?,
                url: r.get(1)?,
                name: r.get(2)?,
                description: r.get(3)?,
                owner_account_id: r.get(4)?,
                privacy: Privacy::from_i64(privacy),
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{is_transient, StoreConflict};

    fn temp_db() -> (tempfile::TempDir, FederationDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = FederationDb::open(dir.path().join("store.sqlite3"), Duration::from_secs(5)).unwrap();
        (dir, db)
    }

    fn insert_actor(tx: &Connection, url: &str) -> Result<i64> {
        tx.execute(
            "INSERT INTO actors(url, kind, inbox_url, is_local, created_at_ms) VALUES (?1, 'Person', ?2, 0, 0)",
            params![url, format!("{url}/inbox")],
        )?;
        Ok(tx.last_insert_rowid())
    }

    #[test]
    fn open_is_idempotent() {
        let (dir, db) = temp_db();
        db.health_check().unwrap();
        let again = FederationDb::open(db.path(), Duration::from_secs(1)).unwrap();
        again.health_check().unwrap();
        drop(dir);
    }

    #[test]
    fn failed_transaction_leaves_nothing_behind() {
        let (_dir, db) = temp_db();
        let res: Result<()> = db.transact_blocking(|tx| {
            insert_actor(tx, "https://peer.example/accounts/a")?;
            Err(StoreConflict::new("actors.url").into())
        });
        assert!(is_transient(&res.unwrap_err()));
        assert_eq!(db.count_rows(StoredKind::Actors).unwrap(), 0);
    }

    #[test]
    fn duplicate_url_surfaces_as_transient_conflict() {
        let (_dir, db) = temp_db();
        db.transact_blocking(|tx| insert_actor(tx, "https://peer.example/accounts/a"))
            .unwrap();
        let err = db
            .transact_blocking(|tx| insert_actor(tx, "https://peer.example/accounts/a"))
            .unwrap_err();
        assert!(is_transient(&err));
    }

    #[test]
    fn followers_are_distinct_across_targets() {
        let (_dir, db) = temp_db();
        let (fan, channel, account) = db
            .transact_blocking(|tx| {
                Ok((
                    insert_actor(tx, "https://peer.example/accounts/fan")?,
                    insert_actor(tx, "https://local.example/video-channels/main")?,
                    insert_actor(tx, "https://local.example/accounts/owner")?,
                ))
            })
            .unwrap();
        db.add_follow(fan, channel).unwrap();
        db.add_follow(fan, account).unwrap();
        db.add_follow(fan, account).unwrap();

        let followers = db.list_followers_of(&[channel, account]).unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].url, "https://peer.example/accounts/fan");
        assert!(db.list_followers_of(&[]).unwrap().is_empty());
    }

    #[test]
    fn privacy_from_audience() {
        let public = vec![vidfed_protocol::AS_PUBLIC.to_string()];
        assert_eq!(Privacy::from_audience(&public, &[]), Privacy::Public);
        assert_eq!(Privacy::from_audience(&[], &public), Privacy::Unlisted);
        assert_eq!(Privacy::from_audience(&[], &[]), Privacy::Private);
    }
}
