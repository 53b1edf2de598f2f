/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Resolve-or-create, one function per object kind.
//!
//! Every function here runs inside a caller-owned transaction and reports whether
//! it created the row. Creation goes through `INSERT .. ON CONFLICT DO NOTHING` (or a
//! plain insert guarded by a UNIQUE constraint), so when two deliveries race on the
//! same remote object the loser either sees zero changed rows and re-reads the
//! winner's row with `created = false`, or gets a constraint error that the retry
//! wrapper turns into a fresh attempt.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use vidfed_protocol::{CacheFileObject, CommentObject, PlaylistObject, VideoObject};

use crate::error::{IngestError, StoreConflict};
use crate::store::{
    actor_by_id, actor_by_url, cache_file_by_key, comment_by_url, now_ms, playlist_by_url,
    video_by_id, video_by_url, video_by_uuid, Actor, ActorKind, CacheFile, Comment, Playlist,
    Privacy, Resolved, Video,
};

#[derive(Debug, Clone)]
pub struct ActorDescriptor<'a> {
    pub url: &'a str,
    pub kind: ActorKind,
    pub inbox: Option<&'a str>,
    pub shared_inbox: Option<&'a str>,
}

impl<'a> ActorDescriptor<'a> {
    pub fn new(url: &'a str, kind: ActorKind) -> Self {
        Self {
            url,
            kind,
            inbox: None,
            shared_inbox: None,
        }
    }
}

/// A video that is either already stored or still has to be materialized.
#[derive(Debug, Clone)]
pub enum VideoTarget {
    Stored(Video),
    Remote(Box<VideoObject>),
}

impl VideoTarget {
    pub fn url(&self) -> &str {
        match self {
            VideoTarget::Stored(v) => &v.url,
            VideoTarget::Remote(o) => &o.id,
        }
    }
}

pub fn is_local_url(local_base: &str, url: &str) -> bool {
    let base = local_base.trim_end_matches('/');
    if base.is_empty() {
        return false;
    }
    url == base || url.starts_with(&format!("{base}/"))
}

pub fn resolve_actor(
    conn: &Connection,
    local_base: &str,
    desc: &ActorDescriptor<'_>,
) -> Result<Resolved<Actor>> {
    let url = desc.url.trim();
    if url.is_empty() {
        return Err(IngestError::Malformed {
            kind: "actor",
            id: String::new(),
            reason: "empty actor url".to_string(),
        }
        .into());
    }
    if let Some(actor) = actor_by_url(conn, url)? {
        return Ok(Resolved::existing(actor));
    }

    let inbox = desc
        .inbox
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}/inbox", url.trim_end_matches('/')));
    let inserted = conn.execute(
        r#"
        INSERT INTO actors(url, kind, inbox_url, shared_inbox_url, account_id, is_local, created_at_ms)
        VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)
        ON CONFLICT(url) DO NOTHING
        "#,
        params![
            url,
            desc.kind.as_str(),
            inbox,
            desc.shared_inbox,
            is_local_url(local_base, url) as i64,
            now_ms()
        ],
    )?;
    if inserted == 0 {
        return reread(actor_by_url(conn, url)?, "actors.url");
    }
    let actor_id = conn.last_insert_rowid();

    if desc.kind.owns_account() {
        conn.execute(
            "INSERT INTO accounts(name, created_at_ms) VALUES (?1, ?2)",
            params![account_name(url), now_ms()],
        )?;
        let account_id = conn.last_insert_rowid();
        conn.execute(
            "UPDATE actors SET account_id=?1 WHERE id=?2",
            params![account_id, actor_id],
        )?;
    }

    let actor = actor_by_id(conn, actor_id)?.context("actor missing after insert")?;
    Ok(Resolved::created(actor))
}

pub fn resolve_video(conn: &Connection, local_base: &str, obj: &VideoObject) -> Result<Resolved<Video>> {
    if obj.id.trim().is_empty() || obj.uuid.trim().is_empty() {
        return Err(IngestError::Malformed {
            kind: "video",
            id: obj.id.clone(),
            reason: "missing id or uuid".to_string(),
        }
        .into());
    }
    if let Some(video) = find_video(conn, obj)? {
        return Ok(Resolved::existing(video));
    }

    let channel_link = obj.channel().ok_or_else(|| IngestError::Malformed {
        kind: "video",
        id: obj.id.clone(),
        reason: "no channel in attributedTo".to_string(),
    })?;
    let account_link = obj.account();
    // Both links are checked before the first insert.
    if channel_link.id.trim().is_empty() || account_link.is_some_and(|l| l.id.trim().is_empty()) {
        return Err(IngestError::Malformed {
            kind: "video",
            id: obj.id.clone(),
            reason: "empty actor id in attributedTo".to_string(),
        }
        .into());
    }
    let channel = resolve_actor(conn, local_base, &ActorDescriptor::new(&channel_link.id, ActorKind::Group))?;
    let account = match account_link {
        Some(link) => Some(resolve_actor(conn, local_base, &ActorDescriptor::new(&link.id, ActorKind::Person))?),
        None => None,
    };

    let privacy = Privacy::from_audience(&obj.to, &obj.cc);
    let inserted = conn.execute(
        r#"
        INSERT INTO videos(uuid, url, name, channel_actor_id, account_actor_id, is_owned, privacy, nsfw, published_at, created_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT DO NOTHING
        "#,
        params![
            obj.uuid,
            obj.id,
            obj.name,
            channel.entity.id,
            account.as_ref().map(|a| a.entity.id),
            is_local_url(local_base, &obj.id) as i64,
            privacy as i64,
            obj.sensitive as i64,
            obj.published,
            now_ms()
        ],
    )?;
    if inserted == 0 {
        return reread(find_video(conn, obj)?, "videos.uuid");
    }
    let video_id = conn.last_insert_rowid();

    for link in obj.url.iter().filter(|l| l.is_video_file()) {
        let Some(resolution) = link.height else { continue };
        conn.execute(
            r#"
            INSERT INTO video_files(video_id, resolution, url, media_type, size, fps)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(video_id, resolution) DO UPDATE SET
              url=excluded.url,
              media_type=excluded.media_type,
              size=excluded.size,
              fps=excluded.fps
            "#,
            params![
                video_id,
                resolution,
                link.href,
                link.media_type,
                link.size.map(|s| s.min(i64::MAX as u64) as i64),
                link.fps
            ],
        )?;
    }

    let video = video_by_id(conn, video_id)?.context("video missing after insert")?;
    Ok(Resolved::created(video))
}

pub fn materialize_video(conn: &Connection, local_base: &str, target: &VideoTarget) -> Result<Resolved<Video>> {
    match target {
        VideoTarget::Stored(video) => {
            let fresh = video_by_id(conn, video.id)?.unwrap_or_else(|| video.clone());
            Ok(Resolved::existing(fresh))
        }
        VideoTarget::Remote(obj) => resolve_video(conn, local_base, obj),
    }
}

pub fn resolve_comment(
    conn: &Connection,
    video: &Video,
    obj: &CommentObject,
    parent: Option<&Comment>,
    account_id: Option<i64>,
) -> Result<Resolved<Comment>> {
    if obj.id.trim().is_empty() {
        return Err(IngestError::Malformed {
            kind: "comment",
            id: String::new(),
            reason: "missing id".to_string(),
        }
        .into());
    }
    if let Some(comment) = comment_by_url(conn, &obj.id)? {
        return Ok(Resolved::existing(comment));
    }

    let origin = parent.map(|p| p.origin_comment_id.unwrap_or(p.id));
    let inserted = conn.execute(
        r#"
        INSERT INTO comments(url, video_id, account_id, in_reply_to_comment_id, origin_comment_id, text, created_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(url) DO NOTHING
        "#,
        params![
            obj.id,
            video.id,
            account_id,
            parent.map(|p| p.id),
            origin,
            obj.content,
            now_ms()
        ],
    )?;
    if inserted == 0 {
        return reread(comment_by_url(conn, &obj.id)?, "comments.url");
    }
    let comment = comment_by_url(conn, &obj.id)?.context("comment missing after insert")?;
    Ok(Resolved::created(comment))
}

/// Insert or refresh the (video, actor, resolution) cache entry.
pub fn upsert_cache_file(
    conn: &Connection,
    video: &Video,
    actor: &Actor,
    obj: &CacheFileObject,
) -> Result<Resolved<CacheFile>> {
    let resolution = obj.url.height.ok_or_else(|| IngestError::Malformed {
        kind: "cache file",
        id: obj.id.clone(),
        reason: "url has no height".to_string(),
    })?;

    if let Some(existing) = cache_file_by_key(conn, video.id, actor.id, resolution)? {
        conn.execute(
            "UPDATE cache_files SET url=?1, file_url=?2, expires_at=?3, updated_at_ms=?4 WHERE id=?5",
            params![obj.id, obj.url.href, obj.expires, now_ms(), existing.id],
        )?;
        let updated = cache_file_by_key(conn, video.id, actor.id, resolution)?
            .context("cache file missing after update")?;
        return Ok(Resolved::existing(updated));
    }

    // A concurrent insert of the same key fails the UNIQUE constraint; the retry
    // wrapper re-runs us and we take the update branch above.
    conn.execute(
        r#"
        INSERT INTO cache_files(url, video_id, actor_id, resolution, file_url, expires_at, updated_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![obj.id, video.id, actor.id, resolution, obj.url.href, obj.expires, now_ms()],
    )?;
    let created = cache_file_by_key(conn, video.id, actor.id, resolution)?
        .context("cache file missing after insert")?;
    Ok(Resolved::created(created))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistSlot {
    pub video_id: i64,
    pub start_timestamp: Option<u32>,
    pub stop_timestamp: Option<u32>,
}

/// Upserts the playlist row and replaces its element list wholesale.
pub fn replace_playlist(
    conn: &Connection,
    owner_account_id: i64,
    obj: &PlaylistObject,
    audience: &[String],
    slots: &[PlaylistSlot],
) -> Result<Resolved<Playlist>> {
    if obj.id.trim().is_empty() {
        return Err(IngestError::Malformed {
            kind: "playlist",
            id: String::new(),
            reason: "missing id".to_string(),
        }
        .into());
    }
    let existing = playlist_by_url(conn, &obj.id)?;
    if let Some(p) = &existing {
        if p.owner_account_id != owner_account_id {
            return Err(IngestError::OwnershipMismatch {
                kind: "playlist",
                id: obj.id.clone(),
            }
            .into());
        }
    }

    let privacy = if vidfed_protocol::is_public(audience) {
        Privacy::Public
    } else {
        Privacy::Unlisted
    };
    conn.execute(
        r#"
        INSERT INTO playlists(url, name, description, owner_account_id, privacy, updated_at_ms)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(url) DO UPDATE SET
          name=excluded.name,
          description=excluded.description,
          privacy=excluded.privacy,
          updated_at_ms=excluded.updated_at_ms
        "#,
        params![obj.id, obj.name, obj.content, owner_account_id, privacy as i64, now_ms()],
    )?;
    let playlist = playlist_by_url(conn, &obj.id)?.context("playlist missing after upsert")?;

    conn.execute(
        "DELETE FROM playlist_elements WHERE playlist_id=?1",
        params![playlist.id],
    )?;
    for (idx, slot) in slots.iter().enumerate() {
        conn.execute(
            r#"
            INSERT INTO playlist_elements(playlist_id, position, video_id, start_timestamp, stop_timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                playlist.id,
                (idx + 1) as i64,
                slot.video_id,
                slot.start_timestamp,
                slot.stop_timestamp
            ],
        )?;
    }

    Ok(Resolved {
        entity: playlist,
        created: existing.is_none(),
    })
}

fn find_video(conn: &Connection, obj: &VideoObject) -> Result<Option<Video>> {
    if let Some(v) = video_by_url(conn, &obj.id)? {
        return Ok(Some(v));
    }
    video_by_uuid(conn, &obj.uuid)
}

fn reread<T>(row: Option<T>, key: &str) -> Result<Resolved<T>> {
    row.map(Resolved::existing)
        .ok_or_else(|| StoreConflict::new(key).into())
}

fn account_name(actor_url: &str) -> String {
    actor_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(actor_url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_transient;
    use crate::store::{FederationDb, StoredKind};
    use std::time::Duration;
    use vidfed_protocol::{ActorLink, LinkObject, AS_PUBLIC};

    const LOCAL: &str = "https://local.example";

    fn temp_db() -> (tempfile::TempDir, FederationDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = FederationDb::open(dir.path().join("resolver.sqlite3"), Duration::from_secs(5)).unwrap();
        (dir, db)
    }

    fn video_object(base: &str, uuid: &str) -> VideoObject {
        VideoObject {
            id: format!("{base}/videos/watch/{uuid}"),
            uuid: uuid.to_string(),
            name: format!("video {uuid}"),
            sensitive: false,
            attributed_to: vec![
                ActorLink {
                    ty: "Person".to_string(),
                    id: format!("{base}/accounts/alice"),
                },
                ActorLink {
                    ty: "Group".to_string(),
                    id: format!("{base}/video-channels/alice_channel"),
                },
            ],
            url: vec![
                LinkObject {
                    ty: "Link".to_string(),
                    media_type: "video/mp4".to_string(),
                    href: format!("{base}/static/{uuid}-720.mp4"),
                    height: Some(720),
                    size: Some(1_000),
                    fps: Some(30),
                },
                LinkObject {
                    ty: "Link".to_string(),
                    media_type: "text/html".to_string(),
                    href: format!("{base}/videos/watch/{uuid}"),
                    height: None,
                    size: None,
                    fps: None,
                },
            ],
            published: None,
            duration: None,
            to: vec![AS_PUBLIC.to_string()],
            cc: vec![],
        }
    }

    #[test]
    fn video_resolution_is_idempotent() {
        let (_dir, db) = temp_db();
        let obj = video_object("https://peer.example", "abc");
        let first = db.transact_blocking(|tx| resolve_video(tx, LOCAL, &obj)).unwrap();
        let second = db.transact_blocking(|tx| resolve_video(tx, LOCAL, &obj)).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entity, second.entity);
        assert!(!first.entity.is_owned);
        assert_eq!(first.entity.privacy, Privacy::Public);
        assert_eq!(db.count_rows(StoredKind::Videos).unwrap(), 1);
        assert_eq!(db.count_rows(StoredKind::Actors).unwrap(), 2);
        assert_eq!(db.count_rows(StoredKind::Accounts).unwrap(), 1);

        let files = db.list_video_files(first.entity.id).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].resolution, 720);
    }

    #[test]
    fn video_found_by_uuid_under_another_url() {
        let (_dir, db) = temp_db();
        let obj = video_object("https://peer.example", "abc");
        db.transact_blocking(|tx| resolve_video(tx, LOCAL, &obj)).unwrap();

        let mut moved = obj.clone();
        moved.id = "https://peer.example/w/abc".to_string();
        let again = db.transact_blocking(|tx| resolve_video(tx, LOCAL, &moved)).unwrap();
        assert!(!again.created);
        assert_eq!(again.entity.url, obj.id);
    }

    #[test]
    fn video_under_local_origin_is_owned() {
        let (_dir, db) = temp_db();
        let obj = video_object(LOCAL, "mine");
        let res = db.transact_blocking(|tx| resolve_video(tx, LOCAL, &obj)).unwrap();
        assert!(res.entity.is_owned);
        let channel = db.get_actor(res.entity.channel_actor_id.unwrap()).unwrap().unwrap();
        assert!(channel.is_local);
        assert_eq!(channel.account_id, None);
    }

    #[test]
    fn video_without_channel_is_rejected() {
        let (_dir, db) = temp_db();
        let mut obj = video_object("https://peer.example", "orphan");
        obj.attributed_to.retain(|a| a.ty != "Group");
        let err = db.transact_blocking(|tx| resolve_video(tx, LOCAL, &obj)).unwrap_err();
        assert!(!is_transient(&err));
        assert_eq!(db.count_rows(StoredKind::Actors).unwrap(), 0);
    }

    #[test]
    fn empty_account_id_writes_nothing_before_failing() {
        let (_dir, db) = temp_db();
        let mut obj = video_object("https://peer.example", "blank");
        for link in obj.attributed_to.iter_mut().filter(|a| a.ty == "Person") {
            link.id = String::new();
        }
        // The caller swallows the rejection and commits, as playlist slots do.
        let err = db
            .transact_blocking(|tx| Ok(resolve_video(tx, LOCAL, &obj).unwrap_err()))
            .unwrap();
        assert!(err.downcast_ref::<IngestError>().is_some());
        assert_eq!(db.count_rows(StoredKind::Actors).unwrap(), 0);
        assert_eq!(db.count_rows(StoredKind::Videos).unwrap(), 0);
    }

    #[test]
    fn comment_replies_track_parent_and_origin() {
        let (_dir, db) = temp_db();
        let obj = video_object("https://peer.example", "abc");
        let comment = |id: &str, reply: &str| CommentObject {
            id: id.to_string(),
            in_reply_to: reply.to_string(),
            content: "hi".to_string(),
            attributed_to: None,
            published: None,
            to: vec![],
            cc: vec![],
        };
        let (root, reply, again) = db
            .transact_blocking(|tx| {
                let video = resolve_video(tx, LOCAL, &obj)?.entity;
                let root = resolve_comment(tx, &video, &comment("https://peer.example/c/1", &video.url), None, None)?;
                let reply = resolve_comment(
                    tx,
                    &video,
                    &comment("https://peer.example/c/2", "https://peer.example/c/1"),
                    Some(&root.entity),
                    None,
                )?;
                let again = resolve_comment(tx, &video, &comment("https://peer.example/c/2", "x"), None, None)?;
                Ok((root, reply, again))
            })
            .unwrap();
        assert!(root.created && reply.created && !again.created);
        assert_eq!(reply.entity.in_reply_to_comment_id, Some(root.entity.id));
        assert_eq!(reply.entity.origin_comment_id, Some(root.entity.id));
        assert_eq!(again.entity, reply.entity);
    }

    #[test]
    fn cache_file_upsert_updates_in_place() {
        let (_dir, db) = temp_db();
        let obj = video_object(LOCAL, "cached");
        let cache = |href: &str| CacheFileObject {
            id: "https://peer.example/redundancy/1".to_string(),
            object: vidfed_protocol::ObjectRef::Link(obj.id.clone()),
            expires: Some("2030-01-01T00:00:00Z".to_string()),
            url: LinkObject {
                ty: "Link".to_string(),
                media_type: "video/mp4".to_string(),
                href: href.to_string(),
                height: Some(480),
                size: None,
                fps: None,
            },
        };
        let (first, second) = db
            .transact_blocking(|tx| {
                let video = resolve_video(tx, LOCAL, &obj)?.entity;
                let peer = resolve_actor(tx, LOCAL, &ActorDescriptor::new("https://peer.example/accounts/peertube", ActorKind::Application))?.entity;
                let first = upsert_cache_file(tx, &video, &peer, &cache("https://peer.example/a.mp4"))?;
                let second = upsert_cache_file(tx, &video, &peer, &cache("https://peer.example/b.mp4"))?;
                Ok((first, second))
            })
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.entity.id, second.entity.id);
        assert_eq!(second.entity.file_url, "https://peer.example/b.mp4");
        assert_eq!(db.count_rows(StoredKind::CacheFiles).unwrap(), 1);
    }

    #[test]
    fn playlist_elements_are_replaced_wholesale() {
        let (_dir, db) = temp_db();
        let a = video_object("https://peer.example", "a");
        let b = video_object("https://peer.example", "b");
        let playlist = PlaylistObject {
            id: "https://peer.example/video-playlists/p1".to_string(),
            name: "mix".to_string(),
            content: None,
            ordered_items: vec![],
        };
        let audience = vec![AS_PUBLIC.to_string()];
        let (first, second) = db
            .transact_blocking(|tx| {
                let owner = resolve_actor(tx, LOCAL, &ActorDescriptor::new("https://peer.example/accounts/bob", ActorKind::Person))?.entity;
                let account_id = owner.account_id.context("person without account")?;
                let va = resolve_video(tx, LOCAL, &a)?.entity;
                let vb = resolve_video(tx, LOCAL, &b)?.entity;
                let slot = |id| PlaylistSlot {
                    video_id: id,
                    start_timestamp: None,
                    stop_timestamp: None,
                };
                let first = replace_playlist(tx, account_id, &playlist, &audience, &[slot(va.id), slot(vb.id)])?;
                let second = replace_playlist(tx, account_id, &playlist, &[], &[slot(vb.id)])?;
                Ok((first, second))
            })
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.entity.privacy, Privacy::Unlisted);
        let entries = db.list_playlist_entries(second.entity.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 1);
    }

    #[test]
    fn local_url_matching_respects_path_boundary() {
        assert!(is_local_url("https://local.example/", "https://local.example/videos/watch/1"));
        assert!(!is_local_url("https://local.example", "https://local.example.evil/videos/1"));
        assert!(!is_local_url("", "https://local.example/videos/1"));
    }
}
