/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Inbound `Create` handling.
//!
//! Every path follows the same shape: look things up (and fetch) without writing,
//! persist in one transaction, then forward and notify. Forward and notify only run
//! after the commit and their failures are logged, never returned.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vidfed_protocol::{Activity, ActivityObject, CacheFileObject, CommentObject, PlaylistObject, VideoObject};

use crate::config::{NodeConfig, RetryPolicy};
use crate::error::IngestError;
use crate::fetch::ObjectFetcher;
use crate::forward::{DeliveryLayer, Forwarder};
use crate::lookup::{locate_video, locate_video_url, resolve_thread, ThreadAnchor, ThreadPath};
use crate::notifier::Notifier;
use crate::resolver::{
    materialize_video, replace_playlist, resolve_actor, resolve_comment, resolve_video,
    upsert_cache_file, ActorDescriptor, PlaylistSlot, VideoTarget,
};
use crate::retry::with_retry;
use crate::store::{
    video_by_id, Actor, ActorKind, CacheFile, Comment, FederationDb, Playlist, Resolved, Video,
};

/// What a dispatched activity amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Video(Resolved<Video>),
    Comment {
        comment: Resolved<Comment>,
        forwarded: usize,
    },
    /// The Note does not hang off any video we could find.
    ThreadMiss,
    CacheFile {
        cache_file: Resolved<CacheFile>,
        forwarded: usize,
    },
    Playlist {
        playlist: Resolved<Playlist>,
        entries: usize,
    },
    Ignored {
        ty: String,
    },
}

impl Outcome {
    pub fn created(&self) -> bool {
        match self {
            Outcome::Video(r) => r.created,
            Outcome::Comment { comment, .. } => comment.created,
            Outcome::CacheFile { cache_file, .. } => cache_file.created,
            Outcome::Playlist { playlist, .. } => playlist.created,
            Outcome::ThreadMiss | Outcome::Ignored { .. } => false,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    db: FederationDb,
    local_base: String,
    retry: RetryPolicy,
    max_thread_depth: u32,
    fetcher: Arc<dyn ObjectFetcher>,
    forwarder: Forwarder,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(
        cfg: &NodeConfig,
        db: FederationDb,
        fetcher: Arc<dyn ObjectFetcher>,
        delivery: Arc<dyn DeliveryLayer>,
        notifier: Notifier,
    ) -> Self {
        Self {
            forwarder: Forwarder::new(db.clone(), delivery),
            db,
            local_base: cfg.local_base().to_string(),
            retry: cfg.retry,
            max_thread_depth: cfg.max_thread_depth,
            fetcher,
            notifier,
        }
    }

    pub fn db(&self) -> &FederationDb {
        &self.db
    }

    /// Resolves-or-creates the sending actor. Inbox handlers call this before `dispatch`.
    pub async fn resolve_sender(
        &self,
        url: &str,
        kind: ActorKind,
        inbox: Option<&str>,
        shared_inbox: Option<&str>,
    ) -> Result<Actor> {
        let local_base = self.local_base.clone();
        let url = url.to_string();
        let inbox = inbox.map(str::to_string);
        let shared_inbox = shared_inbox.map(str::to_string);
        let res = with_retry(&self.retry, "resolve sender", || {
            let local_base = local_base.clone();
            let url = url.clone();
            let inbox = inbox.clone();
            let shared_inbox = shared_inbox.clone();
            self.db.transact(move |tx| {
                let desc = ActorDescriptor {
                    url: &url,
                    kind,
                    inbox: inbox.as_deref(),
                    shared_inbox: shared_inbox.as_deref(),
                };
                resolve_actor(tx, &local_base, &desc)
            })
        })
        .await?;
        Ok(res.entity)
    }

    pub async fn dispatch(&self, activity: &Activity, by_actor: &Actor) -> Result<Outcome> {
        match &activity.object {
            ActivityObject::Video(video) => self.process_video(video).await.map(Outcome::Video),
            ActivityObject::Note(note) => self.process_comment(activity, note, by_actor).await,
            ActivityObject::CacheFile(cache) => self.process_cache_file(activity, cache, by_actor).await,
            ActivityObject::Playlist(playlist) => self.process_playlist(activity, playlist, by_actor).await,
            ActivityObject::Unknown { ty, .. } => {
                warn!(activity = activity.display_id(), ty = %ty, "unknown object type in Create, ignoring");
                Ok(Outcome::Ignored { ty: ty.clone() })
            }
        }
    }

    async fn process_video(&self, obj: &VideoObject) -> Result<Resolved<Video>> {
        let local_base = self.local_base.clone();
        let owned = obj.clone();
        let res = self
            .db
            .transact(move |tx| resolve_video(tx, &local_base, &owned))
            .await?;
        if res.created {
            info!(video = %res.entity.url, "video created");
            self.notifier.notify_on_new_video_if_needed(&res.entity).await;
        } else {
            debug!(video = %res.entity.url, "video already known");
        }
        Ok(res)
    }

    async fn process_comment(&self, activity: &Activity, note: &CommentObject, by_actor: &Actor) -> Result<Outcome> {
        let account_id = by_actor.account_id.ok_or_else(|| IngestError::AccountRequired {
            actor: by_actor.url.clone(),
            kind: "comment",
        })?;

        let Some(path) =
            resolve_thread(&self.db, self.fetcher.as_ref(), &note.in_reply_to, self.max_thread_depth).await?
        else {
            debug!(
                comment = %note.id,
                in_reply_to = %note.in_reply_to,
                "cannot resolve thread, maybe not a video thread; skipping"
            );
            return Ok(Outcome::ThreadMiss);
        };

        let (video, comment) = with_retry(&self.retry, "create comment", || {
            let local_base = self.local_base.clone();
            let path = path.clone();
            let note = note.clone();
            self.db
                .transact(move |tx| persist_thread(tx, &local_base, &path, &note, account_id))
        })
        .await?;

        let mut forwarded = 0;
        if video.is_owned && comment.created {
            forwarded = self.forward(activity, by_actor, &video).await;
        }
        if comment.created {
            self.notifier.notify_on_new_comment(&comment.entity).await;
        }
        Ok(Outcome::Comment { comment, forwarded })
    }

    async fn process_cache_file(
        &self,
        activity: &Activity,
        cache: &CacheFileObject,
        by_actor: &Actor,
    ) -> Result<Outcome> {
        let target = locate_video(&self.db, self.fetcher.as_ref(), &cache.object).await?;

        let (video, cache_file) = with_retry(&self.retry, "create cache file", || {
            let local_base = self.local_base.clone();
            let target = target.clone();
            let cache = cache.clone();
            let sender = by_actor.clone();
            self.db.transact(move |tx| {
                let video = materialize_video(tx, &local_base, &target)?.entity;
                let cache_file = upsert_cache_file(tx, &video, &sender, &cache)?;
                Ok((video, cache_file))
            })
        })
        .await?;

        // Not gated on `created`: a refreshed cache entry is re-announced too.
        let forwarded = if video.is_owned {
            self.forward(activity, by_actor, &video).await
        } else {
            0
        };
        Ok(Outcome::CacheFile { cache_file, forwarded })
    }

    async fn process_playlist(&self, activity: &Activity, obj: &PlaylistObject, by_actor: &Actor) -> Result<Outcome> {
        let account_id = by_actor.account_id.ok_or_else(|| IngestError::AccountRequired {
            actor: by_actor.url.clone(),
            kind: "playlist",
        })?;

        let mut items = Vec::with_capacity(obj.ordered_items.len());
        for item in &obj.ordered_items {
            match locate_video_url(&self.db, self.fetcher.as_ref(), item.video_url()).await? {
                Some(target) => items.push((target, item.timestamps())),
                None => debug!(playlist = %obj.id, video = item.video_url(), "playlist element video not found, skipping"),
            }
        }

        let (playlist, entries) = with_retry(&self.retry, "create playlist", || {
            let local_base = self.local_base.clone();
            let items = items.clone();
            let obj = obj.clone();
            let audience = activity.to.clone();
            self.db.transact(move |tx| {
                let slots = materialize_slots(tx, &local_base, &obj.id, &items)?;
                let playlist = replace_playlist(tx, account_id, &obj, &audience, &slots)?;
                Ok((playlist, slots.len()))
            })
        })
        .await?;

        info!(playlist = %playlist.entity.url, entries, created = playlist.created, "playlist stored");
        Ok(Outcome::Playlist { playlist, entries })
    }

    async fn forward(&self, activity: &Activity, by_actor: &Actor, video: &Video) -> usize {
        let exceptions = [by_actor.clone()];
        match self
            .forwarder
            .forward_video_related(activity, &exceptions, by_actor, video)
            .await
        {
            Ok(recipients) => recipients.len(),
            Err(e) => {
                warn!(activity = activity.display_id(), video = %video.url, "forward failed: {e:#}");
                0
            }
        }
    }
}

/// Creates any fetched ancestors top-down, then the comment itself.
fn persist_thread(
    conn: &Connection,
    local_base: &str,
    path: &ThreadPath,
    note: &CommentObject,
    account_id: i64,
) -> Result<(Video, Resolved<Comment>)> {
    let (video, mut parent) = match &path.anchor {
        ThreadAnchor::Video(v) => (materialize_video(conn, local_base, &VideoTarget::Stored(v.clone()))?.entity, None),
        ThreadAnchor::RemoteVideo(obj) => (resolve_video(conn, local_base, obj)?.entity, None),
        ThreadAnchor::Comment(c) => {
            let video = video_by_id(conn, c.video_id)?.context("thread video vanished")?;
            (video, Some(c.clone()))
        }
    };

    for ancestor in &path.ancestors {
        let author = match ancestor.attributed_to.as_deref() {
            Some(url) => resolve_actor(conn, local_base, &ActorDescriptor::new(url, ActorKind::Person))?
                .entity
                .account_id,
            None => None,
        };
        parent = Some(resolve_comment(conn, &video, ancestor, parent.as_ref(), author)?.entity);
    }

    let comment = resolve_comment(conn, &video, note, parent.as_ref(), Some(account_id))?;
    Ok((video, comment))
}

type PlaylistItemTarget = (VideoTarget, (Option<u32>, Option<u32>));

fn materialize_slots(
    conn: &Connection,
    local_base: &str,
    playlist_url: &str,
    items: &[PlaylistItemTarget],
) -> Result<Vec<PlaylistSlot>> {
    let mut slots = Vec::with_capacity(items.len());
    for (target, (start, stop)) in items {
        let video = match materialize_video(conn, local_base, target) {
            Ok(res) => res.entity,
            // resolve_video rejects before its first insert; nothing to undo.
            Err(e) if e.downcast_ref::<IngestError>().is_some() => {
                debug!(playlist = playlist_url, video = target.url(), "playlist element video rejected: {e:#}");
                continue;
            }
            Err(e) => return Err(e),
        };
        slots.push(PlaylistSlot {
            video_id: video.id,
            start_timestamp: *start,
            stop_timestamp: *stop,
        });
    }
    Ok(slots)
}
