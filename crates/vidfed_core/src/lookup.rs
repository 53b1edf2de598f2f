/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Read-only walks over the store and remote peers that run before a write
//! transaction opens: reply-chain resolution and video lookup by reference.

use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;
use vidfed_protocol::{ActivityObject, CommentObject, ObjectRef, VideoObject};

use crate::error::IngestError;
use crate::fetch::ObjectFetcher;
use crate::resolver::VideoTarget;
use crate::store::{comment_by_url, video_by_url, Comment, FederationDb, Video};

#[derive(Debug, Clone)]
pub enum ThreadAnchor {
    Video(Video),
    RemoteVideo(Box<VideoObject>),
    Comment(Comment),
}

/// Where a reply chain meets known state, plus the fetched comments in between.
#[derive(Debug, Clone)]
pub struct ThreadPath {
    pub anchor: ThreadAnchor,
    /// Top-down: `ancestors[0]` replies to the anchor.
    pub ancestors: Vec<CommentObject>,
}

/// Walks `in_reply_to` upward until it reaches a video.
///
/// `Ok(None)` is the common "this Note is not a video comment" outcome: the chain
/// ended, looped, went too deep, or hit something that is not a Note or a Video.
pub async fn resolve_thread(
    db: &FederationDb,
    fetcher: &dyn ObjectFetcher,
    in_reply_to: &str,
    max_depth: u32,
) -> Result<Option<ThreadPath>> {
    let mut pending: Vec<CommentObject> = Vec::new();
    let mut seen = HashSet::new();
    let mut current = in_reply_to.trim().to_string();

    for _ in 0..max_depth.max(1) {
        if current.is_empty() || !seen.insert(current.clone()) {
            debug!(url = %current, "reply chain ends or loops");
            return Ok(None);
        }

        let (video, comment) = db
            .read({
                let url = current.clone();
                move |conn| Ok((video_by_url(conn, &url)?, comment_by_url(conn, &url)?))
            })
            .await?;
        if let Some(video) = video {
            return Ok(Some(finish(ThreadAnchor::Video(video), pending)));
        }
        if let Some(comment) = comment {
            return Ok(Some(finish(ThreadAnchor::Comment(comment), pending)));
        }

        match fetcher.fetch(&current).await {
            Ok(Some(ActivityObject::Video(obj))) => {
                return Ok(Some(finish(ThreadAnchor::RemoteVideo(Box::new(obj)), pending)));
            }
            Ok(Some(ActivityObject::Note(note))) => {
                current = note.in_reply_to.trim().to_string();
                pending.push(note);
            }
            Ok(Some(other)) => {
                debug!(url = %current, ty = other.type_name(), "reply chain reaches a non-video object");
                return Ok(None);
            }
            Ok(None) => {
                debug!(url = %current, "reply chain parent is unknown");
                return Ok(None);
            }
            Err(e) => {
                debug!(url = %current, "reply chain parent fetch failed: {e:#}");
                return Ok(None);
            }
        }
    }

    debug!(in_reply_to, max_depth, "reply chain deeper than allowed");
    Ok(None)
}

fn finish(anchor: ThreadAnchor, mut pending: Vec<CommentObject>) -> ThreadPath {
    pending.reverse();
    ThreadPath {
        anchor,
        ancestors: pending,
    }
}

/// Finds the video a cache file points at. Unknown references are an error here.
pub async fn locate_video(
    db: &FederationDb,
    fetcher: &dyn ObjectFetcher,
    reference: &ObjectRef,
) -> Result<VideoTarget> {
    match reference {
        ObjectRef::Embedded(obj) => match obj.as_ref() {
            ActivityObject::Video(video) => Ok(VideoTarget::Remote(Box::new(video.clone()))),
            other => Err(IngestError::VideoUnresolved {
                reference: other.id().unwrap_or(other.type_name()).to_string(),
            }
            .into()),
        },
        ObjectRef::Link(url) => locate_video_url(db, fetcher, url).await?.ok_or_else(|| {
            IngestError::VideoUnresolved {
                reference: url.clone(),
            }
            .into()
        }),
    }
}

pub async fn locate_video_url(
    db: &FederationDb,
    fetcher: &dyn ObjectFetcher,
    url: &str,
) -> Result<Option<VideoTarget>> {
    let stored = db
        .read({
            let url = url.trim().to_string();
            move |conn| video_by_url(conn, &url)
        })
        .await?;
    if let Some(video) = stored {
        return Ok(Some(VideoTarget::Stored(video)));
    }
    match fetcher.fetch(url).await {
        Ok(Some(ActivityObject::Video(obj))) => Ok(Some(VideoTarget::Remote(Box::new(obj)))),
        Ok(_) => Ok(None),
        Err(e) => {
            debug!(url, "video fetch failed: {e:#}");
            Ok(None)
        }
    }
}
